// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use super::job::{Job, JobId};
use crate::error::Error;
use crate::session::SessionId;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Identity of a share for duplicate detection within one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareKey {
    pub session_id: SessionId,
    pub nonce: u32,
    pub extranonce2: Vec<u8>,
}

#[derive(Debug)]
struct TrackedJob {
    job: Arc<Job>,
    /// Set once a later clean job retires this one
    retire_at: Option<Instant>,
}

impl TrackedJob {
    fn is_retired(&self, now: Instant) -> bool {
        self.retire_at.is_some_and(|retire_at| now >= retire_at)
    }
}

/// Bounded set of recent jobs and the shares seen for each.
///
/// Job ids come from a counter owned by the tracker, seeded from the clock
/// so ids don't repeat across restarts.
#[derive(Debug)]
pub struct JobTracker {
    jobs: DashMap<JobId, TrackedJob>,
    /// Tracks submitted shares per job for duplicate detection
    job_shares: DashMap<JobId, DashSet<ShareKey>>,
    latest_job_id: AtomicU64,
    capacity: usize,
    clean_grace: Duration,
}

impl JobTracker {
    /// Create a new tracker with a timestamp-based initial job id.
    pub fn new(capacity: usize, clean_grace: Duration) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            jobs: DashMap::new(),
            job_shares: DashMap::new(),
            latest_job_id: AtomicU64::new(timestamp),
            capacity: capacity.max(1),
            clean_grace,
        }
    }

    /// Get the next job id, incrementing it atomically
    pub fn next_job_id(&self) -> JobId {
        JobId(self.latest_job_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Get the latest job id without incrementing
    pub fn latest_job_id(&self) -> JobId {
        JobId(self.latest_job_id.load(Ordering::SeqCst))
    }

    /// Record a job. A clean job schedules every older job for retirement
    /// after the grace window. The oldest jobs are dropped past capacity.
    pub fn insert(&self, job: Arc<Job>) {
        let now = Instant::now();
        if job.clean {
            for mut tracked in self.jobs.iter_mut() {
                if tracked.retire_at.is_none() {
                    tracked.retire_at = Some(now + self.clean_grace);
                }
            }
        }
        let job_id = job.id;
        self.job_shares.insert(job_id, DashSet::new());
        self.jobs.insert(
            job_id,
            TrackedJob {
                job,
                retire_at: None,
            },
        );

        while self.jobs.len() > self.capacity {
            let oldest = self.jobs.iter().map(|entry| *entry.key()).min();
            match oldest {
                Some(oldest) => self.remove(oldest),
                None => break,
            }
        }
    }

    fn remove(&self, job_id: JobId) {
        self.jobs.remove(&job_id);
        self.job_shares.remove(&job_id);
        debug!("Dropped job {job_id}");
    }

    /// Look up a job that is still valid for shares.
    pub fn get_job(&self, job_id: JobId) -> Option<Arc<Job>> {
        let tracked = self.jobs.get(&job_id)?;
        if tracked.is_retired(Instant::now()) {
            return None;
        }
        Some(tracked.job.clone())
    }

    /// Record a share for duplicate detection.
    ///
    /// Check and insert happen in one step, so of two identical concurrent
    /// submissions exactly one gets through.
    pub fn record_share(&self, job_id: JobId, key: ShareKey) -> Result<(), Error> {
        let shares = self.job_shares.get(&job_id).ok_or(Error::UnknownJob)?;
        if shares.insert(key) {
            Ok(())
        } else {
            Err(Error::DuplicateShare)
        }
    }

    /// Remove jobs whose grace window has passed.
    /// Returns the number of jobs that were removed
    pub fn cleanup_retired_jobs(&self) -> usize {
        let now = Instant::now();
        let before_count = self.jobs.len();
        self.jobs.retain(|job_id, tracked| {
            let keep = !tracked.is_retired(now);
            if !keep {
                self.job_shares.remove(job_id);
            }
            keep
        });
        before_count.saturating_sub(self.jobs.len())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Spawn a task that periodically removes retired jobs.
pub fn start_tracker_cleanup(tracker: Arc<JobTracker>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let count = tracker.cleanup_retired_jobs();
            if count > 0 {
                debug!("Cleaned up {} retired jobs", count);
            }
        }
    })
}
