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

//! Minting jobs and delivering mining.notify.

use super::job::Job;
use super::template::{BlockHeaderSource, JobTemplate};
use super::tracker::JobTracker;
use crate::error::Error;
use crate::messages::notify::notify;
use crate::session_registry::SessionRegistry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct LatestJob {
    template: JobTemplate,
    job: Arc<Job>,
    notify: Arc<String>,
}

/// Mints jobs from templates and sends them to authorized sessions.
pub struct JobBroadcaster {
    tracker: Arc<JobTracker>,
    registry: Arc<SessionRegistry>,
    latest: Mutex<Option<LatestJob>>,
}

impl JobBroadcaster {
    pub fn new(tracker: Arc<JobTracker>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            tracker,
            registry,
            latest: Mutex::new(None),
        }
    }

    fn latest(&self) -> MutexGuard<'_, Option<LatestJob>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a job with a fresh id and record it as a recent job.
    pub fn new_job(&self, template: &JobTemplate, clean: bool) -> Result<Arc<Job>, Error> {
        let job = Arc::new(Job::from_template(
            self.tracker.next_job_id(),
            template,
            clean,
        ));
        let notify = Arc::new(notify(&job.notify_params()).marshal()?);
        self.tracker.insert(job.clone());
        *self.latest() = Some(LatestJob {
            template: template.clone(),
            job: job.clone(),
            notify,
        });
        debug!("Minted job {} clean={clean}", job.id);
        Ok(job)
    }

    /// Fetch a template and, when it differs from the last one, mint and
    /// broadcast a job for it. A new previous block hash makes the job clean.
    pub fn poll_source<S>(&self, source: &S) -> Result<Option<Arc<Job>>, Error>
    where
        S: BlockHeaderSource + ?Sized,
    {
        let template = source.fetch_template()?;
        let clean = match self.latest().as_ref() {
            Some(latest) if latest.template == template => return Ok(None),
            Some(latest) => latest.template.prev_blockhash != template.prev_blockhash,
            None => true,
        };
        let job = self.new_job(&template, clean)?;
        self.broadcast(&job);
        Ok(Some(job))
    }

    /// The notify line for the most recent job, sent to newly authorized sessions.
    pub fn latest_notify(&self) -> Option<Arc<String>> {
        self.latest().as_ref().map(|latest| latest.notify.clone())
    }

    pub fn latest_job(&self) -> Option<Arc<Job>> {
        self.latest().as_ref().map(|latest| latest.job.clone())
    }

    /// Send a job to every authorized session.
    ///
    /// Works on a registry snapshot, so no lock is held while sending. A
    /// session that can't take the message is skipped. Returns the number
    /// of sessions the notify was queued for.
    pub fn broadcast(&self, job: &Job) -> usize {
        let cached = self
            .latest()
            .as_ref()
            .filter(|latest| latest.job.id == job.id)
            .map(|latest| latest.notify.clone());
        let message = match cached {
            Some(line) => line,
            None => match notify(&job.notify_params()).marshal() {
                Ok(line) => Arc::new(line),
                Err(e) => {
                    warn!("Failed to serialize notify for job {}: {e}", job.id);
                    return 0;
                }
            },
        };

        let mut delivered = 0;
        for (session_id, sender) in self.registry.authorized_senders() {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to send job {} to session {session_id}: {e}", job.id),
            }
        }
        info!("Broadcast job {} to {delivered} sessions", job.id);
        delivered
    }
}

/// Spawn a task polling the template source and broadcasting new jobs.
///
/// Sources may block (file reads, RPC), so each poll runs on the blocking pool.
pub fn start_job_poller<S>(
    source: S,
    broadcaster: Arc<JobBroadcaster>,
    interval: Duration,
) -> JoinHandle<()>
where
    S: BlockHeaderSource + 'static,
{
    let source = Arc::new(source);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let source = source.clone();
            let broadcaster = broadcaster.clone();
            let polled =
                tokio::task::spawn_blocking(move || broadcaster.poll_source(source.as_ref())).await;
            match polled {
                Ok(Ok(Some(job))) => debug!("New job {} from template source", job.id),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Failed to fetch block template: {e}"),
                Err(e) => error!("Template poll task failed: {e}"),
            }
        }
    })
}
