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

//! Bounded-concurrency validation of submitted shares.
//!
//! Cheap checks (session, job, field widths, duplicates) run on the
//! connection task. Header reconstruction and hashing run on a pool of at
//! most `max_workers` tasks. The verdict is sent back and the worker slot
//! released before the accepted solution is pushed to the sink, so neither
//! the protocol reply nor later submissions wait on the accounting consumer.

use crate::difficulty_adjuster::DifficultyAdjusterTrait;
use crate::emission::{EmissionSender, SinkPolicy, Solution};
use crate::error::Error;
use crate::messages::Share;
use crate::session::{Session, SessionId};
use crate::session_registry::SessionRegistry;
use crate::work::job::{Job, JobId};
use crate::work::tracker::{JobTracker, ShareKey};
use crate::work::validate::reconstruct;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tracing::{debug, error, info, warn};

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareValidatorConfig {
    pub max_workers: usize,
    /// How long a submission may wait for a free worker
    pub submission_timeout: Duration,
    pub sink_policy: SinkPolicy,
}

pub struct ShareValidator {
    registry: Arc<SessionRegistry>,
    tracker: Arc<JobTracker>,
    adjuster: Arc<dyn DifficultyAdjusterTrait>,
    workers: Arc<Semaphore>,
    submission_timeout: Duration,
    sink: EmissionSender,
    sink_policy: SinkPolicy,
}

impl ShareValidator {
    pub fn new(
        config: ShareValidatorConfig,
        registry: Arc<SessionRegistry>,
        tracker: Arc<JobTracker>,
        adjuster: Arc<dyn DifficultyAdjusterTrait>,
        sink: EmissionSender,
    ) -> Self {
        Self {
            registry,
            tracker,
            adjuster,
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            submission_timeout: config.submission_timeout,
            sink,
            sink_policy: config.sink_policy,
        }
    }

    /// Validate a share submitted on `session_id`.
    ///
    /// Returns Ok(true) when the share meets the session's current
    /// difficulty and Ok(false) when it does not. Rejections that never
    /// reach hashing are errors.
    pub async fn validate(&self, session_id: SessionId, share: Share) -> Result<bool, Error> {
        let session = self
            .registry
            .get(session_id)
            .filter(|session| session.authorized)
            .ok_or(Error::Unauthorized)?;
        if session.name.as_deref() != Some(share.worker_name.as_str()) {
            debug!(
                "Session {session_id} submitted for worker {:?} but authorized as {:?}",
                share.worker_name, session.name
            );
            return Err(Error::Unauthorized);
        }

        let job = JobId::parse(&share.job_id)
            .and_then(|job_id| self.tracker.get_job(job_id))
            .ok_or(Error::UnknownJob)?;

        if share.share.extranonce2.len() != session.extranonce2_size as usize {
            return Err(Error::InvalidField(format!(
                "extranonce2 is {} bytes, expected {}",
                share.share.extranonce2.len(),
                session.extranonce2_size
            )));
        }
        if share.share.general_purpose_bits.is_some() && session.version_mask.is_none() {
            return Err(Error::InvalidField(
                "version bits submitted without a negotiated mask".into(),
            ));
        }

        let permit = match tokio::time::timeout(
            self.submission_timeout,
            self.workers.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                warn!("No validation worker free for session {session_id}");
                return Err(Error::PoolBusy);
            }
        };

        self.tracker.record_share(
            job.id,
            ShareKey {
                session_id,
                nonce: share.share.nonce,
                extranonce2: share.share.extranonce2.clone(),
            },
        )?;

        let (verdict_tx, verdict_rx) = oneshot::channel();
        let task = ValidationTask {
            session,
            job,
            share,
            adjuster: self.adjuster.clone(),
            sink: self.sink.clone(),
            sink_policy: self.sink_policy,
        };
        tokio::spawn(task.run(verdict_tx, permit));

        verdict_rx.await.map_err(|_| {
            error!("Validation task for session {session_id} ended without a verdict");
            Error::PoolBusy
        })
    }
}

/// Everything a worker needs to judge one share.
struct ValidationTask {
    session: Session,
    job: Arc<Job>,
    share: Share,
    adjuster: Arc<dyn DifficultyAdjusterTrait>,
    sink: EmissionSender,
    sink_policy: SinkPolicy,
}

impl ValidationTask {
    /// Hash the share and send the verdict, then hand accepted shares to
    /// the sink. The worker slot is released before the sink push, so a
    /// stalled sink never starves validation.
    async fn run(self, verdict_tx: oneshot::Sender<bool>, permit: OwnedSemaphorePermit) {
        let session_id = self.session.id;
        let proof = reconstruct(
            &self.job,
            &self.session.extranonce1(),
            &self.share.share,
            self.session.version_mask,
        );
        let accepted = proof.difficulty >= self.session.current_difficulty;
        if verdict_tx.send(accepted).is_err() {
            debug!("Submitter for session {session_id} went away before the verdict");
        }
        drop(permit);
        if !accepted {
            info!(
                "Rejected share from session {session_id}: difficulty {} below {}",
                proof.difficulty, self.session.current_difficulty
            );
            return;
        }

        let timestamp = SystemTime::now();
        info!(
            "Accepted share from session {session_id} for job {} at difficulty {}",
            self.job.id, proof.difficulty
        );
        self.adjuster
            .observe(session_id, self.session.current_difficulty, timestamp);

        let solution = Solution {
            session_id,
            worker_name: self.share.worker_name,
            job_id: self.job.id,
            extranonce2: self.share.share.extranonce2,
            ntime: self.share.share.time,
            nonce: self.share.share.nonce,
            version: proof.header.version.to_consensus() as u32,
            block_hash: proof.block_hash,
            difficulty: proof.difficulty,
            timestamp,
        };
        match self.sink_policy {
            SinkPolicy::Block => {
                if self.sink.send(solution).await.is_err() {
                    error!("Solution sink closed, dropping share from session {session_id}");
                }
            }
            SinkPolicy::Drop => match self.sink.try_send(solution) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Solution sink full, dropping share from session {session_id}")
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Solution sink closed, dropping share from session {session_id}")
                }
            },
        }
    }
}
