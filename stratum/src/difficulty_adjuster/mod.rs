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

//! Per-session difficulty adjustment.
//!
//! Each session keeps a fixed-size window of intervals between its accepted
//! shares. When the window fills, a new difficulty is computed from the mean
//! interval and queued on a bounded channel. A delivery task applies queued
//! updates in the session registry and then tells the miner.

mod calc;

use crate::messages::set_difficulty::set_difficulty;
use crate::session::SessionId;
use crate::session_registry::SessionRegistry;
use calc::{apply_difficulty_constraints, mean_interval, retarget};
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Relative change below which a retarget is not worth announcing.
const MIN_RELATIVE_CHANGE: f64 = 1e-9;

/// A new difficulty for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyUpdate {
    pub session_id: SessionId,
    pub difficulty: f64,
}

pub type DifficultyUpdateSender = mpsc::Sender<DifficultyUpdate>;
pub type DifficultyUpdateReceiver = mpsc::Receiver<DifficultyUpdate>;

/// Create the bounded difficulty update channel.
pub fn create_difficulty_channel(
    capacity: usize,
) -> (DifficultyUpdateSender, DifficultyUpdateReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Retarget parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetargetConfig {
    /// Intervals collected before a retarget
    pub window_size: usize,
    /// Desired time between shares
    pub target_interval: Duration,
    pub minimum_difficulty: f64,
    pub maximum_difficulty: f64,
}

#[derive(Debug, Default)]
struct ShareWindow {
    last_share: Option<SystemTime>,
    intervals: Vec<Duration>,
}

#[cfg_attr(test, automock)]
pub trait DifficultyAdjusterTrait: Send + Sync {
    /// Record an accepted share. Returns the new difficulty when the window
    /// filled and the difficulty changed.
    fn observe(
        &self,
        session_id: SessionId,
        current_difficulty: f64,
        share_time: SystemTime,
    ) -> Option<f64>;

    /// Drop the window of a session that went away.
    fn forget(&self, session_id: SessionId);
}

/// Window-based difficulty adjuster shared by all sessions.
pub struct DifficultyAdjuster {
    config: RetargetConfig,
    windows: DashMap<SessionId, ShareWindow>,
    updates_tx: DifficultyUpdateSender,
}

impl DifficultyAdjuster {
    pub fn new(config: RetargetConfig, updates_tx: DifficultyUpdateSender) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            updates_tx,
        }
    }

    /// Add an interval and, when the window is full, compute a new difficulty.
    fn record(&self, session_id: SessionId, current_difficulty: f64, share_time: SystemTime) -> Option<f64> {
        let mut window = self.windows.entry(session_id).or_default();
        let previous = window.last_share.replace(share_time)?;
        window
            .intervals
            .push(share_time.duration_since(previous).unwrap_or_default());
        if window.intervals.len() < self.config.window_size.max(1) {
            return None;
        }

        let mean = mean_interval(&window.intervals);
        window.intervals.clear();
        let calculated = retarget(
            current_difficulty,
            mean,
            self.config.target_interval.as_secs_f64(),
        );
        let new_difficulty = apply_difficulty_constraints(
            calculated,
            self.config.minimum_difficulty,
            self.config.maximum_difficulty,
        );
        debug!(
            "Session {session_id} mean share interval {mean:.3}s, calculated difficulty {calculated}, constrained to {new_difficulty}"
        );
        if (new_difficulty - current_difficulty).abs() <= current_difficulty * MIN_RELATIVE_CHANGE {
            return None;
        }
        Some(new_difficulty)
    }
}

impl DifficultyAdjusterTrait for DifficultyAdjuster {
    fn observe(
        &self,
        session_id: SessionId,
        current_difficulty: f64,
        share_time: SystemTime,
    ) -> Option<f64> {
        let new_difficulty = self.record(session_id, current_difficulty, share_time)?;
        info!("Difficulty for session {session_id} changed from {current_difficulty} to {new_difficulty}");

        let update = DifficultyUpdate {
            session_id,
            difficulty: new_difficulty,
        };
        match self.updates_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Difficulty update channel full, dropping update for session {session_id}")
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Difficulty update channel closed, dropping update for session {session_id}")
            }
        }
        Some(new_difficulty)
    }

    fn forget(&self, session_id: SessionId) {
        self.windows.remove(&session_id);
    }
}

/// Spawn the task that applies difficulty updates and notifies miners.
///
/// The new difficulty is stored in the registry before mining.set_difficulty
/// is queued, so validation never lags behind what the miner was told.
pub fn start_difficulty_delivery(
    mut updates_rx: DifficultyUpdateReceiver,
    registry: Arc<SessionRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates_rx.recv().await {
            let Some(sender) = registry.set_difficulty(update.session_id, update.difficulty)
            else {
                debug!("Session {} gone before difficulty update", update.session_id);
                continue;
            };
            let line = match set_difficulty(update.difficulty).marshal() {
                Ok(line) => Arc::new(line),
                Err(e) => {
                    warn!("Failed to serialize set_difficulty: {e}");
                    continue;
                }
            };
            if sender.send(line).await.is_err() {
                debug!("Session {} closed before difficulty update", update.session_id);
            }
        }
        debug!("Difficulty update channel closed");
    })
}
