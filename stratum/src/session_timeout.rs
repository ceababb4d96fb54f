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

use crate::session_registry::SessionRegistry;
use crate::utils::time_provider::TimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Idle timeout and sweep cadence for session eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Sessions silent for longer than this are evicted
    pub idle_timeout: Duration,
    /// How often the sweeper runs; eviction granularity
    pub sweep_interval: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Spawn the periodic idle-session sweeper.
///
/// The sweeper runs independently of connection tasks. Evicted sessions are
/// signalled to close through their shutdown channel.
pub fn start_session_sweeper<T>(
    registry: Arc<SessionRegistry>,
    timeouts: SessionTimeouts,
    time_provider: T,
) -> JoinHandle<()>
where
    T: TimeProvider + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(timeouts.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = registry.sweep(timeouts.idle_timeout, time_provider.now());
            if !evicted.is_empty() {
                info!("Swept {} idle sessions", evicted.len());
            } else {
                debug!("Session sweep found no idle sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time_provider::TestTimeProvider;
    use std::time::SystemTime;

    #[test_log::test(tokio::test)]
    async fn test_sweeper_evicts_idle_session() {
        let start = SystemTime::now();
        let time_provider = TestTimeProvider::new(start);
        let registry = Arc::new(SessionRegistry::with_first_id(1, 8, 1.0, None));
        let (session, channels) = registry.register("cgminer", start).unwrap();

        let timeouts = SessionTimeouts {
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
        };
        let handle = start_session_sweeper(registry.clone(), timeouts, time_provider.clone());

        time_provider.advance(Duration::from_secs(61));

        tokio::time::timeout(Duration::from_secs(2), channels.shutdown_rx)
            .await
            .expect("sweeper did not evict the session")
            .unwrap();
        assert!(registry.get(session.id).is_none());
        handle.abort();
    }

    #[test_log::test(tokio::test)]
    async fn test_sweeper_keeps_active_session() {
        let start = SystemTime::now();
        let time_provider = TestTimeProvider::new(start);
        let registry = Arc::new(SessionRegistry::with_first_id(1, 8, 1.0, None));
        let (session, _channels) = registry.register("cgminer", start).unwrap();

        let timeouts = SessionTimeouts {
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_millis(10),
        };
        let handle = start_session_sweeper(registry.clone(), timeouts, time_provider.clone());

        time_provider.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.get(session.id).is_some());
        handle.abort();
    }
}
