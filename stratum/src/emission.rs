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

use crate::session::SessionId;
use crate::work::job::JobId;
use bitcoin::BlockHash;
use serde::Deserialize;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Accepted shares emitted by the validator and consumed by accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub session_id: SessionId,
    pub worker_name: String,
    pub job_id: JobId,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    /// Header version after applying any rolled bits
    pub version: u32,
    pub block_hash: BlockHash,
    /// Difficulty the share's hash achieved
    pub difficulty: f64,
    pub timestamp: SystemTime,
}

pub type EmissionSender = mpsc::Sender<Solution>;
pub type EmissionReceiver = mpsc::Receiver<Solution>;

/// Create the bounded solution sink.
pub fn create_emission_channel(capacity: usize) -> (EmissionSender, EmissionReceiver) {
    mpsc::channel(capacity.max(1))
}

/// What to do with an accepted share when the sink is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkPolicy {
    /// Wait for the consumer to make room
    #[default]
    Block,
    /// Log and drop the solution
    Drop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct PolicyHolder {
        policy: SinkPolicy,
    }

    #[test]
    fn test_sink_policy_from_config_string() {
        let holder: PolicyHolder = serde_json::from_str(r#"{"policy":"drop"}"#).unwrap();
        assert_eq!(holder.policy, SinkPolicy::Drop);
        let holder: PolicyHolder = serde_json::from_str(r#"{"policy":"block"}"#).unwrap();
        assert_eq!(holder.policy, SinkPolicy::Block);
        assert!(serde_json::from_str::<PolicyHolder>(r#"{"policy":"spill"}"#).is_err());
    }
}
