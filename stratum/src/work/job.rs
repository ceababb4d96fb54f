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

use super::reverse_four_byte_chunks;
use super::template::JobTemplate;
use crate::messages::NotifyParams;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget};
use std::fmt;

/// The job id sent to miners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct JobId(pub u64);

/// Delegate to u64's lower hex
impl fmt::LowerHex for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl JobId {
    /// Parse the wire form. Any string we did not mint is None.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(JobId)
    }
}

/// One unit of work sent to miners. Immutable once minted.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub prev_blockhash: BlockHash,
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    /// Merkle branches in hashing byte order
    pub merkle_path: Vec<[u8; 32]>,
    pub version: u32,
    pub nbits: CompactTarget,
    pub ntime: u32,
    pub clean: bool,
}

impl Job {
    pub fn from_template(id: JobId, template: &JobTemplate, clean: bool) -> Self {
        Self {
            id,
            prev_blockhash: template.prev_blockhash,
            coinbase1: template.coinbase1.clone(),
            coinbase2: template.coinbase2.clone(),
            merkle_path: template.merkle_path.clone(),
            version: template.version,
            nbits: template.nbits,
            ntime: template.ntime,
            clean,
        }
    }

    /// Previous block hash as sent in mining.notify.
    pub fn digest(&self) -> [u8; 32] {
        let mut display = self.prev_blockhash.to_byte_array();
        display.reverse();
        reverse_four_byte_chunks(&display)
    }

    pub fn notify_params(&self) -> NotifyParams {
        NotifyParams {
            job_id: self.id.to_string(),
            digest: self.digest(),
            coinbase1: self.coinbase1.clone(),
            coinbase2: self.coinbase2.clone(),
            merkle_path: self.merkle_path.clone(),
            version: self.version,
            target: self.nbits.to_consensus().to_be_bytes(),
            timestamp: self.ntime,
            clean: self.clean,
        }
    }
}
