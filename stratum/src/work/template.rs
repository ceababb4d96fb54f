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

//! Block template input for the job broadcaster.

use crate::error::Error;
use bitcoin::{BlockHash, CompactTarget};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::str::FromStr;

/// Header fields and coinbase fragments needed to mint a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobTemplate {
    #[serde(deserialize_with = "deserialize_block_hash")]
    pub prev_blockhash: BlockHash,
    #[serde(deserialize_with = "deserialize_hex")]
    pub coinbase1: Vec<u8>,
    #[serde(deserialize_with = "deserialize_hex")]
    pub coinbase2: Vec<u8>,
    #[serde(default, deserialize_with = "deserialize_merkle_path")]
    pub merkle_path: Vec<[u8; 32]>,
    pub version: u32,
    #[serde(deserialize_with = "deserialize_nbits")]
    pub nbits: CompactTarget,
    pub ntime: u32,
}

fn deserialize_block_hash<'de, D>(deserializer: D) -> Result<BlockHash, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    BlockHash::from_str(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
}

fn deserialize_merkle_path<'de, D>(deserializer: D) -> Result<Vec<[u8; 32]>, D::Error>
where
    D: Deserializer<'de>,
{
    let branches: Vec<String> = Deserialize::deserialize(deserializer)?;
    branches
        .iter()
        .map(|branch| {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(branch, &mut bytes).map_err(serde::de::Error::custom)?;
            Ok(bytes)
        })
        .collect()
}

/// nBits as the usual hex string, e.g. "1d00ffff".
fn deserialize_nbits<'de, D>(deserializer: D) -> Result<CompactTarget, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u32::from_str_radix(&s, 16)
        .map(CompactTarget::from_consensus)
        .map_err(serde::de::Error::custom)
}

/// Pull interface to whatever supplies block templates.
#[cfg_attr(test, automock)]
pub trait BlockHeaderSource: Send + Sync {
    fn fetch_template(&self) -> Result<JobTemplate, Error>;
}

/// Reads the current template from a JSON file on every fetch.
///
/// Lets an external process drive the pool by rewriting the file.
#[derive(Debug, Clone)]
pub struct JsonFileTemplateSource {
    path: PathBuf,
}

impl JsonFileTemplateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BlockHeaderSource for JsonFileTemplateSource {
    fn fetch_template(&self) -> Result<JobTemplate, Error> {
        let contents = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::TemplateError(format!("{}: {e}", self.path.display()))
        })
    }
}
