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

use super::field::{decode_be, decode_bytes, decode_hex, encode_be};
use super::{Method, Notification, check_arity, str_param};
use crate::error::Error;
use serde_json::{Value, json};

/// Params of a `mining.notify` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyParams {
    pub job_id: String,
    /// Previous block hash in the word order miners expect.
    pub digest: [u8; 32],
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_path: Vec<[u8; 32]>,
    pub version: u32,
    /// Compact target (nBits), raw bytes.
    pub target: [u8; 4],
    pub timestamp: u32,
    pub clean: bool,
}

impl NotifyParams {
    pub fn read(notification: &Notification) -> Result<Self, Error> {
        let params = &notification.params;
        check_arity(params, 9, 9, Method::Notify)?;

        let job_id = str_param(params, 0, "job id")?.to_string();
        let digest = decode_bytes::<32>(str_param(params, 1, "digest")?)?;
        let coinbase1 = decode_hex(str_param(params, 2, "coinbase1")?)?;
        let coinbase2 = decode_hex(str_param(params, 3, "coinbase2")?)?;
        let merkle_path = params[4]
            .as_array()
            .ok_or_else(|| Error::InvalidFormat("merkle path must be an array".into()))?
            .iter()
            .map(|branch| {
                branch
                    .as_str()
                    .ok_or_else(|| Error::InvalidFormat("merkle branch must be a string".into()))
                    .and_then(decode_bytes::<32>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let version = decode_be(str_param(params, 5, "version")?)?;
        let target = decode_bytes::<4>(str_param(params, 6, "target")?)?;
        let timestamp = decode_be(str_param(params, 7, "time")?)?;
        let clean = params[8]
            .as_bool()
            .ok_or_else(|| Error::InvalidFormat("clean flag must be a boolean".into()))?;

        Ok(Self {
            job_id,
            digest,
            coinbase1,
            coinbase2,
            merkle_path,
            version,
            target,
            timestamp,
            clean,
        })
    }
}

/// Build a `mining.notify` notification.
pub fn notify(params: &NotifyParams) -> Notification {
    let merkle_path: Vec<Value> = params
        .merkle_path
        .iter()
        .map(|branch| json!(hex::encode(branch)))
        .collect();
    Notification::new(
        Method::Notify,
        vec![
            json!(params.job_id),
            json!(hex::encode(params.digest)),
            json!(hex::encode(&params.coinbase1)),
            json!(hex::encode(&params.coinbase2)),
            Value::Array(merkle_path),
            json!(encode_be(params.version)),
            json!(hex::encode(params.target)),
            json!(encode_be(params.timestamp)),
            json!(params.clean),
        ],
    )
}
