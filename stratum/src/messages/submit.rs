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

use super::field::{decode_be, decode_hex, decode_le, encode_be, encode_le};
use super::{Id, Method, Request, check_arity, str_param};
use crate::error::Error;
use serde_json::json;

/// The miner-chosen part of a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerShare {
    pub time: u32,
    pub nonce: u32,
    pub extranonce2: Vec<u8>,
    /// Rolled version bits, only sent when version rolling is negotiated.
    pub general_purpose_bits: Option<u32>,
}

impl MinerShare {
    /// A share with an 8-byte big-endian extranonce2.
    pub fn new(time: u32, nonce: u32, extranonce2: u64) -> Self {
        Self {
            time,
            nonce,
            extranonce2: extranonce2.to_be_bytes().to_vec(),
            general_purpose_bits: None,
        }
    }

    pub fn with_general_purpose_bits(mut self, bits: u32) -> Self {
        self.general_purpose_bits = Some(bits);
        self
    }
}

/// Params of a `mining.submit` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub worker_name: String,
    pub job_id: String,
    pub share: MinerShare,
}

impl Share {
    pub fn read(request: &Request) -> Result<Self, Error> {
        let params = &request.params;
        check_arity(params, 5, 6, Method::Submit)?;

        let worker_name = str_param(params, 0, "worker name")?.to_string();
        let job_id = str_param(params, 1, "job id")?.to_string();
        let extranonce2 = decode_hex(str_param(params, 2, "extranonce2")?)?;
        let time = decode_be(str_param(params, 3, "time")?)?;
        let nonce = decode_be(str_param(params, 4, "nonce")?)?;
        let general_purpose_bits = if params.len() == 6 {
            Some(decode_le(str_param(params, 5, "version bits")?)?)
        } else {
            None
        };

        Ok(Self {
            worker_name,
            job_id,
            share: MinerShare {
                time,
                nonce,
                extranonce2,
                general_purpose_bits,
            },
        })
    }
}

/// Build a `mining.submit` request.
pub fn submit_request(id: Id, share: &Share) -> Request {
    let mut values = vec![
        json!(share.worker_name),
        json!(share.job_id),
        json!(hex::encode(&share.share.extranonce2)),
        json!(encode_be(share.share.time)),
        json!(encode_be(share.share.nonce)),
    ];
    if let Some(bits) = share.share.general_purpose_bits {
        values.push(json!(encode_le(bits)));
    }
    Request::new(id, Method::Submit, values)
}
