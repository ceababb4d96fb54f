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

use super::field::{decode_id, encode_id};
use super::method::{decode_method, encode_method};
use super::{Id, Method, Request, Response, check_arity, str_param};
use crate::error::Error;
use crate::session::SessionId;
use serde_json::{Value, json};

/// Params of a `mining.subscribe` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeParams {
    pub user_agent: String,
    /// Session the miner asks to resume, if any.
    pub resume_session_id: Option<SessionId>,
}

impl SubscribeParams {
    pub fn read(request: &Request) -> Result<Self, Error> {
        check_arity(&request.params, 1, 2, Method::Subscribe)?;
        let user_agent = str_param(&request.params, 0, "user agent")?.to_string();
        let resume_session_id = match request.params.get(1) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(decode_id(id)?),
            Some(_) => {
                return Err(Error::InvalidFormat(
                    "resume session id must be a string".into(),
                ));
            }
        };
        Ok(Self {
            user_agent,
            resume_session_id,
        })
    }
}

/// Build a `mining.subscribe` request.
pub fn subscribe_request(id: Id, params: &SubscribeParams) -> Request {
    let mut values = vec![json!(params.user_agent)];
    if let Some(session_id) = params.resume_session_id {
        values.push(json!(encode_id(session_id)));
    }
    Request::new(id, Method::Subscribe, values)
}

/// Result of a successful subscribe.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeResult {
    /// Subscribed methods paired with the subscription id.
    pub subscriptions: Vec<(Method, SessionId)>,
    pub extranonce1: SessionId,
    pub extranonce2_size: u32,
}

impl SubscribeResult {
    pub fn read(response: &Response) -> Result<Self, Error> {
        let result = response
            .result
            .as_array()
            .ok_or_else(|| Error::InvalidFormat("subscribe result must be an array".into()))?;
        if result.len() != 3 {
            return Err(Error::InvalidFormat(format!(
                "subscribe result needs 3 elements, got {}",
                result.len()
            )));
        }

        let subscriptions = result[0]
            .as_array()
            .ok_or_else(|| Error::InvalidFormat("subscriptions must be an array".into()))?
            .iter()
            .map(read_subscription)
            .collect::<Result<Vec<_>, _>>()?;

        let extranonce1 = result[1]
            .as_str()
            .ok_or_else(|| Error::InvalidFormat("extranonce1 must be a string".into()))?;
        let extranonce1 = decode_id(extranonce1)?;

        let extranonce2_size = match &result[2] {
            Value::Number(n) => n
                .as_u64()
                .and_then(|size| u32::try_from(size).ok())
                .ok_or_else(|| {
                    Error::InvalidField(format!("extranonce2 size {n} does not fit in u32"))
                })?,
            _ => {
                return Err(Error::InvalidFormat(
                    "extranonce2 size must be a number".into(),
                ));
            }
        };

        Ok(Self {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}

fn read_subscription(value: &Value) -> Result<(Method, SessionId), Error> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(method), Value::String(id)]) => {
            Ok((decode_method(method)?, decode_id(id)?))
        }
        _ => Err(Error::InvalidFormat(
            "subscription must be a [method, id] pair".into(),
        )),
    }
}

/// Build the response to a `mining.subscribe` request.
pub fn subscribe_response(id: Id, result: &SubscribeResult) -> Result<Response, Error> {
    let subscriptions = result
        .subscriptions
        .iter()
        .map(|(method, session_id)| -> Result<Value, Error> {
            Ok(json!([encode_method(*method)?, encode_id(*session_id)]))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Response::new(
        id,
        json!([
            subscriptions,
            encode_id(result.extranonce1),
            result.extranonce2_size
        ]),
    ))
}
