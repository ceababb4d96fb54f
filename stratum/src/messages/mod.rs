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

//! Stratum V1 wire messages.
//!
//! Every message is one JSON object on one line. Objects with a `method`
//! and a non-null `id` are requests, objects with a `method` and no id are
//! notifications, and objects carrying `result` or `error` are responses.

pub mod authorize;
pub mod field;
pub mod method;
pub mod notify;
pub mod set_difficulty;
pub mod set_version_mask;
pub mod submit;
pub mod subscribe;

pub use authorize::AuthorizeParams;
pub use method::Method;
pub use notify::NotifyParams;
pub use set_difficulty::SetDifficultyParams;
pub use set_version_mask::SetVersionMaskParams;
pub use submit::{MinerShare, Share};
pub use subscribe::{SubscribeParams, SubscribeResult};

use crate::error::Error;
use method::{decode_method, encode_method};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Largest float that still converts to u64 without loss of range.
const U64_FLOAT_LIMIT: f64 = 18_446_744_073_709_551_616.0;

/// JSON-RPC message id. Requests and responses carry one, notifications don't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
}

impl Id {
    /// Coerce a decoded JSON value into a message id.
    ///
    /// Numbers may arrive as floats. They are accepted only when integral
    /// and inside the u64 range, never truncated.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    return Ok(Self::Number(v));
                }
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f < U64_FLOAT_LIMIT && f.fract() == 0.0 => {
                        Ok(Self::Number(f as u64))
                    }
                    _ => Err(Error::InvalidField(format!(
                        "message id {n} is not an unsigned integer"
                    ))),
                }
            }
            Value::Null => Err(Error::InvalidField("message id is null".into())),
            other => Err(Error::InvalidField(format!(
                "message id {other} is neither a number nor a string"
            ))),
        }
    }

    /// Ids must be non-empty when they are strings.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Number(_) => true,
            Self::String(s) => !s.is_empty(),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Id::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl From<u64> for Id {
    fn from(val: u64) -> Self {
        Id::Number(val)
    }
}

impl From<&str> for Id {
    fn from(val: &str) -> Self {
        Id::String(val.to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Error object carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Accepts both the object form and the `[code, message, data]` array
    /// form some pools send.
    fn from_value(value: &Value) -> Result<Option<Self>, Error> {
        match value {
            Value::Null => Ok(None),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::MalformedMessage(format!("response error: {e}"))),
            Value::Array(items) => {
                let code = match items.first().and_then(Value::as_i64) {
                    Some(code) => Some(i32::try_from(code).map_err(|_| {
                        Error::MalformedMessage(format!("response error code {code} out of range"))
                    })?),
                    None => None,
                };
                let message = items.get(1).and_then(Value::as_str);
                match (code, message) {
                    (Some(code), Some(message)) => Ok(Some(Self {
                        code,
                        message: message.to_string(),
                        data: items.get(2).filter(|d| !d.is_null()).cloned(),
                    })),
                    _ => Err(Error::MalformedMessage(
                        "response error array needs a code and a message".into(),
                    )),
                }
            }
            other => Err(Error::MalformedMessage(format!(
                "response error {other} has invalid type"
            ))),
        }
    }
}

impl From<&Error> for ResponseError {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// A message that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Id,
    pub method: Method,
    pub params: Vec<Value>,
}

/// A message that expects no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: Method,
    pub params: Vec<Value>,
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Id,
    pub result: Value,
    pub error: Option<ResponseError>,
}

/// Any message read from a line.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

#[derive(Serialize)]
struct RequestWire<'a> {
    id: &'a Id,
    method: &'static str,
    params: &'a [Value],
}

#[derive(Serialize)]
struct NotificationWire<'a> {
    method: &'static str,
    params: &'a [Value],
}

#[derive(Serialize)]
struct ResponseWire<'a> {
    id: &'a Id,
    result: &'a Value,
    error: &'a Option<ResponseError>,
}

fn to_line<T: Serialize>(wire: &T) -> Result<String, Error> {
    serde_json::to_string(wire).map_err(|e| Error::MalformedMessage(e.to_string()))
}

fn wire_method(method: Method, id: Option<&Id>) -> Result<&'static str, Error> {
    encode_method(method).map_err(|e| Error::ProtocolViolation {
        id: id.cloned(),
        reason: e.to_string(),
    })
}

fn check_id(id: &Id) -> Result<(), Error> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(Error::ProtocolViolation {
            id: None,
            reason: format!("invalid message id {id}"),
        })
    }
}

fn parse_object(line: &str) -> Result<Map<String, Value>, Error> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(Error::MalformedMessage(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(Error::MalformedMessage(e.to_string())),
    }
}

fn method_name(object: &Map<String, Value>, id: Option<&Id>) -> Result<Method, Error> {
    let name = object
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedMessage("method must be a string".into()))?;
    decode_method(name).map_err(|e| Error::ProtocolViolation {
        id: id.cloned(),
        reason: e.to_string(),
    })
}

fn params_array(object: &mut Map<String, Value>, id: Option<&Id>) -> Result<Vec<Value>, Error> {
    match object.remove("params") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(params)) => Ok(params),
        Some(_) => Err(Error::ProtocolViolation {
            id: id.cloned(),
            reason: "params must be an array".into(),
        }),
    }
}

fn valid_id(object: &Map<String, Value>) -> Result<Id, Error> {
    let id = Id::from_value(object.get("id").unwrap_or(&Value::Null))?;
    if id.is_valid() {
        Ok(id)
    } else {
        Err(Error::InvalidField(format!("invalid message id {id}")))
    }
}

impl Request {
    pub fn new(id: Id, method: Method, params: Vec<Value>) -> Self {
        Self { id, method, params }
    }

    pub fn marshal(&self) -> Result<String, Error> {
        check_id(&self.id)?;
        to_line(&RequestWire {
            id: &self.id,
            method: wire_method(self.method, Some(&self.id))?,
            params: &self.params,
        })
    }

    pub fn unmarshal(line: &str) -> Result<Self, Error> {
        Self::from_object(parse_object(line)?)
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, Error> {
        let id = valid_id(&object)?;
        let method = method_name(&object, Some(&id))?;
        let params = params_array(&mut object, Some(&id))?;
        Ok(Self { id, method, params })
    }
}

impl Notification {
    pub fn new(method: Method, params: Vec<Value>) -> Self {
        Self { method, params }
    }

    pub fn marshal(&self) -> Result<String, Error> {
        to_line(&NotificationWire {
            method: wire_method(self.method, None)?,
            params: &self.params,
        })
    }

    pub fn unmarshal(line: &str) -> Result<Self, Error> {
        Self::from_object(parse_object(line)?)
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, Error> {
        let method = method_name(&object, None)?;
        let params = params_array(&mut object, None)?;
        Ok(Self { method, params })
    }
}

impl Response {
    /// A successful response.
    pub fn new(id: Id, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// A boolean result, used to answer authorize and submit.
    pub fn boolean(id: Id, accepted: bool) -> Self {
        Self::new(id, Value::Bool(accepted))
    }

    /// A rejection with a null result and an error object.
    pub fn error(id: Id, error: ResponseError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error),
        }
    }

    /// A boolean-false result carrying the reason, used to reject shares
    /// and authorizations.
    pub fn reject(id: Id, error: ResponseError) -> Self {
        Self {
            id,
            result: Value::Bool(false),
            error: Some(error),
        }
    }

    /// Read a boolean result, type-checked.
    pub fn read_boolean(&self) -> Result<bool, Error> {
        self.result
            .as_bool()
            .ok_or_else(|| Error::InvalidFormat(format!("expected a boolean result, got {}", self.result)))
    }

    pub fn marshal(&self) -> Result<String, Error> {
        check_id(&self.id)?;
        to_line(&ResponseWire {
            id: &self.id,
            result: &self.result,
            error: &self.error,
        })
    }

    pub fn unmarshal(line: &str) -> Result<Self, Error> {
        Self::from_object(parse_object(line)?)
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, Error> {
        let id = valid_id(&object)?;
        let error = ResponseError::from_value(object.get("error").unwrap_or(&Value::Null))?;
        let result = object.remove("result").unwrap_or(Value::Null);
        Ok(Self { id, result, error })
    }
}

impl Message {
    /// Classify and decode one line.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let object = parse_object(line)?;
        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        if object.contains_key("method") {
            if has_id {
                Request::from_object(object).map(Message::Request)
            } else {
                Notification::from_object(object).map(Message::Notification)
            }
        } else if object.contains_key("result") || object.contains_key("error") {
            Response::from_object(object).map(Message::Response)
        } else {
            Err(Error::MalformedMessage(
                "object is neither a request, a notification nor a response".into(),
            ))
        }
    }

    pub fn marshal(&self) -> Result<String, Error> {
        match self {
            Self::Request(request) => request.marshal(),
            Self::Notification(notification) => notification.marshal(),
            Self::Response(response) => response.marshal(),
        }
    }
}

/// Fail with `InvalidFormat` unless `params` holds between `min` and `max` elements.
pub(crate) fn check_arity(params: &[Value], min: usize, max: usize, method: Method) -> Result<(), Error> {
    if params.len() < min || params.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(Error::InvalidFormat(format!(
            "{method} expects {expected} params, got {}",
            params.len()
        )));
    }
    Ok(())
}

/// Positional string param.
pub(crate) fn str_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, Error> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidFormat(format!("{name} must be a string")))
}
