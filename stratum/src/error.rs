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

use crate::messages::Id;
use thiserror::Error;

/// Stratum error code for rejections with no more specific code.
pub const CODE_OTHER: i32 = 20;
/// Stratum error code for a share referencing an unknown or retired job.
pub const CODE_JOB_NOT_FOUND: i32 = 21;
/// Stratum error code for a share already submitted by the session.
pub const CODE_DUPLICATE_SHARE: i32 = 22;
/// Stratum error code for a share whose hash misses the session target.
pub const CODE_LOW_DIFFICULTY: i32 = 23;
/// Stratum error code for requests from a session that has not authorized.
pub const CODE_UNAUTHORIZED: i32 = 24;
/// Stratum error code for requests from a session that has not subscribed.
pub const CODE_NOT_SUBSCRIBED: i32 = 25;

/// Error types for the Stratum codec and engine.
///
/// Per-message errors are handled inside the connection task that produced
/// them and never terminate the connection on their own.
#[derive(Debug, Error)]
pub enum Error {
    /// Line is not JSON or not a JSON object of any known message shape.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    /// Wrong params arity or wrong JSON type for a positional param.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// A field has the right shape but an invalid value.
    #[error("Invalid field: {0}")]
    InvalidField(String),
    /// Method string not in the registry, or the unset tag.
    #[error("Invalid stratum method: {0}")]
    InvalidMethod(String),
    /// Envelope rules broken. Carries the message id when one was recoverable.
    #[error("Protocol violation: {reason}")]
    ProtocolViolation { id: Option<Id>, reason: String },
    #[error("Unauthorized worker")]
    Unauthorized,
    #[error("Not subscribed")]
    NotSubscribed,
    #[error("Job not found")]
    UnknownJob,
    #[error("Duplicate share")]
    DuplicateShare,
    /// No validation worker became free before the submission timeout.
    #[error("Validation pool busy")]
    PoolBusy,
    #[error("Session ids exhausted")]
    SessionIdsExhausted,
    #[error("Session timed out")]
    TimeoutError,
    /// The block template source failed or returned unusable data.
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// The Stratum error code sent to the miner for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownJob => CODE_JOB_NOT_FOUND,
            Self::DuplicateShare => CODE_DUPLICATE_SHARE,
            Self::Unauthorized => CODE_UNAUTHORIZED,
            Self::NotSubscribed => CODE_NOT_SUBSCRIBED,
            _ => CODE_OTHER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::UnknownJob.code(), 21);
        assert_eq!(Error::DuplicateShare.code(), 22);
        assert_eq!(Error::Unauthorized.code(), 24);
        assert_eq!(Error::NotSubscribed.code(), 25);
        assert_eq!(Error::InvalidFormat("arity".into()).code(), 20);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::InvalidMethod("mining.bogus".into()).to_string(),
            "Invalid stratum method: mining.bogus"
        );
        let err = Error::ProtocolViolation {
            id: Some(Id::Number(4)),
            reason: "unknown method".into(),
        };
        assert_eq!(err.to_string(), "Protocol violation: unknown method");
    }
}
