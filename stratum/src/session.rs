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

use crate::messages::field::encode_id;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Use 4 byte extranonce1, the session id itself
pub const EXTRANONCE1_SIZE: usize = 4;
/// Default extranonce2 size handed to miners
pub const EXTRANONCE2_SIZE: u32 = 8;

/// Session identifier, also used as the session's extranonce1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u32);

/// Delegate to u32's lower hex
impl fmt::LowerHex for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// State of one miner session.
///
/// Sessions are owned by the session registry. Everything else works on
/// copies taken through registry operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    /// User agent sent with mining.subscribe
    pub user_agent: String,
    /// Worker name, set once the session authorizes
    pub name: Option<String>,
    pub extranonce2_size: u32,
    /// Version rolling mask, when negotiated
    pub version_mask: Option<u32>,
    pub authorized: bool,
    pub current_difficulty: f64,
    pub last_activity: SystemTime,
}

impl Session {
    pub fn new(
        id: SessionId,
        user_agent: String,
        extranonce2_size: u32,
        start_difficulty: f64,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            user_agent,
            name: None,
            extranonce2_size,
            version_mask: None,
            authorized: false,
            current_difficulty: start_difficulty,
            last_activity: now,
        }
    }

    /// Raw extranonce1 bytes placed in the coinbase.
    pub fn extranonce1(&self) -> [u8; EXTRANONCE1_SIZE] {
        self.id.0.to_be_bytes()
    }

    /// Extranonce1 in its wire form.
    pub fn enonce1_hex(&self) -> String {
        encode_id(self.id)
    }

    /// Time since the last message. A clock that went backwards counts as no idle time.
    pub fn idle_for(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_activity).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let now = SystemTime::now();
        let session = Session::new(SessionId(0x0102abcd), "cgminer".into(), 8, 16.0, now);

        assert_eq!(session.enonce1_hex(), "0102abcd");
        assert_eq!(session.extranonce1(), [0x01, 0x02, 0xab, 0xcd]);
        assert_eq!(session.id.to_string(), "0102abcd");
        assert_eq!(session.current_difficulty, 16.0);
        assert!(!session.authorized);
        assert!(session.name.is_none());
        assert!(session.version_mask.is_none());
    }

    #[test]
    fn test_idle_for() {
        let now = SystemTime::now();
        let session = Session::new(SessionId(1), "cgminer".into(), 8, 1.0, now);
        assert_eq!(
            session.idle_for(now + Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            session.idle_for(now - Duration::from_secs(30)),
            Duration::ZERO
        );
    }
}
