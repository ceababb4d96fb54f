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

//! Stratum V1 protocol codec and the pool-side engine built on it.
//!
//! The `messages` module holds the wire codec. Sessions, jobs, difficulty
//! and share validation are coordinated by the remaining modules and tied
//! to TCP connections by `server`.

pub mod config;
pub mod difficulty_adjuster;
pub mod emission;
pub mod error;
pub mod logging;
pub mod message_handlers;
pub mod messages;
pub mod server;
pub mod session;
pub mod session_registry;
pub mod session_timeout;
pub mod share_validator;
pub mod utils;
pub mod work;
