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

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Stratum methods known to the pool.
///
/// `Unset` is the zero tag and never valid on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Unset,
    Subscribe,
    Authorize,
    Submit,
    Notify,
    SetDifficulty,
    SetVersionMask,
}

const METHODS: [(Method, &str); 6] = [
    (Method::Subscribe, "mining.subscribe"),
    (Method::Authorize, "mining.authorize"),
    (Method::Submit, "mining.submit"),
    (Method::Notify, "mining.notify"),
    (Method::SetDifficulty, "mining.set_difficulty"),
    (Method::SetVersionMask, "mining.set_version_mask"),
];

/// Map a method tag to its wire string.
pub fn encode_method(method: Method) -> Result<&'static str, Error> {
    METHODS
        .iter()
        .find(|(tag, _)| *tag == method)
        .map(|(_, name)| *name)
        .ok_or_else(|| Error::InvalidMethod(format!("{method:?}")))
}

/// Map a wire string to its method tag. Unknown strings are an error.
pub fn decode_method(name: &str) -> Result<Method, Error> {
    METHODS
        .iter()
        .find(|(_, wire)| *wire == name)
        .map(|(tag, _)| *tag)
        .ok_or_else(|| Error::InvalidMethod(name.to_string()))
}

impl Method {
    /// True for methods a miner sends to the pool as requests.
    pub fn is_request(self) -> bool {
        matches!(self, Self::Subscribe | Self::Authorize | Self::Submit)
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_method(s)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match encode_method(*self) {
            Ok(name) => f.write_str(name),
            Err(_) => f.write_str("unset"),
        }
    }
}
