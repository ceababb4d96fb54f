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

//! Fixed-width hex encodings of integers and session identifiers.

use crate::error::Error;
use crate::session::SessionId;

/// Number of hex characters in an encoded u32.
const U32_HEX_LEN: usize = 8;

/// Encode a u32 as 8 hex characters, big-endian byte order.
pub fn encode_be(value: u32) -> String {
    hex::encode(value.to_be_bytes())
}

/// Decode 8 hex characters as a big-endian u32.
pub fn decode_be(s: &str) -> Result<u32, Error> {
    Ok(u32::from_be_bytes(decode_word(s)?))
}

/// Encode a u32 as 8 hex characters, little-endian byte order.
pub fn encode_le(value: u32) -> String {
    hex::encode(value.to_le_bytes())
}

/// Decode 8 hex characters as a little-endian u32.
pub fn decode_le(s: &str) -> Result<u32, Error> {
    Ok(u32::from_le_bytes(decode_word(s)?))
}

/// Encode a session id as its fixed-width wire form.
pub fn encode_id(id: SessionId) -> String {
    encode_be(id.0)
}

/// Decode the fixed-width wire form of a session id.
pub fn decode_id(s: &str) -> Result<SessionId, Error> {
    decode_be(s)
        .map(SessionId)
        .map_err(|e| Error::InvalidField(format!("session id: {e}")))
}

fn decode_word(s: &str) -> Result<[u8; 4], Error> {
    if s.len() != U32_HEX_LEN {
        return Err(Error::InvalidField(format!(
            "expected {U32_HEX_LEN} hex characters, got {}",
            s.len()
        )));
    }
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(s, &mut bytes)
        .map_err(|e| Error::InvalidField(format!("{s:?} is not hex: {e}")))?;
    Ok(bytes)
}

/// Decode a hex string of any even length.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, Error> {
    hex::decode(s).map_err(|e| Error::InvalidField(format!("{s:?} is not hex: {e}")))
}

/// Decode a hex string that must hold exactly `N` bytes.
///
/// A string that is valid hex of the wrong length is an `InvalidFormat`
/// error, the same as a wrongly shaped params array.
pub fn decode_bytes<const N: usize>(s: &str) -> Result<[u8; N], Error> {
    let bytes = decode_hex(s)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::InvalidFormat(format!("expected {N} bytes, got {}", bytes.len()))
    })
}
