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

//! Jobs, their bookkeeping and share reconstruction.

pub mod job;
pub mod notify;
pub mod template;
pub mod tracker;
pub mod validate;

/// Convert between block hash byte order and the order miners expect.
///
/// Stratum sends the previous block hash as the display-order bytes with
/// the order of its 4-byte words reversed. The conversion is its own inverse.
pub fn reverse_four_byte_chunks(bytes: &[u8; 32]) -> [u8; 32] {
    let mut reversed = [0u8; 32];
    for (target, chunk) in reversed.chunks_mut(4).zip(bytes.chunks(4).rev()) {
        target.copy_from_slice(chunk);
    }
    reversed
}
