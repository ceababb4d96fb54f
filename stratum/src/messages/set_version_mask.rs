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

use super::field::{decode_le, encode_le};
use super::{Method, Notification, check_arity, str_param};
use crate::error::Error;
use serde_json::json;

/// Params of a `mining.set_version_mask` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetVersionMaskParams {
    pub mask: u32,
}

impl SetVersionMaskParams {
    pub fn read(notification: &Notification) -> Result<Self, Error> {
        check_arity(&notification.params, 1, 1, Method::SetVersionMask)?;
        let mask = decode_le(str_param(&notification.params, 0, "version mask")?)?;
        Ok(Self { mask })
    }
}

/// Build a `mining.set_version_mask` notification.
pub fn set_version_mask(mask: u32) -> Notification {
    Notification::new(Method::SetVersionMask, vec![json!(encode_le(mask))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mask_round_trip() {
        let notification = set_version_mask(0x1fffe000);
        assert_eq!(
            notification.marshal().unwrap(),
            r#"{"method":"mining.set_version_mask","params":["00e0ff1f"]}"#
        );
        assert_eq!(
            SetVersionMaskParams::read(&notification).unwrap().mask,
            0x1fffe000
        );
    }

    #[test]
    fn test_version_mask_width() {
        let notification = Notification::new(Method::SetVersionMask, vec![json!("e0ff1f")]);
        assert!(matches!(
            SetVersionMaskParams::read(&notification),
            Err(Error::InvalidField(_))
        ));
        let notification = Notification::new(Method::SetVersionMask, vec![]);
        assert!(matches!(
            SetVersionMaskParams::read(&notification),
            Err(Error::InvalidFormat(_))
        ));
    }
}
