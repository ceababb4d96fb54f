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

use super::{Method, Notification, check_arity};
use crate::error::Error;
use serde_json::json;

/// Largest integer an f64 holds exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Params of a `mining.set_difficulty` notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetDifficultyParams {
    pub difficulty: f64,
}

/// Difficulty must be a finite positive number.
pub fn valid_difficulty(difficulty: f64) -> bool {
    difficulty.is_finite() && difficulty > 0.0
}

impl SetDifficultyParams {
    pub fn read(notification: &Notification) -> Result<Self, Error> {
        check_arity(&notification.params, 1, 1, Method::SetDifficulty)?;
        let difficulty = notification.params[0]
            .as_f64()
            .ok_or_else(|| Error::InvalidFormat("difficulty must be a number".into()))?;
        if !valid_difficulty(difficulty) {
            return Err(Error::InvalidField(format!(
                "difficulty {difficulty} must be positive"
            )));
        }
        Ok(Self { difficulty })
    }
}

/// Build a `mining.set_difficulty` notification.
///
/// Whole difficulties go out as JSON integers, which every miner parses.
pub fn set_difficulty(difficulty: f64) -> Notification {
    let value = if difficulty.fract() == 0.0 && difficulty > 0.0 && difficulty <= MAX_EXACT_INTEGER {
        json!(difficulty as u64)
    } else {
        json!(difficulty)
    };
    Notification::new(Method::SetDifficulty, vec![value])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_difficulty_round_trip() {
        let notification = set_difficulty(1024.0);
        assert_eq!(
            notification.marshal().unwrap(),
            r#"{"method":"mining.set_difficulty","params":[1024]}"#
        );
        assert_eq!(
            SetDifficultyParams::read(&notification).unwrap().difficulty,
            1024.0
        );

        let notification = set_difficulty(0.5);
        assert_eq!(SetDifficultyParams::read(&notification).unwrap().difficulty, 0.5);
    }

    #[test]
    fn test_set_difficulty_rejects_non_positive() {
        for value in [json!(0), json!(-4), json!(-0.5)] {
            let notification = Notification::new(Method::SetDifficulty, vec![value]);
            assert!(matches!(
                SetDifficultyParams::read(&notification),
                Err(Error::InvalidField(_))
            ));
        }
    }

    #[test]
    fn test_set_difficulty_rejects_non_numeric() {
        let notification = Notification::new(Method::SetDifficulty, vec![json!("8")]);
        assert!(matches!(
            SetDifficultyParams::read(&notification),
            Err(Error::InvalidFormat(_))
        ));
        let notification = Notification::new(Method::SetDifficulty, vec![json!(1), json!(2)]);
        assert!(matches!(
            SetDifficultyParams::read(&notification),
            Err(Error::InvalidFormat(_))
        ));
    }
}
