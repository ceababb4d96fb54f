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

//! Arithmetic for share-rate based difficulty retargeting.

use std::time::Duration;

/// Floor for the mean interval, in seconds, so a burst of shares with equal
/// timestamps can't divide by zero.
const MIN_MEAN_INTERVAL: f64 = 0.001;

/// Mean of the observed share intervals in seconds.
pub(crate) fn mean_interval(intervals: &[Duration]) -> f64 {
    if intervals.is_empty() {
        return MIN_MEAN_INTERVAL;
    }
    let total: f64 = intervals.iter().map(Duration::as_secs_f64).sum();
    (total / intervals.len() as f64).max(MIN_MEAN_INTERVAL)
}

/// Scale difficulty so shares arrive once per target interval.
///
/// Shares arriving faster than the target raise the difficulty
/// proportionally, slower shares lower it.
pub(crate) fn retarget(old_difficulty: f64, mean_interval: f64, target_interval: f64) -> f64 {
    old_difficulty * (target_interval / mean_interval)
}

/// Clamp to the pool's difficulty range.
pub(crate) fn apply_difficulty_constraints(difficulty: f64, minimum: f64, maximum: f64) -> f64 {
    difficulty.clamp(minimum, maximum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_interval() {
        let intervals = [Duration::from_secs(2), Duration::from_secs(4)];
        assert_eq!(mean_interval(&intervals), 3.0);
    }

    #[test]
    fn test_mean_interval_floor() {
        assert_eq!(mean_interval(&[]), MIN_MEAN_INTERVAL);
        assert_eq!(mean_interval(&[Duration::ZERO; 4]), MIN_MEAN_INTERVAL);
    }

    #[test]
    fn test_retarget() {
        assert_eq!(retarget(100.0, 10.0, 10.0), 100.0);
        assert_eq!(retarget(100.0, 5.0, 10.0), 200.0);
        assert_eq!(retarget(100.0, 20.0, 10.0), 50.0);
    }

    #[test]
    fn test_apply_difficulty_constraints() {
        assert_eq!(apply_difficulty_constraints(5.0, 1.0, 10.0), 5.0);
        assert_eq!(apply_difficulty_constraints(0.5, 1.0, 10.0), 1.0);
        assert_eq!(apply_difficulty_constraints(50.0, 1.0, 10.0), 10.0);
    }
}
