// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The operation catalogue: one thin wrapper per engine-facing operation.
//! Argument transformation (axis wraparound, layout permutation, enum
//! validation) happens here; all numeric semantics live in the engine.

pub mod conv;
pub mod elementwise;
pub mod linalg;
pub mod nn;
pub mod random;
pub mod reductions;
pub mod shape;
pub mod variables;

use crate::error::{Error, Result};

/// Map a negative axis onto `0..rank` by Euclidean remainder, the wraparound
/// callers of the original API rely on. Positive axes past the rank are not
/// wrapped; they are rejected here rather than forwarded to the engine.
pub(crate) fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    if rank == 0 || axis >= rank as isize {
        return Err(Error::AxisOutOfRange { axis, rank });
    }
    Ok(axis.rem_euclid(rank as isize) as usize)
}

/// Axis wraparound for insert positions, where `rank` itself is legal
/// (an `expand_dims` at `-1` lands after the last dimension).
pub(crate) fn normalize_insert_axis(axis: isize, rank: usize) -> Result<usize> {
    normalize_axis(axis, rank + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_axes_wrap_like_python() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(-3, 3).unwrap(), 0);
        assert_eq!(normalize_axis(1, 3).unwrap(), 1);
    }

    #[test]
    fn positive_axes_past_the_rank_are_rejected() {
        assert!(matches!(
            normalize_axis(3, 3),
            Err(Error::AxisOutOfRange { axis: 3, rank: 3 })
        ));
        assert!(matches!(
            normalize_axis(5, 3),
            Err(Error::AxisOutOfRange { .. })
        ));
    }

    #[test]
    fn rank_zero_axis_is_rejected() {
        assert!(matches!(
            normalize_axis(0, 0),
            Err(Error::AxisOutOfRange { .. })
        ));
    }

    #[test]
    fn insert_axis_allows_one_past_the_end() {
        assert_eq!(normalize_insert_axis(-1, 2).unwrap(), 2);
        assert_eq!(normalize_insert_axis(0, 2).unwrap(), 0);
        assert_eq!(normalize_insert_axis(-3, 2).unwrap(), 0);
    }
}
