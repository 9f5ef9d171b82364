// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Result alias used throughout the adapter.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the adapter itself. Engine failures travel through
/// [`Error::Backend`] unmodified.
#[derive(Debug, Error)]
pub enum Error {
    /// A convolution or pooling call named a border mode outside "valid"/"same".
    #[error("invalid border mode '{0}' (expected \"valid\" or \"same\")")]
    UnknownBorderMode(String),
    /// A convolution or pooling call named a dim ordering outside "th"/"tf".
    #[error("unknown dim ordering '{0}' (expected \"th\" or \"tf\")")]
    UnknownDimOrdering(String),
    /// A pooling call named a pool mode outside "max"/"avg".
    #[error("invalid pooling mode '{0}' (expected \"max\" or \"avg\")")]
    UnknownPoolMode(String),
    /// A compiled function was invoked with the wrong number of inputs.
    #[error("compiled function declares {expected} inputs, received {got}")]
    ArityMismatch { expected: usize, got: usize },
    /// An axis argument fell outside the operand's rank even after wraparound.
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },
    /// An operation needed a static dimension that the graph only knows symbolically.
    #[error("{op} requires a static size for dimension {dim}")]
    SymbolicDim { op: &'static str, dim: usize },
    /// The recurrent driver's masking path is declared but not implemented.
    #[error("masking is not supported by the recurrent driver")]
    MaskingUnsupported,
    /// An operation that needs at least one operand received none.
    #[error("{0} received no operands")]
    EmptyInput(&'static str),
    /// The requested dtype is not legal in this position.
    #[error("dtype {0:?} is not a floating dtype")]
    NonFloatDType(crate::engine::DType),
    /// Failure reported by the external engine, propagated unmodified.
    #[error("backend: {0}")]
    Backend(String),
}

pub fn backend(msg: impl Into<String>) -> Error {
    Error::Backend(msg.into())
}
