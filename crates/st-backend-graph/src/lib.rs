// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Backend adapter over an external graph-based tensor-computation engine.
//!
//! The crate translates a small, fixed vocabulary of tensor operations
//! (elementwise math, reductions, shape manipulation, convolutions, a
//! recurrent step driver, gradients, randomness) into calls against whatever
//! engine implements [`GraphEngine`], and manages the single process-wide
//! [`Session`](engine::Session) used to materialize results. Every
//! numerically significant operation is delegated to the engine; the logic
//! that lives here is limited to axis-normalization bookkeeping,
//! channel-order translation for 2-D convolution and pooling, the deferred
//! [`CompiledFunction`] binding, and the sequential recurrent-loop driver.

pub mod config;
pub mod engine;
pub mod error;
pub mod function;
pub mod ops;
pub mod rnn;
pub mod session;
pub mod tensor;
pub mod trace;

pub use engine::{
    ArgReduceOp, BinaryOp, DType, Engine, GraphEngine, HostBuffer, NodeId, Padding, PoolKind,
    ReduceOp, Session, UnaryOp,
};
pub use error::{Error, Result};
pub use function::{function, gradients, CompiledFunction};
pub use rnn::{rnn, switch};
pub use session::{eval, get_value, set_value};
pub use tensor::{GraphTensor, Variable};

pub use ops::conv::{conv2d, pool2d, DimOrdering};
pub use ops::elementwise::{
    abs, clip, equal, exp, log, maximum, minimum, pow, round, sqrt, square,
};
pub use ops::linalg::{dot, gather, transpose};
pub use ops::nn::{
    binary_crossentropy, categorical_crossentropy, dropout, hard_sigmoid, l2_normalize, relu,
    sigmoid, softmax, softplus, tanh,
};
pub use ops::random::{random_normal, random_uniform};
// `ops::reductions::std` stays un-reexported: an item named `std` at the
// crate root shadows the standard library for path resolution.
pub use ops::reductions::{any, argmax, argmin, max, mean, min, prod, sum};
pub use ops::shape::{
    batch_flatten, concatenate, expand_dims, flatten, permute_dimensions, repeat,
    repeat_elements, reshape, resize_images, spatial_2d_padding, squeeze, temporal_padding, tile,
};
pub use ops::variables::{
    cast, count_params, ones, ones_like, placeholder, variable, zeros, zeros_like,
};
