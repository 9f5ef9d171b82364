// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Random tensor constructors. Generation itself is the engine's; the
//! adapter only supplies a seed when the caller did not.

use rand::Rng;

use crate::config;
use crate::engine::{DType, Engine};
use crate::error::Result;
use crate::tensor::GraphTensor;

/// Seed range matches the original adapter's `randint(10e6)`.
pub(crate) fn draw_seed() -> u64 {
    rand::thread_rng().gen_range(0..10_000_000)
}

/// Gaussian random tensor node.
pub fn random_normal(
    engine: &Engine,
    shape: &[usize],
    mean: f64,
    std: f64,
    dtype: Option<DType>,
    seed: Option<u64>,
) -> Result<GraphTensor> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    let seed = seed.unwrap_or_else(draw_seed);
    let node = engine.random_normal(shape, mean, std, dtype, seed)?;
    Ok(GraphTensor::new(engine.clone(), node))
}

/// Uniform random tensor node on `[low, high)`.
pub fn random_uniform(
    engine: &Engine,
    shape: &[usize],
    low: f64,
    high: f64,
    dtype: Option<DType>,
    seed: Option<u64>,
) -> Result<GraphTensor> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    let seed = seed.unwrap_or_else(draw_seed);
    let node = engine.random_uniform(shape, low, high, dtype, seed)?;
    Ok(GraphTensor::new(engine.clone(), node))
}
