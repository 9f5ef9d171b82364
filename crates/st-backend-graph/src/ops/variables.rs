// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Variable and placeholder construction, plus the handful of queries that
//! only touch graph metadata.

use crate::config;
use crate::engine::{DType, Engine, HostBuffer};
use crate::error::{Error, Result};
use crate::tensor::{GraphTensor, Variable};

/// Create a variable initialized to `value`, cast to `dtype` (the configured
/// floatx when `None`). The initializer runs eagerly.
pub fn variable(
    engine: &Engine,
    value: HostBuffer,
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<Variable> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    let node = engine.variable(value.cast(dtype), name)?;
    Ok(Variable::new(GraphTensor::new(engine.clone(), node)))
}

/// Named input slot. Either a full `shape` (entries of `None` are symbolic)
/// or a bare `ndim`, in which case every dimension is symbolic.
pub fn placeholder(
    engine: &Engine,
    shape: Option<&[Option<usize>]>,
    ndim: Option<usize>,
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<GraphTensor> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    let shape: Vec<Option<usize>> = match (shape, ndim) {
        (Some(s), _) => s.to_vec(),
        (None, Some(n)) => vec![None; n],
        (None, None) => Vec::new(),
    };
    let node = engine.placeholder(&shape, dtype, name)?;
    Ok(GraphTensor::new(engine.clone(), node))
}

/// All-zeros variable.
pub fn zeros(
    engine: &Engine,
    shape: &[usize],
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<Variable> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    variable(engine, HostBuffer::zeros(shape, dtype), Some(dtype), name)
}

/// All-ones variable.
pub fn ones(
    engine: &Engine,
    shape: &[usize],
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<Variable> {
    let dtype = dtype.unwrap_or_else(config::floatx);
    variable(engine, HostBuffer::ones(shape, dtype), Some(dtype), name)
}

/// Ones with the shape and dtype of `x`, built in the graph. Symbolic
/// dimensions of `x` are fine; the engine resolves them at run time.
pub fn ones_like(x: &GraphTensor) -> Result<GraphTensor> {
    fill_like(x, 1.0)
}

/// Zeros with the shape and dtype of `x`, built in the graph.
pub fn zeros_like(x: &GraphTensor) -> Result<GraphTensor> {
    fill_like(x, 0.0)
}

fn fill_like(x: &GraphTensor, value: f64) -> Result<GraphTensor> {
    let node = x.engine().fill_like(x.node(), value)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Number of scalar elements in `x`. Every dimension must be static.
pub fn count_params(x: &GraphTensor) -> Result<usize> {
    let shape = x.shape()?;
    let mut total = 1usize;
    for (i, d) in shape.iter().copied().enumerate() {
        total *= d.ok_or(Error::SymbolicDim {
            op: "count_params",
            dim: i,
        })?;
    }
    Ok(total)
}

/// Cast to `dtype` in the graph.
pub fn cast(x: &GraphTensor, dtype: DType) -> Result<GraphTensor> {
    let node = x.engine().cast(x.node(), dtype)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}
