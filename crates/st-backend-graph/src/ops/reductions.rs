// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reductions. Every axis argument accepts Python-style negatives and is
//! wrapped against the operand's rank before dispatch.

use crate::config;
use crate::engine::{BinaryOp, DType, ReduceOp, ArgReduceOp, UnaryOp};
use crate::error::Result;
use crate::ops::normalize_axis;
use crate::tensor::GraphTensor;

fn reduce(
    op: ReduceOp,
    x: &GraphTensor,
    axis: Option<isize>,
    keepdims: bool,
) -> Result<GraphTensor> {
    let axis = match axis {
        Some(a) => Some(normalize_axis(a, x.ndim()?)?),
        None => None,
    };
    let node = x.engine().reduce(op, x.node(), axis, keepdims)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

pub fn max(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    reduce(ReduceOp::Max, x, axis, keepdims)
}

pub fn min(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    reduce(ReduceOp::Min, x, axis, keepdims)
}

/// Sum of the values in a tensor, alongside the specified axis.
pub fn sum(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    reduce(ReduceOp::Sum, x, axis, keepdims)
}

/// Multiply the values in a tensor, alongside the specified axis.
pub fn prod(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    reduce(ReduceOp::Prod, x, axis, keepdims)
}

pub fn mean(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    let x = upcast_bool(x)?;
    reduce(ReduceOp::Mean, &x, axis, keepdims)
}

/// Standard deviation, composed from mean/square/sqrt the way the original
/// composes it rather than asking the engine for a variance primitive.
pub fn std(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    let x = upcast_bool(x)?;
    let engine = x.engine().clone();
    // The centering mean always keeps its axis so the subtraction broadcasts.
    let m = mean(&x, axis, true)?;
    let centered = engine.binary(BinaryOp::Sub, x.node(), m.node())?;
    let devs_squared = engine.unary(UnaryOp::Square, centered)?;
    let var = reduce(
        ReduceOp::Mean,
        &GraphTensor::new(engine.clone(), devs_squared),
        axis,
        keepdims,
    )?;
    let node = engine.unary(UnaryOp::Sqrt, var.node())?;
    Ok(GraphTensor::new(engine, node))
}

/// Bitwise reduction (logical OR). Returns 0/1 values of dtype i8.
pub fn any(x: &GraphTensor, axis: Option<isize>, keepdims: bool) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let as_bool = engine.cast(x.node(), DType::Bool)?;
    let reduced = reduce(
        ReduceOp::Any,
        &GraphTensor::new(engine.clone(), as_bool),
        axis,
        keepdims,
    )?;
    let node = engine.cast(reduced.node(), DType::I8)?;
    Ok(GraphTensor::new(engine, node))
}

pub fn argmax(x: &GraphTensor, axis: isize) -> Result<GraphTensor> {
    arg_reduce(ArgReduceOp::Max, x, axis)
}

pub fn argmin(x: &GraphTensor, axis: isize) -> Result<GraphTensor> {
    arg_reduce(ArgReduceOp::Min, x, axis)
}

fn arg_reduce(op: ArgReduceOp, x: &GraphTensor, axis: isize) -> Result<GraphTensor> {
    let axis = normalize_axis(axis, x.ndim()?)?;
    let node = x.engine().arg_reduce(op, x.node(), axis)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

fn upcast_bool(x: &GraphTensor) -> Result<GraphTensor> {
    if x.dtype()? == DType::Bool {
        let node = x.engine().cast(x.node(), config::floatx())?;
        Ok(GraphTensor::new(x.engine().clone(), node))
    } else {
        Ok(x.clone())
    }
}
