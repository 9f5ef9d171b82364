// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::engine::{BinaryOp, UnaryOp};
use crate::error::Result;
use crate::tensor::GraphTensor;

fn unary(op: UnaryOp, x: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().unary(op, x.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

fn binary(op: BinaryOp, x: &GraphTensor, y: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().binary(op, x.node(), y.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

pub fn square(x: &GraphTensor) -> Result<GraphTensor> {
    unary(UnaryOp::Square, x)
}

pub fn abs(x: &GraphTensor) -> Result<GraphTensor> {
    unary(UnaryOp::Abs, x)
}

/// Square root with negatives clamped to zero first, so the engine never
/// sees a negative radicand.
pub fn sqrt(x: &GraphTensor) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let clipped = engine.clip(x.node(), 0.0, f64::INFINITY)?;
    let node = engine.unary(UnaryOp::Sqrt, clipped)?;
    Ok(GraphTensor::new(engine, node))
}

pub fn exp(x: &GraphTensor) -> Result<GraphTensor> {
    unary(UnaryOp::Exp, x)
}

pub fn log(x: &GraphTensor) -> Result<GraphTensor> {
    unary(UnaryOp::Log, x)
}

pub fn round(x: &GraphTensor) -> Result<GraphTensor> {
    unary(UnaryOp::Round, x)
}

/// Elementwise power with a scalar exponent, lifted into the graph.
pub fn pow(x: &GraphTensor, a: f64) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let exponent = engine.scalar(a, x.dtype()?)?;
    let node = engine.binary(BinaryOp::Pow, x.node(), exponent)?;
    Ok(GraphTensor::new(engine, node))
}

/// Clip to `[min_value, max_value]`. A max below min is raised to min, the
/// original's quiet correction.
pub fn clip(x: &GraphTensor, min_value: f64, max_value: f64) -> Result<GraphTensor> {
    let max_value = if max_value < min_value {
        min_value
    } else {
        max_value
    };
    let node = x.engine().clip(x.node(), min_value, max_value)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

pub fn equal(x: &GraphTensor, y: &GraphTensor) -> Result<GraphTensor> {
    binary(BinaryOp::Equal, x, y)
}

pub fn maximum(x: &GraphTensor, y: &GraphTensor) -> Result<GraphTensor> {
    binary(BinaryOp::Maximum, x, y)
}

pub fn minimum(x: &GraphTensor, y: &GraphTensor) -> Result<GraphTensor> {
    binary(BinaryOp::Minimum, x, y)
}
