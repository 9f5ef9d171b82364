// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Neural-network activations and losses. The compositions here (leaky
//! relu, hard sigmoid, the probability-space cross-entropy paths) mirror
//! the original adapter; the logits paths delegate to engine primitives.

use crate::engine::{BinaryOp, ReduceOp, UnaryOp};
use crate::error::Result;
use crate::ops::normalize_axis;
use crate::tensor::GraphTensor;
use crate::{config, ops};

/// ReLU with an optional slope for the negative section and an optional
/// saturation ceiling.
pub fn relu(x: &GraphTensor, alpha: f64, max_value: Option<f64>) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let dtype = x.dtype()?;
    let negated = engine.unary(UnaryOp::Neg, x.node())?;
    let negative_part = engine.unary(UnaryOp::Relu, negated)?;
    let mut out = engine.unary(UnaryOp::Relu, x.node())?;
    if let Some(ceiling) = max_value {
        out = engine.clip(out, 0.0, ceiling)?;
    }
    let slope = engine.scalar(alpha, dtype)?;
    let scaled = engine.binary(BinaryOp::Mul, slope, negative_part)?;
    let node = engine.binary(BinaryOp::Sub, out, scaled)?;
    Ok(GraphTensor::new(engine, node))
}

pub fn softmax(x: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().unary(UnaryOp::Softmax, x.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

pub fn softplus(x: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().unary(UnaryOp::Softplus, x.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

pub fn sigmoid(x: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().unary(UnaryOp::Sigmoid, x.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Piecewise-linear sigmoid approximation: `clip(0.2 * x + 0.5, 0, 1)`.
pub fn hard_sigmoid(x: &GraphTensor) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let dtype = x.dtype()?;
    let slope = engine.scalar(0.2, dtype)?;
    let offset = engine.scalar(0.5, dtype)?;
    let scaled = engine.binary(BinaryOp::Mul, x.node(), slope)?;
    let shifted = engine.binary(BinaryOp::Add, scaled, offset)?;
    let node = engine.clip(shifted, 0.0, 1.0)?;
    Ok(GraphTensor::new(engine, node))
}

pub fn tanh(x: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().unary(UnaryOp::Tanh, x.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Categorical cross-entropy over the last axis.
///
/// The engine's fused primitive expects logits; when given probabilities the
/// adapter renormalizes, epsilon-clips and computes
/// `-sum(target * log(output))` by hand, as the original does.
pub fn categorical_crossentropy(
    output: &GraphTensor,
    target: &GraphTensor,
    from_logits: bool,
) -> Result<GraphTensor> {
    let engine = output.engine().clone();
    if from_logits {
        let node = engine.softmax_cross_entropy_with_logits(output.node(), target.node())?;
        return Ok(GraphTensor::new(engine, node));
    }
    let last = normalize_axis(-1, output.ndim()?)?;
    // Scale predictions so the class probabilities of each sample sum to 1.
    let totals = engine.reduce(ReduceOp::Sum, output.node(), Some(last), true)?;
    let scaled = engine.binary(BinaryOp::Div, output.node(), totals)?;
    let eps = config::epsilon();
    let clipped = engine.clip(scaled, eps, 1.0 - eps)?;
    let log_probs = engine.unary(UnaryOp::Log, clipped)?;
    let weighted = engine.binary(BinaryOp::Mul, target.node(), log_probs)?;
    let summed = engine.reduce(ReduceOp::Sum, weighted, Some(last), false)?;
    let node = engine.unary(UnaryOp::Neg, summed)?;
    Ok(GraphTensor::new(engine, node))
}

/// Binary cross-entropy. Probability inputs are clipped and transformed back
/// to logits before the fused engine primitive runs.
pub fn binary_crossentropy(
    output: &GraphTensor,
    target: &GraphTensor,
    from_logits: bool,
) -> Result<GraphTensor> {
    let engine = output.engine().clone();
    let mut logits = output.node();
    if !from_logits {
        let eps = config::epsilon();
        let clipped = engine.clip(logits, eps, 1.0 - eps)?;
        let one = engine.scalar(1.0, output.dtype()?)?;
        let complement = engine.binary(BinaryOp::Sub, one, clipped)?;
        let odds = engine.binary(BinaryOp::Div, clipped, complement)?;
        logits = engine.unary(UnaryOp::Log, odds)?;
    }
    let node = engine.sigmoid_cross_entropy_with_logits(logits, target.node())?;
    Ok(GraphTensor::new(engine, node))
}

/// Randomly zero a `level` fraction of the input, scaling the survivors.
/// A missing seed is drawn locally so repeated calls diverge.
pub fn dropout(x: &GraphTensor, level: f64, seed: Option<u64>) -> Result<GraphTensor> {
    let retain_prob = 1.0 - level;
    let seed = seed.unwrap_or_else(ops::random::draw_seed);
    let node = x.engine().dropout(x.node(), retain_prob, seed)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// L2-normalize along `axis`, wrapped against the rank.
pub fn l2_normalize(x: &GraphTensor, axis: isize) -> Result<GraphTensor> {
    let axis = normalize_axis(axis, x.ndim()?)?;
    let node = x.engine().l2_normalize(x.node(), axis)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    #[test]
    fn drawn_seeds_stay_in_the_original_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let seed: u64 = rng.gen_range(0..10_000_000);
            assert!(seed < 10_000_000);
        }
    }
}
