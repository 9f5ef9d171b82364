// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::Result;
use crate::tensor::GraphTensor;

/// Matrix product, delegated whole to the engine.
pub fn dot(x: &GraphTensor, y: &GraphTensor) -> Result<GraphTensor> {
    let node = x.engine().matmul(x.node(), y.node())?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Reverse every axis, the default transpose of the original API.
pub fn transpose(x: &GraphTensor) -> Result<GraphTensor> {
    let rank = x.ndim()?;
    let pattern: Vec<usize> = (0..rank).rev().collect();
    let node = x.engine().permute(x.node(), &pattern)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Select rows of `reference` along its leading axis by integer `indices`.
pub fn gather(reference: &GraphTensor, indices: &GraphTensor) -> Result<GraphTensor> {
    let node = reference.engine().gather(reference.node(), indices.node())?;
    Ok(GraphTensor::new(reference.engine().clone(), node))
}
