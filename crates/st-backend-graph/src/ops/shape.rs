// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Shape manipulation wrappers. Purely structural; the engine moves the data.

use crate::error::{Error, Result};
use crate::ops::conv::DimOrdering;
use crate::ops::{normalize_axis, normalize_insert_axis};
use crate::tensor::GraphTensor;

/// Concatenate along `axis`, wrapped against the first operand's rank.
pub fn concatenate(tensors: &[GraphTensor], axis: isize) -> Result<GraphTensor> {
    let first = tensors.first().ok_or(Error::EmptyInput("concatenate"))?;
    let axis = normalize_axis(axis, first.ndim()?)?;
    let nodes: Vec<_> = tensors.iter().map(|t| t.node()).collect();
    let node = first.engine().concat(&nodes, axis)?;
    Ok(GraphTensor::new(first.engine().clone(), node))
}

pub fn reshape(x: &GraphTensor, shape: &[isize]) -> Result<GraphTensor> {
    let node = x.engine().reshape(x.node(), shape)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Transpose dimensions. `pattern` is a permutation of the dimension
/// indices, e.g. `[0, 2, 1]`.
pub fn permute_dimensions(x: &GraphTensor, pattern: &[usize]) -> Result<GraphTensor> {
    let node = x.engine().permute(x.node(), pattern)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Resize the images in a 4-D tensor by integer factors, nearest-neighbor.
/// The engine primitive is channel-last; channel-first input is permuted
/// around the call.
pub fn resize_images(
    x: &GraphTensor,
    height_factor: usize,
    width_factor: usize,
    dim_ordering: DimOrdering,
) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let shape = x.shape()?;
    let static_dim = |i: usize| -> Result<usize> {
        shape
            .get(i)
            .copied()
            .flatten()
            .ok_or(Error::SymbolicDim {
                op: "resize_images",
                dim: i,
            })
    };
    match dim_ordering {
        DimOrdering::ChannelFirst => {
            let new_height = static_dim(2)? * height_factor;
            let new_width = static_dim(3)? * width_factor;
            let nhwc = engine.permute(x.node(), &[0, 2, 3, 1])?;
            let resized = engine.resize_nearest(nhwc, new_height, new_width)?;
            let node = engine.permute(resized, &[0, 3, 1, 2])?;
            Ok(GraphTensor::new(engine, node))
        }
        DimOrdering::ChannelLast => {
            let new_height = static_dim(1)? * height_factor;
            let new_width = static_dim(2)? * width_factor;
            let node = engine.resize_nearest(x.node(), new_height, new_width)?;
            Ok(GraphTensor::new(engine, node))
        }
    }
}

/// Repeat the elements of a tensor along an axis, like `np.repeat`: shape
/// `(s1, s2, s3)` with `axis=1` becomes `(s1, s2 * rep, s3)`. Lowered as
/// unit-width splits replicated in place and concatenated back.
pub fn repeat_elements(x: &GraphTensor, rep: usize, axis: isize) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let axis = normalize_axis(axis, x.ndim()?)?;
    let width = x.shape()?[axis].ok_or(Error::SymbolicDim {
        op: "repeat_elements",
        dim: axis,
    })?;
    let splits = engine.split(x.node(), axis, width)?;
    let mut repeated = Vec::with_capacity(width * rep);
    for slice in splits {
        for _ in 0..rep {
            repeated.push(slice);
        }
    }
    let node = engine.concat(&repeated, axis)?;
    Ok(GraphTensor::new(engine, node))
}

/// Repeat a 2-D tensor: shape `(samples, dim)` with `n = 2` becomes
/// `(samples, 2, dim)`.
pub fn repeat(x: &GraphTensor, n: usize) -> Result<GraphTensor> {
    let engine = x.engine().clone();
    let copies = vec![x.node(); n];
    let stacked = engine.stack(&copies)?;
    let node = engine.permute(stacked, &[1, 0, 2])?;
    Ok(GraphTensor::new(engine, node))
}

pub fn tile(x: &GraphTensor, multiples: &[usize]) -> Result<GraphTensor> {
    let node = x.engine().tile(x.node(), multiples)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Collapse to a single dimension.
pub fn flatten(x: &GraphTensor) -> Result<GraphTensor> {
    reshape(x, &[-1])
}

/// Turn an n-D tensor into a 2-D tensor conserving the first dimension.
/// The trailing dimensions must be static.
pub fn batch_flatten(x: &GraphTensor) -> Result<GraphTensor> {
    let shape = x.shape()?;
    let mut trailing = 1usize;
    for (i, d) in shape.iter().copied().enumerate().skip(1) {
        trailing *= d.ok_or(Error::SymbolicDim {
            op: "batch_flatten",
            dim: i,
        })?;
    }
    reshape(x, &[-1, trailing as isize])
}

/// Add a 1-sized dimension at index `dim`.
pub fn expand_dims(x: &GraphTensor, dim: isize) -> Result<GraphTensor> {
    let axis = normalize_insert_axis(dim, x.ndim()?)?;
    let node = x.engine().expand_dims(x.node(), axis)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Remove a 1-sized dimension at index `axis`.
pub fn squeeze(x: &GraphTensor, axis: isize) -> Result<GraphTensor> {
    let axis = normalize_axis(axis, x.ndim()?)?;
    let node = x.engine().squeeze(x.node(), axis)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Pad the middle dimension of a 3-D tensor with `padding` zeros left and
/// right.
pub fn temporal_padding(x: &GraphTensor, padding: usize) -> Result<GraphTensor> {
    let node = x
        .engine()
        .pad(x.node(), &[(0, 0), (padding, padding), (0, 0)])?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}

/// Pad the two spatial dimensions of a 4-D tensor with zeros; which
/// dimensions are spatial depends on the channel ordering.
pub fn spatial_2d_padding(
    x: &GraphTensor,
    padding: (usize, usize),
    dim_ordering: DimOrdering,
) -> Result<GraphTensor> {
    let (ph, pw) = padding;
    let pattern: [(usize, usize); 4] = match dim_ordering {
        DimOrdering::ChannelFirst => [(0, 0), (0, 0), (ph, ph), (pw, pw)],
        DimOrdering::ChannelLast => [(0, 0), (ph, ph), (pw, pw), (0, 0)],
    };
    let node = x.engine().pad(x.node(), &pattern)?;
    Ok(GraphTensor::new(x.engine().clone(), node))
}
