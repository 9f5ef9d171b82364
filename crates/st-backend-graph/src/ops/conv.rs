// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! 2-D convolution and pooling with dual channel-ordering support.
//!
//! The engine's primitives are channel-last only. Channel-first callers get
//! their inputs and kernels permuted into channel-last layout before the
//! call and the result permuted back, so both conventions see one API:
//!
//! - channel-first input `(samples, channels, rows, cols)`,
//!   kernel `(out_channels, in_channels, rows, cols)`
//! - channel-last input `(samples, rows, cols, channels)`,
//!   kernel `(rows, cols, in_channels, out_channels)`

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config;
use crate::engine::{DType, Engine, NodeId, Padding, PoolKind};
use crate::error::{Error, Result};
use crate::tensor::GraphTensor;

/// Which dimension carries the channels of a rank-4 image tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimOrdering {
    /// "th": channels in dimension 1.
    ChannelFirst,
    /// "tf": channels in the last dimension, the engine's native layout.
    ChannelLast,
}

impl FromStr for DimOrdering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "th" => Ok(DimOrdering::ChannelFirst),
            "tf" => Ok(DimOrdering::ChannelLast),
            other => Err(Error::UnknownDimOrdering(other.to_string())),
        }
    }
}

/// 2-D convolution. `border_mode` and `dim_ordering` parse from the
/// original's string spellings via [`FromStr`]; unknown spellings are
/// rejected before anything reaches the engine.
pub fn conv2d(
    x: &GraphTensor,
    kernel: &GraphTensor,
    strides: (usize, usize),
    border_mode: Padding,
    dim_ordering: DimOrdering,
) -> Result<GraphTensor> {
    let engine = x.engine().clone();

    // The engine's conv only speaks f32; cast f64 graphs around the call.
    let downcast = config::floatx() == DType::F64;
    let (mut xn, mut kn) = (x.node(), kernel.node());
    if downcast {
        xn = engine.cast(xn, DType::F32)?;
        kn = engine.cast(kn, DType::F32)?;
    }

    let mut out = match dim_ordering {
        DimOrdering::ChannelFirst => {
            debug!(?strides, "conv2d: translating channel-first operands");
            let x_nhwc = engine.permute(xn, &[0, 2, 3, 1])?;
            let k_hwio = engine.permute(kn, &[2, 3, 1, 0])?;
            let y = engine.conv2d(x_nhwc, k_hwio, strides, border_mode)?;
            engine.permute(y, &[0, 3, 1, 2])?
        }
        DimOrdering::ChannelLast => engine.conv2d(xn, kn, strides, border_mode)?,
    };

    if downcast {
        out = engine.cast(out, DType::F64)?;
    }
    Ok(GraphTensor::new(engine, out))
}

/// 2-D pooling over the spatial dimensions.
pub fn pool2d(
    x: &GraphTensor,
    pool_size: (usize, usize),
    strides: (usize, usize),
    border_mode: Padding,
    dim_ordering: DimOrdering,
    pool_mode: PoolKind,
) -> Result<GraphTensor> {
    let engine = x.engine().clone();

    let downcast = config::floatx() == DType::F64;
    let mut xn = x.node();
    if downcast {
        xn = engine.cast(xn, DType::F32)?;
    }

    let pooled: NodeId = match dim_ordering {
        DimOrdering::ChannelFirst => {
            debug!(?pool_size, "pool2d: translating channel-first input");
            let x_nhwc = engine.permute(xn, &[0, 2, 3, 1])?;
            let y = pool_native(&engine, x_nhwc, pool_mode, pool_size, strides, border_mode)?;
            engine.permute(y, &[0, 3, 1, 2])?
        }
        DimOrdering::ChannelLast => {
            pool_native(&engine, xn, pool_mode, pool_size, strides, border_mode)?
        }
    };

    let out = if downcast {
        engine.cast(pooled, DType::F64)?
    } else {
        pooled
    };
    Ok(GraphTensor::new(engine, out))
}

fn pool_native(
    engine: &Engine,
    x: NodeId,
    kind: PoolKind,
    pool: (usize, usize),
    strides: (usize, usize),
    padding: Padding,
) -> Result<NodeId> {
    engine.pool2d(x, kind, pool, strides, padding)
}
