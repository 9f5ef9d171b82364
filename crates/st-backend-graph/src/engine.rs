// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The seam between the adapter and the external tensor engine.
//!
//! The engine owns the computation graph, all tensor data, automatic
//! differentiation and every numeric kernel. The adapter only forwards
//! instructions about opaque [`NodeId`] handles and moves concrete
//! [`HostBuffer`] values across the boundary when a [`Session`] materializes
//! results.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque handle to a node in the engine's graph. The adapter never owns the
/// data behind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Element types understood on both sides of the seam.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    I8,
    Bool,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

/// Concrete host-side value crossing the seam: placeholder feeds on the way
/// in, fetched results on the way out.
#[derive(Clone, Debug, PartialEq)]
pub enum HostBuffer {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    I8(ArrayD<i8>),
    Bool(ArrayD<bool>),
}

impl HostBuffer {
    pub fn dtype(&self) -> DType {
        match self {
            HostBuffer::F32(_) => DType::F32,
            HostBuffer::F64(_) => DType::F64,
            HostBuffer::I32(_) => DType::I32,
            HostBuffer::I64(_) => DType::I64,
            HostBuffer::I8(_) => DType::I8,
            HostBuffer::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            HostBuffer::F32(a) => a.shape().to_vec(),
            HostBuffer::F64(a) => a.shape().to_vec(),
            HostBuffer::I32(a) => a.shape().to_vec(),
            HostBuffer::I64(a) => a.shape().to_vec(),
            HostBuffer::I8(a) => a.shape().to_vec(),
            HostBuffer::Bool(a) => a.shape().to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::filled(shape, dtype, 0.0)
    }

    pub fn ones(shape: &[usize], dtype: DType) -> Self {
        Self::filled(shape, dtype, 1.0)
    }

    fn filled(shape: &[usize], dtype: DType, value: f64) -> Self {
        let dim = IxDyn(shape);
        match dtype {
            DType::F32 => HostBuffer::F32(ArrayD::from_elem(dim, value as f32)),
            DType::F64 => HostBuffer::F64(ArrayD::from_elem(dim, value)),
            DType::I32 => HostBuffer::I32(ArrayD::from_elem(dim, value as i32)),
            DType::I64 => HostBuffer::I64(ArrayD::from_elem(dim, value as i64)),
            DType::I8 => HostBuffer::I8(ArrayD::from_elem(dim, value as i8)),
            DType::Bool => HostBuffer::Bool(ArrayD::from_elem(dim, value != 0.0)),
        }
    }

    pub fn scalar(value: f64, dtype: DType) -> Self {
        Self::filled(&[], dtype, value)
    }

    /// Convert the buffer to `dtype`. Numeric conversions route through f64;
    /// booleans map to 0/1 and back through a non-zero test.
    pub fn cast(&self, dtype: DType) -> HostBuffer {
        if self.dtype() == dtype {
            return self.clone();
        }
        let wide: ArrayD<f64> = match self {
            HostBuffer::F32(a) => a.mapv(f64::from),
            HostBuffer::F64(a) => a.clone(),
            HostBuffer::I32(a) => a.mapv(f64::from),
            HostBuffer::I64(a) => a.mapv(|v| v as f64),
            HostBuffer::I8(a) => a.mapv(f64::from),
            HostBuffer::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        };
        match dtype {
            DType::F32 => HostBuffer::F32(wide.mapv(|v| v as f32)),
            DType::F64 => HostBuffer::F64(wide),
            DType::I32 => HostBuffer::I32(wide.mapv(|v| v as i32)),
            DType::I64 => HostBuffer::I64(wide.mapv(|v| v as i64)),
            DType::I8 => HostBuffer::I8(wide.mapv(|v| v as i8)),
            DType::Bool => HostBuffer::Bool(wide.mapv(|v| v != 0.0)),
        }
    }
}

impl From<ArrayD<f32>> for HostBuffer {
    fn from(a: ArrayD<f32>) -> Self {
        HostBuffer::F32(a)
    }
}

impl From<ArrayD<f64>> for HostBuffer {
    fn from(a: ArrayD<f64>) -> Self {
        HostBuffer::F64(a)
    }
}

impl From<ArrayD<i32>> for HostBuffer {
    fn from(a: ArrayD<i32>) -> Self {
        HostBuffer::I32(a)
    }
}

impl From<ArrayD<bool>> for HostBuffer {
    fn from(a: ArrayD<bool>) -> Self {
        HostBuffer::Bool(a)
    }
}

/// Unary primitives of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Square,
    Abs,
    Sqrt,
    Exp,
    Log,
    Round,
    Sigmoid,
    Tanh,
    Softplus,
    Relu,
    Softmax,
}

/// Binary primitives of the engine. All broadcast in the engine's own rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Maximum,
    Minimum,
    Equal,
}

/// Reduction primitives of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Mean,
    Max,
    Min,
    Any,
}

/// Index-producing reductions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgReduceOp {
    Max,
    Min,
}

/// Spatial padding scheme understood by the engine's conv/pool primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Padding {
    Valid,
    Same,
}

impl FromStr for Padding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            other => Err(Error::UnknownBorderMode(other.to_string())),
        }
    }
}

/// Pooling flavor of the engine's pool primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    Max,
    Avg,
}

impl FromStr for PoolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "max" => Ok(PoolKind::Max),
            "avg" => Ok(PoolKind::Avg),
            other => Err(Error::UnknownPoolMode(other.to_string())),
        }
    }
}

/// Shared handle to an engine implementation.
pub type Engine = Arc<dyn GraphEngine>;

/// The external engine's graph-construction API, one method per primitive
/// the adapter emits. Implementations own all semantics; the adapter only
/// transforms arguments before dispatch.
pub trait GraphEngine: Send + Sync {
    /// Named input slot. `shape` entries of `None` are symbolic dimensions.
    fn placeholder(
        &self,
        shape: &[Option<usize>],
        dtype: DType,
        name: Option<&str>,
    ) -> Result<NodeId>;

    /// Mutable graph state initialized to `init`. The adapter runs the
    /// initializer eagerly at creation time.
    fn variable(&self, init: HostBuffer, name: Option<&str>) -> Result<NodeId>;

    /// Immutable value baked into the graph.
    fn constant(&self, value: HostBuffer) -> Result<NodeId>;

    /// Rank-0 constant of the given dtype.
    fn scalar(&self, value: f64, dtype: DType) -> Result<NodeId>;

    /// Constant filled with `value`, taking the shape and dtype of `x`.
    /// Works on symbolic shapes; the fill happens in the graph.
    fn fill_like(&self, x: NodeId, value: f64) -> Result<NodeId>;

    /// Update op: running the returned node stores `value` into `target`.
    fn assign(&self, target: NodeId, value: NodeId) -> Result<NodeId>;

    /// Static shape of a node; `None` entries are symbolic.
    fn shape(&self, node: NodeId) -> Result<Vec<Option<usize>>>;

    fn dtype(&self, node: NodeId) -> Result<DType>;

    fn unary(&self, op: UnaryOp, x: NodeId) -> Result<NodeId>;

    fn binary(&self, op: BinaryOp, x: NodeId, y: NodeId) -> Result<NodeId>;

    fn clip(&self, x: NodeId, lo: f64, hi: f64) -> Result<NodeId>;

    /// Reduce along `axis`, or over every axis when `axis` is `None`.
    fn reduce(&self, op: ReduceOp, x: NodeId, axis: Option<usize>, keepdims: bool)
        -> Result<NodeId>;

    fn arg_reduce(&self, op: ArgReduceOp, x: NodeId, axis: usize) -> Result<NodeId>;

    fn matmul(&self, x: NodeId, y: NodeId) -> Result<NodeId>;

    fn permute(&self, x: NodeId, pattern: &[usize]) -> Result<NodeId>;

    fn gather(&self, reference: NodeId, indices: NodeId) -> Result<NodeId>;

    fn cast(&self, x: NodeId, dtype: DType) -> Result<NodeId>;

    fn concat(&self, xs: &[NodeId], axis: usize) -> Result<NodeId>;

    /// Reshape; one entry may be `-1` and is inferred from the element count.
    fn reshape(&self, x: NodeId, shape: &[isize]) -> Result<NodeId>;

    /// Zero-pad each dimension by `(before, after)` elements.
    fn pad(&self, x: NodeId, amounts: &[(usize, usize)]) -> Result<NodeId>;

    /// Split into `pieces` equal slices along `axis`.
    fn split(&self, x: NodeId, axis: usize, pieces: usize) -> Result<Vec<NodeId>>;

    /// Stack along a new leading axis.
    fn stack(&self, xs: &[NodeId]) -> Result<NodeId>;

    /// Unpack along the leading axis, which must be static.
    fn unstack(&self, x: NodeId) -> Result<Vec<NodeId>>;

    fn expand_dims(&self, x: NodeId, axis: usize) -> Result<NodeId>;

    fn squeeze(&self, x: NodeId, axis: usize) -> Result<NodeId>;

    fn tile(&self, x: NodeId, multiples: &[usize]) -> Result<NodeId>;

    /// Nearest-neighbor image resize. Channel-last rank-4 input only.
    fn resize_nearest(&self, x: NodeId, height: usize, width: usize) -> Result<NodeId>;

    /// 2-D convolution. Channel-last input `(n, h, w, c_in)` and kernel
    /// `(kh, kw, c_in, c_out)` only; layout translation happens above.
    fn conv2d(
        &self,
        x: NodeId,
        kernel: NodeId,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<NodeId>;

    /// 2-D pooling. Channel-last rank-4 input only.
    fn pool2d(
        &self,
        x: NodeId,
        kind: PoolKind,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<NodeId>;

    /// Lazy conditional on a scalar boolean predicate.
    fn cond(&self, pred: NodeId, then_branch: NodeId, else_branch: NodeId) -> Result<NodeId>;

    fn dropout(&self, x: NodeId, keep_prob: f64, seed: u64) -> Result<NodeId>;

    fn l2_normalize(&self, x: NodeId, axis: usize) -> Result<NodeId>;

    fn softmax_cross_entropy_with_logits(&self, logits: NodeId, labels: NodeId) -> Result<NodeId>;

    fn sigmoid_cross_entropy_with_logits(&self, logits: NodeId, targets: NodeId)
        -> Result<NodeId>;

    fn random_normal(
        &self,
        shape: &[usize],
        mean: f64,
        std: f64,
        dtype: DType,
        seed: u64,
    ) -> Result<NodeId>;

    fn random_uniform(
        &self,
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DType,
        seed: u64,
    ) -> Result<NodeId>;

    /// Symbolic gradients of `loss` with respect to `wrt`, one node each.
    fn gradients(&self, loss: NodeId, wrt: &[NodeId]) -> Result<Vec<NodeId>>;

    /// Fresh execution session over this engine's graph.
    fn new_session(self: Arc<Self>) -> Result<Arc<dyn Session>>;
}

/// The engine's execution context: materializes graph nodes into concrete
/// host values, binding placeholder feeds for the duration of one run.
pub trait Session: Send + Sync {
    fn run(&self, fetches: &[NodeId], feeds: &[(NodeId, HostBuffer)]) -> Result<Vec<HostBuffer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_parses_known_modes_and_rejects_others() {
        assert_eq!("valid".parse::<Padding>().unwrap(), Padding::Valid);
        assert_eq!("same".parse::<Padding>().unwrap(), Padding::Same);
        let err = "full".parse::<Padding>().unwrap_err();
        assert!(matches!(err, Error::UnknownBorderMode(ref m) if m == "full"));
    }

    #[test]
    fn pool_kind_parses_known_modes_and_rejects_others() {
        assert_eq!("max".parse::<PoolKind>().unwrap(), PoolKind::Max);
        assert_eq!("avg".parse::<PoolKind>().unwrap(), PoolKind::Avg);
        assert!(matches!(
            "sum".parse::<PoolKind>(),
            Err(Error::UnknownPoolMode(_))
        ));
    }

    #[test]
    fn host_buffer_cast_round_trips_through_bool() {
        let buf = HostBuffer::F32(ndarray::arr1(&[0.0f32, 2.5, -1.0]).into_dyn());
        let as_bool = buf.cast(DType::Bool);
        match &as_bool {
            HostBuffer::Bool(a) => {
                assert_eq!(a.as_slice().unwrap(), &[false, true, true]);
            }
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
        let back = as_bool.cast(DType::I32);
        match back {
            HostBuffer::I32(a) => assert_eq!(a.as_slice().unwrap(), &[0, 1, 1]),
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn filled_buffers_carry_shape_and_dtype() {
        let z = HostBuffer::zeros(&[2, 3], DType::I64);
        assert_eq!(z.shape(), vec![2, 3]);
        assert_eq!(z.dtype(), DType::I64);
        let s = HostBuffer::scalar(4.0, DType::F64);
        assert_eq!(s.ndim(), 0);
    }
}
