// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! A recording engine for exercising the adapter without a real backend.
//!
//! [`TraceEngine`] implements [`GraphEngine`] by writing every primitive
//! invocation into an inspectable node table and inferring static shapes.
//! [`TraceSession`] materializes only the trivial subset needed by lifecycle
//! tests: constants, variables, feeds, assigns, elementwise arithmetic and
//! plain data movement. It owns no autodiff and no convolution kernels;
//! gradient, conv, pool, resize and random nodes are recordable but refuse
//! to run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ndarray::{concatenate, stack, ArrayD, ArrayViewD, Axis, IxDyn, Slice, Zip};

use crate::engine::{
    ArgReduceOp, BinaryOp, DType, GraphEngine, HostBuffer, NodeId, Padding, PoolKind, ReduceOp,
    Session, UnaryOp,
};
use crate::error::{backend, Result};

/// One recorded primitive invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceOp {
    Placeholder { name: Option<String> },
    Variable { name: Option<String> },
    Constant,
    Scalar { value: f64 },
    FillLike { x: NodeId, value: f64 },
    Assign { target: NodeId, value: NodeId },
    Unary { op: UnaryOp, x: NodeId },
    Binary { op: BinaryOp, x: NodeId, y: NodeId },
    Clip { x: NodeId, lo: f64, hi: f64 },
    Reduce { op: ReduceOp, x: NodeId, axis: Option<usize>, keepdims: bool },
    ArgReduce { op: ArgReduceOp, x: NodeId, axis: usize },
    Matmul { x: NodeId, y: NodeId },
    Permute { x: NodeId, pattern: Vec<usize> },
    Gather { reference: NodeId, indices: NodeId },
    Cast { x: NodeId, dtype: DType },
    Concat { xs: Vec<NodeId>, axis: usize },
    Reshape { x: NodeId, shape: Vec<isize> },
    Pad { x: NodeId, amounts: Vec<(usize, usize)> },
    Split { x: NodeId, axis: usize, pieces: usize, index: usize },
    Stack { xs: Vec<NodeId> },
    Unstack { x: NodeId, index: usize },
    ExpandDims { x: NodeId, axis: usize },
    Squeeze { x: NodeId, axis: usize },
    Tile { x: NodeId, multiples: Vec<usize> },
    ResizeNearest { x: NodeId, height: usize, width: usize },
    Conv2d { x: NodeId, kernel: NodeId, strides: (usize, usize), padding: Padding },
    Pool2d {
        x: NodeId,
        kind: PoolKind,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    },
    Cond { pred: NodeId, then_branch: NodeId, else_branch: NodeId },
    Dropout { x: NodeId, keep_prob: f64, seed: u64 },
    L2Normalize { x: NodeId, axis: usize },
    SoftmaxCrossEntropy { logits: NodeId, labels: NodeId },
    SigmoidCrossEntropy { logits: NodeId, targets: NodeId },
    RandomNormal { shape: Vec<usize>, mean: f64, std: f64, seed: u64 },
    RandomUniform { shape: Vec<usize>, low: f64, high: f64, seed: u64 },
    Gradient { loss: NodeId, wrt: NodeId },
}

/// Node table entry: the op plus inferred metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceNode {
    pub id: NodeId,
    pub op: TraceOp,
    pub dtype: DType,
    pub shape: Vec<Option<usize>>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    nodes: HashMap<NodeId, TraceNode>,
    // Current values of variables, plus the baked values of constants.
    values: HashMap<NodeId, HostBuffer>,
}

/// In-memory recording engine.
#[derive(Default)]
pub struct TraceEngine {
    state: Mutex<State>,
}

impl TraceEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of one node.
    pub fn node(&self, id: NodeId) -> Option<TraceNode> {
        self.lock().nodes.get(&id).cloned()
    }

    /// Snapshot of the op behind a node.
    pub fn op(&self, id: NodeId) -> Option<TraceOp> {
        self.node(id).map(|n| n.op)
    }

    /// All recorded nodes in creation order.
    pub fn nodes(&self) -> Vec<TraceNode> {
        let state = self.lock();
        let mut out: Vec<TraceNode> = state.nodes.values().cloned().collect();
        out.sort_by_key(|n| n.id);
        out
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, op: TraceOp, dtype: DType, shape: Vec<Option<usize>>) -> NodeId {
        let mut state = self.lock();
        let id = NodeId(state.next_id);
        state.next_id += 1;
        state.nodes.insert(id, TraceNode { id, op, dtype, shape });
        id
    }

    fn meta(&self, id: NodeId) -> Result<(DType, Vec<Option<usize>>)> {
        let state = self.lock();
        let node = state
            .nodes
            .get(&id)
            .ok_or_else(|| backend(format!("unknown node {id}")))?;
        Ok((node.dtype, node.shape.clone()))
    }

    fn store_value(&self, id: NodeId, value: HostBuffer) {
        self.lock().values.insert(id, value);
    }

    fn stored_value(&self, id: NodeId) -> Option<HostBuffer> {
        self.lock().values.get(&id).cloned()
    }
}

fn known(shape: &[usize]) -> Vec<Option<usize>> {
    shape.iter().map(|&d| Some(d)).collect()
}

fn broadcast_dims(x: &[Option<usize>], y: &[Option<usize>]) -> Result<Vec<Option<usize>>> {
    let rank = x.len().max(y.len());
    let mut out = vec![None; rank];
    for i in 0..rank {
        let a = if i < rank - x.len() { Some(1) } else { x[i - (rank - x.len())] };
        let b = if i < rank - y.len() { Some(1) } else { y[i - (rank - y.len())] };
        out[i] = match (a, b) {
            (Some(1), d) | (d, Some(1)) => d,
            (Some(m), Some(n)) if m == n => Some(m),
            (Some(m), Some(n)) => {
                return Err(backend(format!(
                    "cannot broadcast dimensions {m} and {n}"
                )))
            }
            _ => None,
        };
    }
    Ok(out)
}

fn window_out(input: Option<usize>, window: usize, stride: usize, padding: Padding) -> Result<Option<usize>> {
    let Some(size) = input else { return Ok(None) };
    match padding {
        Padding::Valid => {
            if size < window {
                return Err(backend(format!(
                    "window {window} larger than input {size} under valid padding"
                )));
            }
            Ok(Some((size - window) / stride + 1))
        }
        Padding::Same => Ok(Some((size + stride - 1) / stride)),
    }
}

impl GraphEngine for TraceEngine {
    fn placeholder(
        &self,
        shape: &[Option<usize>],
        dtype: DType,
        name: Option<&str>,
    ) -> Result<NodeId> {
        Ok(self.insert(
            TraceOp::Placeholder {
                name: name.map(str::to_string),
            },
            dtype,
            shape.to_vec(),
        ))
    }

    fn variable(&self, init: HostBuffer, name: Option<&str>) -> Result<NodeId> {
        let dtype = init.dtype();
        let shape = known(&init.shape());
        let id = self.insert(
            TraceOp::Variable {
                name: name.map(str::to_string),
            },
            dtype,
            shape,
        );
        // Eager initialization: the value is live as soon as the node exists.
        self.store_value(id, init);
        Ok(id)
    }

    fn constant(&self, value: HostBuffer) -> Result<NodeId> {
        let dtype = value.dtype();
        let shape = known(&value.shape());
        let id = self.insert(TraceOp::Constant, dtype, shape);
        self.store_value(id, value);
        Ok(id)
    }

    fn scalar(&self, value: f64, dtype: DType) -> Result<NodeId> {
        let id = self.insert(TraceOp::Scalar { value }, dtype, Vec::new());
        self.store_value(id, HostBuffer::scalar(value, dtype));
        Ok(id)
    }

    fn fill_like(&self, x: NodeId, value: f64) -> Result<NodeId> {
        let (dtype, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::FillLike { x, value }, dtype, shape))
    }

    fn assign(&self, target: NodeId, value: NodeId) -> Result<NodeId> {
        let (dtype, shape) = self.meta(target)?;
        match self.op(target) {
            Some(TraceOp::Variable { .. }) => {}
            _ => return Err(backend(format!("assign target {target} is not a variable"))),
        }
        Ok(self.insert(TraceOp::Assign { target, value }, dtype, shape))
    }

    fn shape(&self, node: NodeId) -> Result<Vec<Option<usize>>> {
        Ok(self.meta(node)?.1)
    }

    fn dtype(&self, node: NodeId) -> Result<DType> {
        Ok(self.meta(node)?.0)
    }

    fn unary(&self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        let (dtype, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::Unary { op, x }, dtype, shape))
    }

    fn binary(&self, op: BinaryOp, x: NodeId, y: NodeId) -> Result<NodeId> {
        let (xd, xs) = self.meta(x)?;
        let (_, ys) = self.meta(y)?;
        let shape = broadcast_dims(&xs, &ys)?;
        let dtype = if op == BinaryOp::Equal { DType::Bool } else { xd };
        Ok(self.insert(TraceOp::Binary { op, x, y }, dtype, shape))
    }

    fn clip(&self, x: NodeId, lo: f64, hi: f64) -> Result<NodeId> {
        let (dtype, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::Clip { x, lo, hi }, dtype, shape))
    }

    fn reduce(
        &self,
        op: ReduceOp,
        x: NodeId,
        axis: Option<usize>,
        keepdims: bool,
    ) -> Result<NodeId> {
        let (xd, xs) = self.meta(x)?;
        let shape = match axis {
            None => {
                if keepdims {
                    vec![Some(1); xs.len()]
                } else {
                    Vec::new()
                }
            }
            Some(a) => {
                if a >= xs.len() {
                    return Err(backend(format!("reduce axis {a} out of range")));
                }
                let mut s = xs.clone();
                if keepdims {
                    s[a] = Some(1);
                } else {
                    s.remove(a);
                }
                s
            }
        };
        let dtype = if op == ReduceOp::Any { DType::Bool } else { xd };
        Ok(self.insert(TraceOp::Reduce { op, x, axis, keepdims }, dtype, shape))
    }

    fn arg_reduce(&self, op: ArgReduceOp, x: NodeId, axis: usize) -> Result<NodeId> {
        let (_, xs) = self.meta(x)?;
        if axis >= xs.len() {
            return Err(backend(format!("arg reduce axis {axis} out of range")));
        }
        let mut shape = xs;
        shape.remove(axis);
        Ok(self.insert(TraceOp::ArgReduce { op, x, axis }, DType::I64, shape))
    }

    fn matmul(&self, x: NodeId, y: NodeId) -> Result<NodeId> {
        let (xd, xs) = self.meta(x)?;
        let (_, ys) = self.meta(y)?;
        if xs.len() != 2 || ys.len() != 2 {
            return Err(backend("matmul expects rank-2 operands"));
        }
        if let (Some(k1), Some(k2)) = (xs[1], ys[0]) {
            if k1 != k2 {
                return Err(backend(format!("matmul inner dims {k1} and {k2} differ")));
            }
        }
        Ok(self.insert(TraceOp::Matmul { x, y }, xd, vec![xs[0], ys[1]]))
    }

    fn permute(&self, x: NodeId, pattern: &[usize]) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        if pattern.len() != xs.len() {
            return Err(backend(format!(
                "permute pattern of length {} against rank {}",
                pattern.len(),
                xs.len()
            )));
        }
        let mut seen = vec![false; xs.len()];
        for &p in pattern {
            if p >= xs.len() || seen[p] {
                return Err(backend("permute pattern is not a permutation"));
            }
            seen[p] = true;
        }
        let shape = pattern.iter().map(|&p| xs[p]).collect();
        Ok(self.insert(
            TraceOp::Permute {
                x,
                pattern: pattern.to_vec(),
            },
            dtype,
            shape,
        ))
    }

    fn gather(&self, reference: NodeId, indices: NodeId) -> Result<NodeId> {
        let (rd, rs) = self.meta(reference)?;
        let (_, is) = self.meta(indices)?;
        if rs.is_empty() {
            return Err(backend("gather reference must have rank >= 1"));
        }
        let mut shape = is;
        shape.extend_from_slice(&rs[1..]);
        Ok(self.insert(TraceOp::Gather { reference, indices }, rd, shape))
    }

    fn cast(&self, x: NodeId, dtype: DType) -> Result<NodeId> {
        let (_, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::Cast { x, dtype }, dtype, shape))
    }

    fn concat(&self, xs: &[NodeId], axis: usize) -> Result<NodeId> {
        let first = xs.first().ok_or_else(|| backend("concat of nothing"))?;
        let (dtype, base) = self.meta(*first)?;
        if axis >= base.len() {
            return Err(backend(format!("concat axis {axis} out of range")));
        }
        let mut along = Some(0usize);
        for &x in xs {
            let (_, s) = self.meta(x)?;
            along = match (along, s.get(axis).copied().flatten()) {
                (Some(acc), Some(d)) => Some(acc + d),
                _ => None,
            };
        }
        let mut shape = base;
        shape[axis] = along;
        Ok(self.insert(
            TraceOp::Concat {
                xs: xs.to_vec(),
                axis,
            },
            dtype,
            shape,
        ))
    }

    fn reshape(&self, x: NodeId, shape: &[isize]) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        let total: Option<usize> = xs.iter().copied().try_fold(1usize, |acc, d| d.map(|v| acc * v));
        let mut wildcard = None;
        let mut fixed = 1usize;
        for (i, &d) in shape.iter().enumerate() {
            if d == -1 {
                if wildcard.is_some() {
                    return Err(backend("reshape allows a single -1"));
                }
                wildcard = Some(i);
            } else if d < 0 {
                return Err(backend(format!("reshape dimension {d} is invalid")));
            } else {
                fixed *= d as usize;
            }
        }
        let mut out: Vec<Option<usize>> = shape
            .iter()
            .map(|&d| if d >= 0 { Some(d as usize) } else { None })
            .collect();
        if let (Some(slot), Some(total)) = (wildcard, total) {
            if fixed == 0 || total % fixed != 0 {
                return Err(backend(format!(
                    "cannot reshape {total} elements into {shape:?}"
                )));
            }
            out[slot] = Some(total / fixed);
        }
        Ok(self.insert(
            TraceOp::Reshape {
                x,
                shape: shape.to_vec(),
            },
            dtype,
            out,
        ))
    }

    fn pad(&self, x: NodeId, amounts: &[(usize, usize)]) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        if amounts.len() != xs.len() {
            return Err(backend(format!(
                "pad spec of length {} against rank {}",
                amounts.len(),
                xs.len()
            )));
        }
        let shape = xs
            .iter()
            .zip(amounts)
            .map(|(d, &(b, a))| d.map(|v| v + b + a))
            .collect();
        Ok(self.insert(
            TraceOp::Pad {
                x,
                amounts: amounts.to_vec(),
            },
            dtype,
            shape,
        ))
    }

    fn split(&self, x: NodeId, axis: usize, pieces: usize) -> Result<Vec<NodeId>> {
        let (dtype, xs) = self.meta(x)?;
        if pieces == 0 {
            return Err(backend("split into zero pieces"));
        }
        let width = xs
            .get(axis)
            .copied()
            .flatten()
            .ok_or_else(|| backend(format!("split axis {axis} must be static")))?;
        if width % pieces != 0 {
            return Err(backend(format!(
                "cannot split dimension {width} into {pieces} pieces"
            )));
        }
        let mut shape = xs;
        shape[axis] = Some(width / pieces);
        Ok((0..pieces)
            .map(|index| {
                self.insert(
                    TraceOp::Split { x, axis, pieces, index },
                    dtype,
                    shape.clone(),
                )
            })
            .collect())
    }

    fn stack(&self, xs: &[NodeId]) -> Result<NodeId> {
        let first = xs.first().ok_or_else(|| backend("stack of nothing"))?;
        let (dtype, base) = self.meta(*first)?;
        let mut shape = vec![Some(xs.len())];
        shape.extend_from_slice(&base);
        Ok(self.insert(TraceOp::Stack { xs: xs.to_vec() }, dtype, shape))
    }

    fn unstack(&self, x: NodeId) -> Result<Vec<NodeId>> {
        let (dtype, xs) = self.meta(x)?;
        let steps = xs
            .first()
            .copied()
            .flatten()
            .ok_or_else(|| backend("unstack needs a static leading dimension"))?;
        let shape: Vec<Option<usize>> = xs[1..].to_vec();
        Ok((0..steps)
            .map(|index| self.insert(TraceOp::Unstack { x, index }, dtype, shape.clone()))
            .collect())
    }

    fn expand_dims(&self, x: NodeId, axis: usize) -> Result<NodeId> {
        let (dtype, mut shape) = self.meta(x)?;
        if axis > shape.len() {
            return Err(backend(format!("expand_dims axis {axis} out of range")));
        }
        shape.insert(axis, Some(1));
        Ok(self.insert(TraceOp::ExpandDims { x, axis }, dtype, shape))
    }

    fn squeeze(&self, x: NodeId, axis: usize) -> Result<NodeId> {
        let (dtype, mut shape) = self.meta(x)?;
        if axis >= shape.len() {
            return Err(backend(format!("squeeze axis {axis} out of range")));
        }
        if let Some(d) = shape[axis] {
            if d != 1 {
                return Err(backend(format!("cannot squeeze dimension of size {d}")));
            }
        }
        shape.remove(axis);
        Ok(self.insert(TraceOp::Squeeze { x, axis }, dtype, shape))
    }

    fn tile(&self, x: NodeId, multiples: &[usize]) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        if multiples.len() != xs.len() {
            return Err(backend(format!(
                "tile multiples of length {} against rank {}",
                multiples.len(),
                xs.len()
            )));
        }
        let shape = xs
            .iter()
            .zip(multiples)
            .map(|(d, &m)| d.map(|v| v * m))
            .collect();
        Ok(self.insert(
            TraceOp::Tile {
                x,
                multiples: multiples.to_vec(),
            },
            dtype,
            shape,
        ))
    }

    fn resize_nearest(&self, x: NodeId, height: usize, width: usize) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        if xs.len() != 4 {
            return Err(backend("resize_nearest expects a rank-4 tensor"));
        }
        let shape = vec![xs[0], Some(height), Some(width), xs[3]];
        Ok(self.insert(TraceOp::ResizeNearest { x, height, width }, dtype, shape))
    }

    fn conv2d(
        &self,
        x: NodeId,
        kernel: NodeId,
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        let (_, ks) = self.meta(kernel)?;
        if xs.len() != 4 || ks.len() != 4 {
            return Err(backend("conv2d expects rank-4 input and kernel"));
        }
        let (kh, kw) = match (ks[0], ks[1]) {
            (Some(h), Some(w)) => (h, w),
            _ => return Err(backend("conv2d kernel extents must be static")),
        };
        let shape = vec![
            xs[0],
            window_out(xs[1], kh, strides.0, padding)?,
            window_out(xs[2], kw, strides.1, padding)?,
            ks[3],
        ];
        Ok(self.insert(
            TraceOp::Conv2d {
                x,
                kernel,
                strides,
                padding,
            },
            dtype,
            shape,
        ))
    }

    fn pool2d(
        &self,
        x: NodeId,
        kind: PoolKind,
        pool: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
    ) -> Result<NodeId> {
        let (dtype, xs) = self.meta(x)?;
        if xs.len() != 4 {
            return Err(backend("pool2d expects a rank-4 tensor"));
        }
        let shape = vec![
            xs[0],
            window_out(xs[1], pool.0, strides.0, padding)?,
            window_out(xs[2], pool.1, strides.1, padding)?,
            xs[3],
        ];
        Ok(self.insert(
            TraceOp::Pool2d {
                x,
                kind,
                pool,
                strides,
                padding,
            },
            dtype,
            shape,
        ))
    }

    fn cond(&self, pred: NodeId, then_branch: NodeId, else_branch: NodeId) -> Result<NodeId> {
        let (dtype, shape) = self.meta(then_branch)?;
        Ok(self.insert(
            TraceOp::Cond {
                pred,
                then_branch,
                else_branch,
            },
            dtype,
            shape,
        ))
    }

    fn dropout(&self, x: NodeId, keep_prob: f64, seed: u64) -> Result<NodeId> {
        let (dtype, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::Dropout { x, keep_prob, seed }, dtype, shape))
    }

    fn l2_normalize(&self, x: NodeId, axis: usize) -> Result<NodeId> {
        let (dtype, shape) = self.meta(x)?;
        Ok(self.insert(TraceOp::L2Normalize { x, axis }, dtype, shape))
    }

    fn softmax_cross_entropy_with_logits(&self, logits: NodeId, labels: NodeId) -> Result<NodeId> {
        let (dtype, mut shape) = self.meta(logits)?;
        if shape.is_empty() {
            return Err(backend("cross-entropy logits must have rank >= 1"));
        }
        shape.pop();
        Ok(self.insert(TraceOp::SoftmaxCrossEntropy { logits, labels }, dtype, shape))
    }

    fn sigmoid_cross_entropy_with_logits(
        &self,
        logits: NodeId,
        targets: NodeId,
    ) -> Result<NodeId> {
        let (dtype, shape) = self.meta(logits)?;
        Ok(self.insert(TraceOp::SigmoidCrossEntropy { logits, targets }, dtype, shape))
    }

    fn random_normal(
        &self,
        shape: &[usize],
        mean: f64,
        std: f64,
        dtype: DType,
        seed: u64,
    ) -> Result<NodeId> {
        Ok(self.insert(
            TraceOp::RandomNormal {
                shape: shape.to_vec(),
                mean,
                std,
                seed,
            },
            dtype,
            known(shape),
        ))
    }

    fn random_uniform(
        &self,
        shape: &[usize],
        low: f64,
        high: f64,
        dtype: DType,
        seed: u64,
    ) -> Result<NodeId> {
        Ok(self.insert(
            TraceOp::RandomUniform {
                shape: shape.to_vec(),
                low,
                high,
                seed,
            },
            dtype,
            known(shape),
        ))
    }

    fn gradients(&self, loss: NodeId, wrt: &[NodeId]) -> Result<Vec<NodeId>> {
        wrt.iter()
            .map(|&w| {
                let (dtype, shape) = self.meta(w)?;
                Ok(self.insert(TraceOp::Gradient { loss, wrt: w }, dtype, shape))
            })
            .collect()
    }

    fn new_session(self: Arc<Self>) -> Result<Arc<dyn Session>> {
        Ok(Arc::new(TraceSession { engine: self }))
    }
}

/// Session over a [`TraceEngine`]. Materializes the trivial subset only.
pub struct TraceSession {
    engine: Arc<TraceEngine>,
}

impl Session for TraceSession {
    fn run(&self, fetches: &[NodeId], feeds: &[(NodeId, HostBuffer)]) -> Result<Vec<HostBuffer>> {
        let feeds: HashMap<NodeId, HostBuffer> = feeds.iter().cloned().collect();
        let mut memo: HashMap<NodeId, HostBuffer> = HashMap::new();
        fetches
            .iter()
            .map(|&id| eval(&self.engine, id, &feeds, &mut memo))
            .collect()
    }
}

fn eval(
    engine: &TraceEngine,
    id: NodeId,
    feeds: &HashMap<NodeId, HostBuffer>,
    memo: &mut HashMap<NodeId, HostBuffer>,
) -> Result<HostBuffer> {
    if let Some(v) = memo.get(&id) {
        return Ok(v.clone());
    }
    let node = engine
        .node(id)
        .ok_or_else(|| backend(format!("unknown node {id}")))?;
    let value = eval_node(engine, &node, feeds, memo)?;
    memo.insert(id, value.clone());
    Ok(value)
}

fn eval_node(
    engine: &TraceEngine,
    node: &TraceNode,
    feeds: &HashMap<NodeId, HostBuffer>,
    memo: &mut HashMap<NodeId, HostBuffer>,
) -> Result<HostBuffer> {
    match &node.op {
        TraceOp::Placeholder { name } => feeds.get(&node.id).cloned().ok_or_else(|| {
            backend(format!(
                "placeholder {} was not fed",
                name.clone().unwrap_or_else(|| node.id.to_string())
            ))
        }),
        TraceOp::Variable { .. } | TraceOp::Constant | TraceOp::Scalar { .. } => engine
            .stored_value(node.id)
            .ok_or_else(|| backend(format!("node {} has no stored value", node.id))),
        TraceOp::FillLike { x, value } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            Ok(HostBuffer::F32(ArrayD::from_elem(
                x.raw_dim(),
                *value as f32,
            )))
        }
        TraceOp::Assign { target, value } => {
            let new_value = eval(engine, *value, feeds, memo)?;
            engine.store_value(*target, new_value.clone());
            Ok(new_value)
        }
        TraceOp::Unary { op, x } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            Ok(HostBuffer::F32(apply_unary(*op, x)))
        }
        TraceOp::Binary { op, x, y } => {
            let xv = eval(engine, *x, feeds, memo)?;
            let yv = eval(engine, *y, feeds, memo)?;
            apply_binary(*op, xv, yv)
        }
        TraceOp::Clip { x, lo, hi } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let (lo, hi) = (*lo as f32, *hi as f32);
            Ok(HostBuffer::F32(x.mapv(|v| v.clamp(lo, hi))))
        }
        TraceOp::Reduce { op, x, axis, keepdims } => {
            let xv = eval(engine, *x, feeds, memo)?;
            apply_reduce(*op, xv, *axis, *keepdims)
        }
        TraceOp::ArgReduce { op, x, axis } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let op = *op;
            let out = x.map_axis(Axis(*axis), |lane| {
                let mut best = 0usize;
                for (i, &v) in lane.iter().enumerate() {
                    let better = match op {
                        ArgReduceOp::Max => v > lane[best],
                        ArgReduceOp::Min => v < lane[best],
                    };
                    if better {
                        best = i;
                    }
                }
                best as i64
            });
            Ok(HostBuffer::I64(out))
        }
        TraceOp::Matmul { x, y } => {
            let a = as_f32(eval(engine, *x, feeds, memo)?)?
                .into_dimensionality::<ndarray::Ix2>()
                .map_err(|e| backend(format!("matmul operand not rank-2: {e}")))?;
            let b = as_f32(eval(engine, *y, feeds, memo)?)?
                .into_dimensionality::<ndarray::Ix2>()
                .map_err(|e| backend(format!("matmul operand not rank-2: {e}")))?;
            Ok(HostBuffer::F32(a.dot(&b).into_dyn()))
        }
        TraceOp::Permute { x, pattern } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let permuted = x.permuted_axes(IxDyn(pattern));
            Ok(HostBuffer::F32(permuted.as_standard_layout().to_owned()))
        }
        TraceOp::Gather { reference, indices } => {
            let r = as_f32(eval(engine, *reference, feeds, memo)?)?;
            let idx = match eval(engine, *indices, feeds, memo)? {
                HostBuffer::I32(a) => a.iter().map(|&v| v as usize).collect::<Vec<_>>(),
                HostBuffer::I64(a) => a.iter().map(|&v| v as usize).collect::<Vec<_>>(),
                other => {
                    return Err(backend(format!(
                        "gather indices must be integer, got {:?}",
                        other.dtype()
                    )))
                }
            };
            Ok(HostBuffer::F32(r.select(Axis(0), &idx)))
        }
        TraceOp::Cast { x, dtype } => {
            let xv = eval(engine, *x, feeds, memo)?;
            Ok(xv.cast(*dtype))
        }
        TraceOp::Concat { xs, axis } => {
            let arrays: Vec<ArrayD<f32>> = xs
                .iter()
                .map(|&x| as_f32(eval(engine, x, feeds, memo)?))
                .collect::<Result<_>>()?;
            let views: Vec<ArrayViewD<f32>> = arrays.iter().map(|a| a.view()).collect();
            concatenate(Axis(*axis), &views)
                .map(HostBuffer::F32)
                .map_err(|e| backend(format!("concat failed: {e}")))
        }
        TraceOp::Reshape { x, .. } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let dims: Vec<usize> = node
                .shape
                .iter()
                .map(|d| d.ok_or_else(|| backend("reshape target has a symbolic dimension")))
                .collect::<Result<_>>()?;
            x.as_standard_layout()
                .to_owned()
                .into_shape(IxDyn(&dims))
                .map(HostBuffer::F32)
                .map_err(|e| backend(format!("reshape failed: {e}")))
        }
        TraceOp::Pad { x, amounts } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let target: Vec<usize> = x
                .shape()
                .iter()
                .zip(amounts)
                .map(|(&d, &(b, a))| d + b + a)
                .collect();
            let mut out = ArrayD::<f32>::zeros(IxDyn(&target));
            let mut view = out.view_mut();
            for (ax, &(b, _)) in amounts.iter().enumerate() {
                let len = x.shape()[ax] as isize;
                view.slice_axis_inplace(
                    Axis(ax),
                    Slice::from(b as isize..b as isize + len),
                );
            }
            view.assign(&x);
            Ok(HostBuffer::F32(out))
        }
        TraceOp::Split { x, axis, pieces, index } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            let width = x.shape()[*axis] / pieces;
            let start = (index * width) as isize;
            let end = start + width as isize;
            Ok(HostBuffer::F32(
                x.slice_axis(Axis(*axis), Slice::from(start..end)).to_owned(),
            ))
        }
        TraceOp::Stack { xs } => {
            let arrays: Vec<ArrayD<f32>> = xs
                .iter()
                .map(|&x| as_f32(eval(engine, x, feeds, memo)?))
                .collect::<Result<_>>()?;
            let views: Vec<ArrayViewD<f32>> = arrays.iter().map(|a| a.view()).collect();
            stack(Axis(0), &views)
                .map(HostBuffer::F32)
                .map_err(|e| backend(format!("stack failed: {e}")))
        }
        TraceOp::Unstack { x, index } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            Ok(HostBuffer::F32(x.index_axis(Axis(0), *index).to_owned()))
        }
        TraceOp::ExpandDims { x, axis } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            Ok(HostBuffer::F32(x.insert_axis(Axis(*axis))))
        }
        TraceOp::Squeeze { x, axis } => {
            let x = as_f32(eval(engine, *x, feeds, memo)?)?;
            Ok(HostBuffer::F32(x.index_axis(Axis(*axis), 0).to_owned()))
        }
        TraceOp::Tile { x, multiples } => {
            let mut acc = as_f32(eval(engine, *x, feeds, memo)?)?;
            for (ax, &m) in multiples.iter().enumerate() {
                if m <= 1 {
                    continue;
                }
                let copies: Vec<ArrayD<f32>> = (0..m).map(|_| acc.clone()).collect();
                let views: Vec<ArrayViewD<f32>> = copies.iter().map(|a| a.view()).collect();
                acc = concatenate(Axis(ax), &views)
                    .map_err(|e| backend(format!("tile failed: {e}")))?;
            }
            Ok(HostBuffer::F32(acc))
        }
        TraceOp::ResizeNearest { .. }
        | TraceOp::Conv2d { .. }
        | TraceOp::Pool2d { .. }
        | TraceOp::Cond { .. }
        | TraceOp::Dropout { .. }
        | TraceOp::L2Normalize { .. }
        | TraceOp::SoftmaxCrossEntropy { .. }
        | TraceOp::SigmoidCrossEntropy { .. }
        | TraceOp::RandomNormal { .. }
        | TraceOp::RandomUniform { .. }
        | TraceOp::Gradient { .. } => Err(backend(format!(
            "trace session cannot materialize {:?}",
            node.op
        ))),
    }
}

fn as_f32(buf: HostBuffer) -> Result<ArrayD<f32>> {
    match buf {
        HostBuffer::F32(a) => Ok(a),
        other => Err(backend(format!(
            "trace session materializes f32 only, got {:?}",
            other.dtype()
        ))),
    }
}

fn apply_unary(op: UnaryOp, x: ArrayD<f32>) -> ArrayD<f32> {
    match op {
        UnaryOp::Neg => x.mapv(|v| -v),
        UnaryOp::Square => x.mapv(|v| v * v),
        UnaryOp::Abs => x.mapv(f32::abs),
        UnaryOp::Sqrt => x.mapv(f32::sqrt),
        UnaryOp::Exp => x.mapv(f32::exp),
        UnaryOp::Log => x.mapv(f32::ln),
        UnaryOp::Round => x.mapv(f32::round),
        UnaryOp::Sigmoid => x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
        UnaryOp::Tanh => x.mapv(f32::tanh),
        UnaryOp::Softplus => x.mapv(|v| (1.0 + v.exp()).ln()),
        UnaryOp::Relu => x.mapv(|v| v.max(0.0)),
        UnaryOp::Softmax => softmax_lastdim(x),
    }
}

fn softmax_lastdim(x: ArrayD<f32>) -> ArrayD<f32> {
    let last = x.ndim().saturating_sub(1);
    let mut out = x;
    let axis = Axis(last);
    for mut lane in out.lanes_mut(axis) {
        let peak = lane.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0f32;
        for v in lane.iter_mut() {
            *v = (*v - peak).exp();
            total += *v;
        }
        for v in lane.iter_mut() {
            *v /= total;
        }
    }
    out
}

fn apply_binary(op: BinaryOp, x: HostBuffer, y: HostBuffer) -> Result<HostBuffer> {
    let a = as_f32(x)?;
    let b = as_f32(y)?;
    let dims = numeric_broadcast(a.shape(), b.shape())?;
    let av = a
        .broadcast(IxDyn(&dims))
        .ok_or_else(|| backend("broadcast failed"))?;
    let bv = b
        .broadcast(IxDyn(&dims))
        .ok_or_else(|| backend("broadcast failed"))?;
    if op == BinaryOp::Equal {
        let out = Zip::from(&av).and(&bv).map_collect(|&p, &q| p == q);
        return Ok(HostBuffer::Bool(out));
    }
    let out = Zip::from(&av).and(&bv).map_collect(|&p, &q| match op {
        BinaryOp::Add => p + q,
        BinaryOp::Sub => p - q,
        BinaryOp::Mul => p * q,
        BinaryOp::Div => p / q,
        BinaryOp::Pow => p.powf(q),
        BinaryOp::Maximum => p.max(q),
        BinaryOp::Minimum => p.min(q),
        BinaryOp::Equal => unreachable!(),
    });
    Ok(HostBuffer::F32(out))
}

fn numeric_broadcast(x: &[usize], y: &[usize]) -> Result<Vec<usize>> {
    let rank = x.len().max(y.len());
    let mut out = vec![1usize; rank];
    for i in 0..rank {
        let a = if i < rank - x.len() { 1 } else { x[i - (rank - x.len())] };
        let b = if i < rank - y.len() { 1 } else { y[i - (rank - y.len())] };
        out[i] = match (a, b) {
            (1, d) | (d, 1) => d,
            (m, n) if m == n => m,
            (m, n) => return Err(backend(format!("cannot broadcast {m} against {n}"))),
        };
    }
    Ok(out)
}

fn apply_reduce(
    op: ReduceOp,
    x: HostBuffer,
    axis: Option<usize>,
    keepdims: bool,
) -> Result<HostBuffer> {
    if op == ReduceOp::Any {
        let a = match x {
            HostBuffer::Bool(a) => a,
            other => {
                return Err(backend(format!(
                    "reduce-any expects bool, got {:?}",
                    other.dtype()
                )))
            }
        };
        let out = match axis {
            None => {
                let hit = a.iter().any(|&v| v);
                if keepdims {
                    ArrayD::from_elem(IxDyn(&vec![1; a.ndim()]), hit)
                } else {
                    ArrayD::from_elem(IxDyn(&[]), hit)
                }
            }
            Some(ax) => {
                let reduced = a.map_axis(Axis(ax), |lane| lane.iter().any(|&v| v));
                if keepdims {
                    reduced.insert_axis(Axis(ax))
                } else {
                    reduced
                }
            }
        };
        return Ok(HostBuffer::Bool(out));
    }

    let a = as_f32(x)?;
    let lane_reduce = |lane: ndarray::ArrayView1<f32>| -> f32 {
        match op {
            ReduceOp::Sum => lane.sum(),
            ReduceOp::Prod => lane.product(),
            ReduceOp::Mean => lane.sum() / lane.len() as f32,
            ReduceOp::Max => lane.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
            ReduceOp::Min => lane.iter().cloned().fold(f32::INFINITY, f32::min),
            ReduceOp::Any => unreachable!(),
        }
    };
    let out = match axis {
        None => {
            let v = match op {
                ReduceOp::Sum => a.iter().sum(),
                ReduceOp::Prod => a.iter().product(),
                ReduceOp::Mean => a.iter().sum::<f32>() / a.len() as f32,
                ReduceOp::Max => a.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
                ReduceOp::Min => a.iter().cloned().fold(f32::INFINITY, f32::min),
                ReduceOp::Any => unreachable!(),
            };
            if keepdims {
                ArrayD::from_elem(IxDyn(&vec![1; a.ndim()]), v)
            } else {
                ArrayD::from_elem(IxDyn(&[]), v)
            }
        }
        Some(ax) => {
            let reduced = a.map_axis(Axis(ax), lane_reduce);
            if keepdims {
                reduced.insert_axis(Axis(ax))
            } else {
                reduced
            }
        }
    };
    Ok(HostBuffer::F32(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn engine() -> Arc<TraceEngine> {
        TraceEngine::new()
    }

    #[test]
    fn broadcast_dims_handles_ones_and_unknowns() {
        let out = broadcast_dims(&[Some(2), Some(1)], &[Some(2), Some(3)]).unwrap();
        assert_eq!(out, vec![Some(2), Some(3)]);
        let out = broadcast_dims(&[None, Some(3)], &[Some(4), Some(3)]).unwrap();
        assert_eq!(out, vec![None, Some(3)]);
        assert!(broadcast_dims(&[Some(2)], &[Some(3)]).is_err());
    }

    #[test]
    fn window_out_matches_valid_and_same_arithmetic() {
        assert_eq!(window_out(Some(5), 3, 1, Padding::Valid).unwrap(), Some(3));
        assert_eq!(window_out(Some(5), 3, 2, Padding::Valid).unwrap(), Some(2));
        assert_eq!(window_out(Some(5), 3, 2, Padding::Same).unwrap(), Some(3));
        assert!(window_out(Some(2), 3, 1, Padding::Valid).is_err());
        assert_eq!(window_out(None, 3, 1, Padding::Same).unwrap(), None);
    }

    #[test]
    fn assign_rejects_non_variable_targets() {
        let e = engine();
        let c = e
            .constant(HostBuffer::F32(arr2(&[[1.0f32]]).into_dyn()))
            .unwrap();
        assert!(e.assign(c, c).is_err());
    }

    #[test]
    fn split_shapes_divide_the_axis() {
        let e = engine();
        let x = e
            .placeholder(&[Some(2), Some(6)], DType::F32, None)
            .unwrap();
        let parts = e.split(x, 1, 6).unwrap();
        assert_eq!(parts.len(), 6);
        assert_eq!(e.shape(parts[0]).unwrap(), vec![Some(2), Some(1)]);
    }

    #[test]
    fn session_evaluates_arithmetic_over_feeds() {
        let e = engine();
        let x = e.placeholder(&[Some(2)], DType::F32, Some("x")).unwrap();
        let two = e.scalar(2.0, DType::F32).unwrap();
        let y = e.binary(BinaryOp::Mul, x, two).unwrap();
        let sess = e.clone().new_session().unwrap();
        let fed = HostBuffer::F32(ndarray::arr1(&[1.5f32, -3.0]).into_dyn());
        let out = sess.run(&[y], &[(x, fed)]).unwrap();
        match &out[0] {
            HostBuffer::F32(a) => assert_eq!(a.as_slice().unwrap(), &[3.0, -6.0]),
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn unfed_placeholder_is_reported_by_name() {
        let e = engine();
        let x = e.placeholder(&[Some(1)], DType::F32, Some("input_a")).unwrap();
        let sess = e.clone().new_session().unwrap();
        let err = sess.run(&[x], &[]).unwrap_err();
        assert!(err.to_string().contains("input_a"));
    }

    #[test]
    fn reduce_keepdims_keeps_a_unit_axis() {
        let e = engine();
        let x = e.constant(HostBuffer::F32(arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn())).unwrap();
        let r = e.reduce(ReduceOp::Sum, x, Some(1), true).unwrap();
        assert_eq!(e.shape(r).unwrap(), vec![Some(2), Some(1)]);
        let sess = e.clone().new_session().unwrap();
        let out = sess.run(&[r], &[]).unwrap();
        match &out[0] {
            HostBuffer::F32(a) => {
                assert_eq!(a.shape(), &[2, 1]);
                assert_eq!(a.as_slice().unwrap(), &[3.0, 7.0]);
            }
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn softmax_lanes_normalize_to_one() {
        use approx::assert_relative_eq;

        let e = engine();
        let x = e
            .constant(HostBuffer::F32(arr2(&[[1.0f32, 2.0, 3.0], [0.0, 0.0, 0.0]]).into_dyn()))
            .unwrap();
        let y = e.unary(UnaryOp::Softmax, x).unwrap();
        let sess = e.clone().new_session().unwrap();
        let out = sess.run(&[y], &[]).unwrap();
        match &out[0] {
            HostBuffer::F32(a) => {
                for lane in a.rows() {
                    assert_relative_eq!(lane.sum(), 1.0, epsilon = 1e-6);
                }
                assert_relative_eq!(a[[1, 0]], 1.0 / 3.0, epsilon = 1e-6);
            }
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn gradient_nodes_record_but_refuse_to_run() {
        let e = engine();
        let x = e
            .variable(HostBuffer::F32(ndarray::arr1(&[1.0f32]).into_dyn()), None)
            .unwrap();
        let grads = e.gradients(x, &[x]).unwrap();
        assert_eq!(grads.len(), 1);
        let sess = e.clone().new_session().unwrap();
        assert!(sess.run(&[grads[0]], &[]).is_err());
    }
}
