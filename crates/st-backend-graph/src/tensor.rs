// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Opaque tensor and variable handles. A handle is a graph node plus the
//! engine that owns it; the adapter never touches the data behind either.

use std::fmt;

use crate::engine::{DType, Engine, HostBuffer, NodeId};
use crate::error::{backend, Result};
use crate::session;

/// Handle to a tensor expression in the engine's graph.
#[derive(Clone)]
pub struct GraphTensor {
    engine: Engine,
    node: NodeId,
}

impl GraphTensor {
    pub fn new(engine: Engine, node: NodeId) -> Self {
        Self { engine, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Static shape as the graph knows it; `None` entries are symbolic.
    pub fn shape(&self) -> Result<Vec<Option<usize>>> {
        self.engine.shape(self.node)
    }

    pub fn ndim(&self) -> Result<usize> {
        Ok(self.shape()?.len())
    }

    pub fn dtype(&self) -> Result<DType> {
        self.engine.dtype(self.node)
    }

    /// Materialize this expression through the process-wide session.
    pub fn eval(&self) -> Result<HostBuffer> {
        let sess = session::current(&self.engine)?;
        let values = sess.run(&[self.node], &[])?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| backend("session returned no value for the fetched node"))
    }
}

impl fmt::Debug for GraphTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphTensor").field("node", &self.node).finish()
    }
}

/// Handle to an assignable variable node. Only variables may be the target
/// of `set_value` and of compiled-function updates.
#[derive(Clone, Debug)]
pub struct Variable {
    tensor: GraphTensor,
}

impl Variable {
    pub fn new(tensor: GraphTensor) -> Self {
        Self { tensor }
    }

    pub fn tensor(&self) -> &GraphTensor {
        &self.tensor
    }

    pub fn node(&self) -> NodeId {
        self.tensor.node()
    }

    pub fn engine(&self) -> &Engine {
        self.tensor.engine()
    }

    pub fn shape(&self) -> Result<Vec<Option<usize>>> {
        self.tensor.shape()
    }

    pub fn dtype(&self) -> Result<DType> {
        self.tensor.dtype()
    }
}

impl From<Variable> for GraphTensor {
    fn from(v: Variable) -> Self {
        v.tensor
    }
}

impl From<&Variable> for GraphTensor {
    fn from(v: &Variable) -> Self {
        v.tensor.clone()
    }
}
