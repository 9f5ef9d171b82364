// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Deferred execution: a compiled function binds ordered placeholder inputs
//! to session execution and attaches variable-update side effects.

use tracing::trace;

use crate::engine::{Engine, HostBuffer, NodeId};
use crate::error::{Error, Result};
use crate::session;
use crate::tensor::{GraphTensor, Variable};

/// A fixed binding of placeholder inputs, output expressions and
/// `(variable, new value)` update pairs. The update assigns are lowered once
/// at construction; every call runs outputs and updates in a single session
/// step and returns only the outputs.
pub struct CompiledFunction {
    engine: Engine,
    inputs: Vec<GraphTensor>,
    outputs: Vec<GraphTensor>,
    updates: Vec<NodeId>,
}

impl CompiledFunction {
    pub fn new(
        inputs: Vec<GraphTensor>,
        outputs: Vec<GraphTensor>,
        updates: Vec<(Variable, GraphTensor)>,
    ) -> Result<Self> {
        let engine = outputs
            .first()
            .map(|t| t.engine().clone())
            .or_else(|| inputs.first().map(|t| t.engine().clone()))
            .or_else(|| updates.first().map(|(v, _)| v.engine().clone()))
            .ok_or(Error::EmptyInput("compiled function"))?;
        let mut update_ops = Vec::with_capacity(updates.len());
        for (target, new_value) in &updates {
            update_ops.push(engine.assign(target.node(), new_value.node())?);
        }
        Ok(Self {
            engine,
            inputs,
            outputs,
            updates: update_ops,
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Invoke with one concrete value per declared input, in declaration
    /// order. Updates run in the same session step as the outputs.
    pub fn call(&self, values: &[HostBuffer]) -> Result<Vec<HostBuffer>> {
        if values.len() != self.inputs.len() {
            return Err(Error::ArityMismatch {
                expected: self.inputs.len(),
                got: values.len(),
            });
        }
        trace!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            updates = self.updates.len(),
            "invoking compiled function"
        );
        let feeds: Vec<(NodeId, HostBuffer)> = self
            .inputs
            .iter()
            .map(|t| t.node())
            .zip(values.iter().cloned())
            .collect();
        let mut fetches: Vec<NodeId> = self.outputs.iter().map(|t| t.node()).collect();
        fetches.extend_from_slice(&self.updates);
        let sess = session::current(&self.engine)?;
        let mut results = sess.run(&fetches, &feeds)?;
        results.truncate(self.outputs.len());
        Ok(results)
    }
}

/// Construct a [`CompiledFunction`].
pub fn function(
    inputs: Vec<GraphTensor>,
    outputs: Vec<GraphTensor>,
    updates: Vec<(Variable, GraphTensor)>,
) -> Result<CompiledFunction> {
    CompiledFunction::new(inputs, outputs, updates)
}

/// Symbolic gradients of `loss` with respect to `variables`, entirely the
/// engine's affair.
pub fn gradients(loss: &GraphTensor, variables: &[GraphTensor]) -> Result<Vec<GraphTensor>> {
    let engine = loss.engine().clone();
    let wrt: Vec<NodeId> = variables.iter().map(|v| v.node()).collect();
    let nodes = engine.gradients(loss.node(), &wrt)?;
    Ok(nodes
        .into_iter()
        .map(|n| GraphTensor::new(engine.clone(), n))
        .collect())
}
