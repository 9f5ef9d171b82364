// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Sequential recurrent driver: unrolls a step function across the time
//! axis of a `(samples, time, input)` tensor, carrying a state vector
//! forward and collecting per-step outputs.

use crate::error::{Error, Result};
use crate::tensor::GraphTensor;

/// Iterate over the time dimension of `inputs` (at least 3-D,
/// `(samples, time, ...)`).
///
/// `step` receives the input slice for one time step, `(samples, ...)`, and
/// the current state list, and returns the step output plus the successor
/// states (same length and shapes as the states that went in).
/// `go_backwards` unrolls in reverse time order.
///
/// Returns `(last_output, outputs, new_states)` where `outputs` is stacked
/// back into `(samples, time, ...)` layout.
///
/// `masking` is declared for API compatibility but unimplemented; enabling
/// it always fails.
pub fn rnn<F>(
    mut step: F,
    inputs: &GraphTensor,
    initial_states: &[GraphTensor],
    go_backwards: bool,
    masking: bool,
) -> Result<(GraphTensor, GraphTensor, Vec<GraphTensor>)>
where
    F: FnMut(&GraphTensor, &[GraphTensor]) -> Result<(GraphTensor, Vec<GraphTensor>)>,
{
    if masking {
        return Err(Error::MaskingUnsupported);
    }
    let engine = inputs.engine().clone();

    // Time-major so each unstacked slice is one step's batch.
    let time_major = engine.permute(inputs.node(), &[1, 0, 2])?;
    let mut steps = engine.unstack(time_major)?;
    if steps.is_empty() {
        return Err(Error::EmptyInput("rnn"));
    }
    if go_backwards {
        steps.reverse();
    }

    let mut states: Vec<GraphTensor> = initial_states.to_vec();
    let mut successive_outputs: Vec<GraphTensor> = Vec::with_capacity(steps.len());
    for node in steps {
        let input = GraphTensor::new(engine.clone(), node);
        let (output, new_states) = step(&input, &states)?;
        states = new_states;
        successive_outputs.push(output);
    }

    let last_output = successive_outputs
        .last()
        .cloned()
        .ok_or(Error::EmptyInput("rnn"))?;
    let nodes: Vec<_> = successive_outputs.iter().map(|t| t.node()).collect();
    let stacked = engine.stack(&nodes)?;
    let outputs = engine.permute(stacked, &[1, 0, 2])?;

    Ok((
        last_output,
        GraphTensor::new(engine, outputs),
        states,
    ))
}

/// Scalar-condition branch selection, delegated to the engine's lazy
/// conditional.
pub fn switch(
    condition: &GraphTensor,
    then_expression: &GraphTensor,
    else_expression: &GraphTensor,
) -> Result<GraphTensor> {
    let engine = condition.engine().clone();
    let node = engine.cond(
        condition.node(),
        then_expression.node(),
        else_expression.node(),
    )?;
    Ok(GraphTensor::new(engine, node))
}
