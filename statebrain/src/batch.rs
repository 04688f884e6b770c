//! # Batch Interface
//!
//! Independent `(input, state)` pairs stepped together. Items never interact:
//! each one builds its own graph and, during propagation, writes into its own
//! [`Gradient`]. The partial maps are merged into the caller's map in item
//! order, so the totals do not depend on worker scheduling.
//!
//! With the `parallel` feature (on by default) the items run on rayon
//! workers. The sequential path is what `--no-default-features` builds;
//! the test build always compiles it and checks it against the default
//! path, and `cargo test -p statebrain --no-default-features` runs the
//! whole suite on it.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use statebrain_autodiff::Gradient;

use crate::block::Block;
use crate::error::{Result, StatebrainError};
use crate::state::StateDist;
use crate::step::StepResult;

/// One batch entry: symbol scores and the incoming state
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub input: Vec<f64>,
    pub state: StateDist,
}

impl BatchItem {
    pub fn new(input: Vec<f64>, state: StateDist) -> Self {
        Self { input, state }
    }
}

/// Per-item step results of a batch
#[derive(Debug)]
pub struct BatchResult {
    steps: Vec<StepResult>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn outputs(&self) -> Vec<&[f64]> {
        self.steps.iter().map(StepResult::output).collect()
    }

    pub fn next_states(&self) -> Vec<StateDist> {
        self.steps.iter().map(StepResult::next_state).collect()
    }

    /// Propagate per-item upstream gradients.
    ///
    /// `output_grads` holds one gradient per item (or `None` for the whole
    /// batch); `state_grads` likewise, with per-item `None` for items whose
    /// next state feeds no loss. Returns the incoming-state gradient of every
    /// item.
    pub fn propagate(
        self,
        output_grads: Option<&[Vec<f64>]>,
        state_grads: Option<&[Option<Vec<f64>>]>,
        grad: &mut Gradient,
    ) -> Result<Vec<Vec<f64>>> {
        let n = self.steps.len();
        if let Some(grads) = output_grads {
            if grads.len() != n {
                return Err(StatebrainError::shape("batch output gradients", n, grads.len()));
            }
        }
        if let Some(grads) = state_grads {
            if grads.len() != n {
                return Err(StatebrainError::shape("batch state gradients", n, grads.len()));
            }
        }

        #[cfg(feature = "parallel")]
        let results = propagate_items_parallel(self.steps, output_grads, state_grads)?;
        #[cfg(not(feature = "parallel"))]
        let results = propagate_items_sequential(self.steps, output_grads, state_grads)?;

        let mut state_upstreams = Vec::with_capacity(n);
        for (upstream, partial) in results {
            grad.merge(partial);
            state_upstreams.push(upstream);
        }
        Ok(state_upstreams)
    }
}

impl Block {
    /// Step every item of a batch
    pub fn apply_batch(&self, items: &[BatchItem]) -> Result<BatchResult> {
        tracing::debug!(items = items.len(), "applying batch");

        #[cfg(feature = "parallel")]
        let steps = items
            .par_iter()
            .map(|item| self.step(&item.input, &item.state))
            .collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "parallel"))]
        let steps = step_items_sequential(self, items)?;

        Ok(BatchResult { steps })
    }
}

/// Incoming-state gradient of one item and the parameter gradient it produced
type ItemOutcome = (Vec<f64>, Gradient);

fn propagate_item(
    i: usize,
    step: StepResult,
    output_grads: Option<&[Vec<f64>]>,
    state_grads: Option<&[Option<Vec<f64>>]>,
) -> Result<ItemOutcome> {
    let mut partial = Gradient::new();
    let out = output_grads.map(|g| g[i].as_slice());
    let next = state_grads.and_then(|g| g[i].as_deref());
    let upstream = step.propagate(out, next, &mut partial)?;
    Ok((upstream, partial))
}

#[cfg(feature = "parallel")]
fn propagate_items_parallel(
    steps: Vec<StepResult>,
    output_grads: Option<&[Vec<f64>]>,
    state_grads: Option<&[Option<Vec<f64>>]>,
) -> Result<Vec<ItemOutcome>> {
    steps
        .into_par_iter()
        .enumerate()
        .map(|(i, step)| propagate_item(i, step, output_grads, state_grads))
        .collect()
}

#[cfg(any(test, not(feature = "parallel")))]
fn propagate_items_sequential(
    steps: Vec<StepResult>,
    output_grads: Option<&[Vec<f64>]>,
    state_grads: Option<&[Option<Vec<f64>>]>,
) -> Result<Vec<ItemOutcome>> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| propagate_item(i, step, output_grads, state_grads))
        .collect()
}

#[cfg(any(test, not(feature = "parallel")))]
fn step_items_sequential(block: &Block, items: &[BatchItem]) -> Result<Vec<StepResult>> {
    items
        .iter()
        .map(|item| block.step(&item.input, &item.state))
        .collect()
}
