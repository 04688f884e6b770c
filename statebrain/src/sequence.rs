//! # Sequence Runner
//!
//! [`RecurrentBlock`] is the contract a runner needs from a block: a start
//! distribution, a step, and the parameter list. [`run_sequence`] chains the
//! steps; [`SequenceRun::propagate`] walks them backwards, handing each
//! step's incoming-state gradient to the step before it and finally to the
//! start distribution. [`run_sequence_r`] and [`SequenceRun::propagate_r`]
//! do the same with the R-operator channel switched on, yielding
//! Hessian-vector products.
//!
//! Steps are inherently sequential: step `t` needs the state produced by
//! step `t - 1`. Parallelism belongs across sequences (see [`crate::batch`]).

use statebrain_autodiff::{Gradient, RGradient, RVector, Variable};

use crate::block::Block;
use crate::error::{Result, StatebrainError};
use crate::state::{StartState, StateDist};
use crate::step::StepResult;

/// What a sequence runner drives.
pub trait RecurrentBlock {
    /// Length of the state distribution
    fn state_size(&self) -> usize;

    /// Length of the input scores and output distribution
    fn output_size(&self) -> usize;

    fn initial_state(&self) -> StartState;

    /// `(scores, incoming state) -> (output, next state)` plus its graph
    fn apply(&self, input: &[f64], state: &StateDist) -> Result<StepResult>;

    fn parameters(&self) -> Vec<&Variable>;
}

impl RecurrentBlock for Block {
    fn state_size(&self) -> usize {
        self.state_count()
    }

    fn output_size(&self) -> usize {
        self.alphabet_size()
    }

    fn initial_state(&self) -> StartState {
        Block::initial_state(self)
    }

    fn apply(&self, input: &[f64], state: &StateDist) -> Result<StepResult> {
        self.step(input, state)
    }

    fn parameters(&self) -> Vec<&Variable> {
        Block::parameters(self)
    }
}

/// A forward pass over a whole sequence, kept for back-propagation
#[derive(Debug)]
pub struct SequenceRun {
    start: StartState,
    steps: Vec<StepResult>,
}

impl SequenceRun {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Output log-distribution of every step
    pub fn outputs(&self) -> Vec<Vec<f64>> {
        self.steps.iter().map(|s| s.output().to_vec()).collect()
    }

    /// State after the last step (the start distribution for an empty run)
    pub fn final_state(&self) -> StateDist {
        self.steps
            .last()
            .map(StepResult::next_state)
            .unwrap_or_else(|| self.start.distribution())
    }

    /// Back-propagation through time.
    ///
    /// `output_grads[t]` is dLoss/dOutput at step `t`; `final_state_grad` is
    /// dLoss/dFinalState when the loss reads it. Every length is checked
    /// before anything is written, and `grad` only changes on success.
    pub fn propagate(
        self,
        output_grads: &[Vec<f64>],
        final_state_grad: Option<&[f64]>,
        grad: &mut Gradient,
    ) -> Result<()> {
        self.check_upstream(output_grads, final_state_grad)?;

        let mut local = Gradient::new();
        let mut upstream: Option<Vec<f64>> = final_state_grad.map(<[f64]>::to_vec);
        for (step, out_grad) in self.steps.into_iter().zip(output_grads).rev() {
            let state_grad = step.propagate(Some(out_grad), upstream.as_deref(), &mut local)?;
            upstream = Some(state_grad);
        }
        if let Some(state_grad) = upstream {
            self.start.propagate(&state_grad, &mut local)?;
        }

        grad.merge(local);
        Ok(())
    }

    /// Forward-over-reverse back-propagation through time on a run from
    /// [`run_sequence_r`].
    ///
    /// The upstream gradients are held constant along the direction, which
    /// is exact for losses linear in the outputs such as the negative
    /// log-likelihood. Adds the Hessian-vector product into `rgrad` and the
    /// plain gradient into `grad` when one is given; neither changes on
    /// error.
    pub fn propagate_r(
        self,
        output_grads: &[Vec<f64>],
        final_state_grad: Option<&[f64]>,
        rgrad: &mut RGradient,
        grad: Option<&mut Gradient>,
    ) -> Result<()> {
        self.check_upstream(output_grads, final_state_grad)?;

        let mut local_r = RGradient::new();
        let mut local = grad.is_some().then(Gradient::new);
        let mut upstream: Option<(Vec<f64>, Vec<f64>)> =
            final_state_grad.map(|g| (g.to_vec(), vec![0.0; g.len()]));
        for (step, out_grad) in self.steps.into_iter().zip(output_grads).rev() {
            let (state_grad, state_grad_r) = match &upstream {
                Some((g, r)) => (Some(g.as_slice()), Some(r.as_slice())),
                None => (None, None),
            };
            let next = step.propagate_r(
                Some(out_grad),
                None,
                state_grad,
                state_grad_r,
                &mut local_r,
                local.as_mut(),
            )?;
            upstream = Some(next);
        }
        if let Some((state_grad, state_grad_r)) = upstream {
            self.start
                .propagate_r(&state_grad, &state_grad_r, &mut local_r, local.as_mut())?;
        }

        rgrad.merge(local_r);
        if let (Some(grad), Some(local)) = (grad, local) {
            grad.merge(local);
        }
        Ok(())
    }

    fn check_upstream(&self, output_grads: &[Vec<f64>], final_state_grad: Option<&[f64]>) -> Result<()> {
        if output_grads.len() != self.steps.len() {
            return Err(StatebrainError::shape(
                "sequence output gradients",
                self.steps.len(),
                output_grads.len(),
            ));
        }
        for (step, out_grad) in self.steps.iter().zip(output_grads) {
            if out_grad.len() != step.output().len() {
                return Err(StatebrainError::shape(
                    "output gradient",
                    step.output().len(),
                    out_grad.len(),
                ));
            }
        }
        if let Some(state_grad) = final_state_grad {
            let expected = self.final_state().len();
            if state_grad.len() != expected {
                return Err(StatebrainError::shape(
                    "final state gradient",
                    expected,
                    state_grad.len(),
                ));
            }
        }
        Ok(())
    }
}

/// Run `block` over `inputs`, starting from its initial distribution
pub fn run_sequence<B: RecurrentBlock>(block: &B, inputs: &[Vec<f64>]) -> Result<SequenceRun> {
    let start = block.initial_state();
    let mut state = start.distribution();
    let mut steps = Vec::with_capacity(inputs.len());
    for input in inputs {
        let step = block.apply(input, &state)?;
        state = step.next_state();
        steps.push(step);
    }
    tracing::debug!(steps = steps.len(), "ran sequence");
    Ok(SequenceRun { start, steps })
}

/// Like [`run_sequence`], propagating tangents along `rv` through every step
pub fn run_sequence_r(block: &Block, rv: &RVector, inputs: &[Vec<f64>]) -> Result<SequenceRun> {
    let start = block.initial_state_r(rv);
    let mut state = start.distribution();
    let mut steps = Vec::with_capacity(inputs.len());
    for input in inputs {
        let step = block.step_r(rv, input, &state)?;
        state = step.next_state();
        steps.push(step);
    }
    tracing::debug!(steps = steps.len(), "ran sequence with tangents");
    Ok(SequenceRun { start, steps })
}
