//! # State Distributions
//!
//! A [`StateDist`] is the transient value threaded between steps: one
//! log-probability per latent state. The block never stores it.
//!
//! [`StartState`] keeps the graph from `start` logits to the initial
//! distribution alive until the runner hands back its gradient.

use statebrain_autodiff::{AutodiffError, Gradient, NodeId, RGradient, RVector, Tape};

use crate::block::Block;
use crate::error::{Result, StatebrainError};

/// Log-probabilities over the latent states.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDist {
    pub log_probs: Vec<f64>,
    /// Directional derivative of `log_probs`, present on R-operator runs
    pub tangent: Option<Vec<f64>>,
}

impl StateDist {
    pub fn new(log_probs: Vec<f64>) -> Self {
        Self {
            log_probs,
            tangent: None,
        }
    }

    pub fn with_tangent(log_probs: Vec<f64>, tangent: Vec<f64>) -> Self {
        Self {
            log_probs,
            tangent: Some(tangent),
        }
    }

    /// Uniform distribution over `state_count` states
    pub fn uniform(state_count: usize) -> Self {
        let lp = -(state_count as f64).ln();
        Self::new(vec![lp; state_count])
    }

    /// Certainty of being in `state`.
    ///
    /// Zero-probability states hold `-inf`; such a distribution feeds forward
    /// fine but yields no gradient for the excluded states.
    ///
    /// # Panics
    ///
    /// If `state >= state_count`.
    pub fn certain(state: usize, state_count: usize) -> Self {
        assert!(
            state < state_count,
            "state {state} out of range for {state_count} states"
        );
        let mut lp = vec![f64::NEG_INFINITY; state_count];
        lp[state] = 0.0;
        Self::new(lp)
    }

    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    /// Exponentiated distribution
    pub fn probabilities(&self) -> Vec<f64> {
        self.log_probs.iter().map(|lp| lp.exp()).collect()
    }
}

/// The initial distribution with its path back to the `start` logits.
#[derive(Debug)]
pub struct StartState {
    tape: Tape,
    node: NodeId,
}

impl StartState {
    /// Initial log-distribution (and its tangent on R-operator runs)
    pub fn distribution(&self) -> StateDist {
        StateDist {
            log_probs: self.tape.value(self.node).to_vec(),
            tangent: self.tape.tangent(self.node).map(<[f64]>::to_vec),
        }
    }

    /// Propagate dLoss/dInitialState into the `start` logits.
    pub fn propagate(self, upstream: &[f64], grad: &mut Gradient) -> Result<()> {
        let expected = self.tape.value(self.node).len();
        if upstream.len() != expected {
            return Err(StatebrainError::shape("start state gradient", expected, upstream.len()));
        }
        self.tape.backward(&[(self.node, upstream.to_vec())], grad)?;
        Ok(())
    }

    /// Forward-over-reverse counterpart of [`StartState::propagate`] for a
    /// start built by [`Block::initial_state_r`].
    pub fn propagate_r(
        self,
        upstream: &[f64],
        upstream_r: &[f64],
        rgrad: &mut RGradient,
        grad: Option<&mut Gradient>,
    ) -> Result<()> {
        if !self.tape.has_tangents() {
            return Err(AutodiffError::MissingTangents.into());
        }
        let expected = self.tape.value(self.node).len();
        for len in [upstream.len(), upstream_r.len()] {
            if len != expected {
                return Err(StatebrainError::shape("start state gradient", expected, len));
            }
        }
        self.tape.backward_r(
            &[(self.node, upstream.to_vec(), upstream_r.to_vec())],
            rgrad,
            grad,
        )?;
        Ok(())
    }
}

impl Block {
    /// Log-softmax of the `start` logits
    pub fn initial_state(&self) -> StartState {
        start_state(self, Tape::new())
    }

    /// Like [`Block::initial_state`], with tangents along `rv`
    pub fn initial_state_r(&self, rv: &RVector) -> StartState {
        start_state(self, Tape::with_tangents(rv.clone()))
    }
}

fn start_state(block: &Block, mut tape: Tape) -> StartState {
    let logits = tape.variable(&block.start);
    let node = tape.log_softmax(logits);
    StartState { tape, node }
}
