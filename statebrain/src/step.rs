//! # Transition Step
//!
//! One time step of the fuzzy Markov chain, computed entirely in log space.
//! For the incoming distribution `p` and input symbol `c`:
//!
//! ```text
//! output  = logΣ_s [ p_s + log_softmax(output_s) ]
//! next    = logΣ_s [ p_s + log_softmax(transitions_s[c]) ]
//! ```
//!
//! Both are mixtures of valid distributions weighted by `p`, so they stay
//! normalized. The sum over states is folded one state at a time with a
//! stable element-wise `log_add`.
//!
//! The incoming distribution enters the graph as an explicit input leaf;
//! [`StepResult::propagate`] returns its gradient so the runner can pass it
//! to the previous step. On steps built by [`Block::step_r`],
//! [`StepResult::propagate_r`] also carries the directional derivative of
//! every gradient, which is a Hessian-vector product for the parameters.

use statebrain_autodiff::{AutodiffError, Gradient, NodeId, RGradient, RVector, Tape, ops};

use crate::block::Block;
use crate::error::{Result, StatebrainError};
use crate::state::StateDist;

/// Output of one step together with the graph that produced it.
///
/// Not `Clone`: the graph is consumed by exactly one [`StepResult::propagate`].
#[derive(Debug)]
pub struct StepResult {
    tape: Tape,
    state_leaf: NodeId,
    output: NodeId,
    next_state: NodeId,
    symbol: usize,
}

impl StepResult {
    /// Input symbol the step consumed
    pub fn symbol(&self) -> usize {
        self.symbol
    }

    /// Output-symbol log-distribution
    pub fn output(&self) -> &[f64] {
        self.tape.value(self.output)
    }

    /// Directional derivative of the output on R-operator runs
    pub fn output_tangent(&self) -> Option<&[f64]> {
        self.tape.tangent(self.output)
    }

    /// Outgoing state log-distribution, ready to feed the next step
    pub fn next_state(&self) -> StateDist {
        StateDist {
            log_probs: self.tape.value(self.next_state).to_vec(),
            tangent: self.tape.tangent(self.next_state).map(<[f64]>::to_vec),
        }
    }

    /// Back-propagate upstream gradients through the step.
    ///
    /// `output_grad` is dLoss/dOutput and `state_grad` dLoss/dNextState; pass
    /// `None` for whichever no loss depends on. Parameter gradients are added
    /// into `grad`. Returns dLoss/dIncomingState.
    pub fn propagate(
        self,
        output_grad: Option<&[f64]>,
        state_grad: Option<&[f64]>,
        grad: &mut Gradient,
    ) -> Result<Vec<f64>> {
        let mut seeds = Vec::with_capacity(2);
        if let Some(upstream) = self.checked("output gradient", self.output, output_grad)? {
            seeds.push((self.output, upstream));
        }
        if let Some(upstream) = self.checked("next state gradient", self.next_state, state_grad)? {
            seeds.push((self.next_state, upstream));
        }

        let state_len = self.tape.value(self.state_leaf).len();
        if seeds.is_empty() {
            return Ok(vec![0.0; state_len]);
        }
        let leaf = self.state_leaf;
        let mut leaves = self.tape.backward(&seeds, grad)?;
        Ok(leaves.take_or_zeros(leaf, state_len))
    }

    /// Forward-over-reverse counterpart of [`StepResult::propagate`].
    ///
    /// Each `*_r` argument is the directional derivative of the upstream
    /// gradient next to it; a missing half of a pair counts as zeros. The
    /// R-part of every parameter gradient is added into `rgrad`, the plain
    /// part into `grad` when one is given. Returns dLoss/dIncomingState and
    /// its directional derivative.
    ///
    /// Only steps built by [`Block::step_r`] carry the tangents this needs.
    pub fn propagate_r(
        self,
        output_grad: Option<&[f64]>,
        output_grad_r: Option<&[f64]>,
        state_grad: Option<&[f64]>,
        state_grad_r: Option<&[f64]>,
        rgrad: &mut RGradient,
        grad: Option<&mut Gradient>,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        if !self.tape.has_tangents() {
            return Err(AutodiffError::MissingTangents.into());
        }
        let pairs = [
            (self.output, "output gradient", output_grad, output_grad_r),
            (self.next_state, "next state gradient", state_grad, state_grad_r),
        ];
        let mut seeds = Vec::with_capacity(2);
        for (node, what, upstream, upstream_r) in pairs {
            let upstream = self.checked(what, node, upstream)?;
            let upstream_r = self.checked(what, node, upstream_r)?;
            if upstream.is_none() && upstream_r.is_none() {
                continue;
            }
            let len = self.tape.value(node).len();
            seeds.push((
                node,
                upstream.unwrap_or_else(|| vec![0.0; len]),
                upstream_r.unwrap_or_else(|| vec![0.0; len]),
            ));
        }

        let state_len = self.tape.value(self.state_leaf).len();
        if seeds.is_empty() {
            return Ok((vec![0.0; state_len], vec![0.0; state_len]));
        }
        let leaf = self.state_leaf;
        let (mut leaves, mut r_leaves) = self.tape.backward_r(&seeds, rgrad, grad)?;
        Ok((
            leaves.take_or_zeros(leaf, state_len),
            r_leaves.take_or_zeros(leaf, state_len),
        ))
    }

    /// Length-checked copy of an upstream gradient for `node`
    fn checked(&self, what: &'static str, node: NodeId, upstream: Option<&[f64]>) -> Result<Option<Vec<f64>>> {
        let Some(upstream) = upstream else {
            return Ok(None);
        };
        let expected = self.tape.value(node).len();
        if upstream.len() != expected {
            return Err(StatebrainError::shape(what, expected, upstream.len()));
        }
        Ok(Some(upstream.to_vec()))
    }
}

impl Block {
    /// Run one step on a vector of symbol scores.
    ///
    /// The scores are reduced to a hard symbol by arg-max (lowest index on
    /// ties) before any transition row is read.
    pub fn step(&self, input_scores: &[f64], state: &StateDist) -> Result<StepResult> {
        self.check_scores(input_scores)?;
        self.step_symbol(ops::max_index(input_scores), state)
    }

    /// Run one step on a discrete symbol
    pub fn step_symbol(&self, symbol: usize, state: &StateDist) -> Result<StepResult> {
        self.mixture(Tape::new(), symbol, state)
    }

    /// Like [`Block::step`], propagating tangents along `rv` and along the
    /// incoming state's own tangent
    pub fn step_r(&self, rv: &RVector, input_scores: &[f64], state: &StateDist) -> Result<StepResult> {
        self.check_scores(input_scores)?;
        self.mixture(
            Tape::with_tangents(rv.clone()),
            ops::max_index(input_scores),
            state,
        )
    }

    fn check_scores(&self, input_scores: &[f64]) -> Result<()> {
        if input_scores.len() != self.alphabet_size {
            return Err(StatebrainError::shape(
                "input scores",
                self.alphabet_size,
                input_scores.len(),
            ));
        }
        Ok(())
    }

    fn mixture(&self, mut tape: Tape, symbol: usize, state: &StateDist) -> Result<StepResult> {
        if symbol >= self.alphabet_size {
            return Err(StatebrainError::SymbolOutOfRange {
                symbol,
                alphabet_size: self.alphabet_size,
            });
        }
        if state.len() != self.state_count() {
            return Err(StatebrainError::shape("incoming state", self.state_count(), state.len()));
        }
        if let Some(tangent) = &state.tangent {
            if tangent.len() != state.len() {
                return Err(StatebrainError::shape(
                    "incoming state tangent",
                    state.len(),
                    tangent.len(),
                ));
            }
        }

        let state_leaf = tape.input(state.log_probs.clone(), state.tangent.clone());

        let mut acc: Option<(NodeId, NodeId)> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let output_logits = tape.variable(&entry.output);
            let trans_logits = tape.variable(&entry.transitions[symbol]);
            let outputs = tape.log_softmax(output_logits);
            let transitions = tape.log_softmax(trans_logits);

            let prob_log = tape.slice(state_leaf, idx..idx + 1);
            let scaled_out = tape.add_first(outputs, prob_log);
            let scaled_states = tape.add_first(transitions, prob_log);

            acc = Some(match acc {
                None => (scaled_out, scaled_states),
                Some((output, next_state)) => (
                    tape.log_add(output, scaled_out),
                    tape.log_add(next_state, scaled_states),
                ),
            });
        }
        let (output, next_state) = acc.ok_or_else(|| {
            StatebrainError::InvalidConfig("state count must be positive".to_string())
        })?;

        tracing::trace!(symbol, nodes = tape.len(), "step");

        Ok(StepResult {
            tape,
            state_leaf,
            output,
            next_state,
            symbol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockConfig;
    use crate::loss::one_hot;

    fn block() -> Block {
        Block::with_config(&BlockConfig::new(4, 3).with_seed(11)).unwrap()
    }

    fn log_sum(values: &[f64]) -> f64 {
        values.iter().map(|v| v.exp()).sum()
    }

    #[test]
    fn test_step_outputs_are_distributions() {
        let block = block();
        let start = block.initial_state().distribution();
        let step = block.step(&[0.0, 0.0, 1.0, 0.0], &start).unwrap();
        assert_eq!(step.symbol(), 2);
        assert!((log_sum(step.output()) - 1.0).abs() < 1e-9);
        assert!((log_sum(&step.next_state().log_probs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_matches_explicit_mixture() {
        let block = block();
        let state = StateDist::new(vec![0.2f64.ln(), 0.5f64.ln(), 0.3f64.ln()]);
        let step = block.step_symbol(1, &state).unwrap();

        let probs = state.probabilities();
        for k in 0..4 {
            let expected: f64 = block
                .entries()
                .iter()
                .zip(&probs)
                .map(|(e, p)| p * ops::softmax(&e.output.vector)[k])
                .sum();
            assert!((step.output()[k].exp() - expected).abs() < 1e-12);
        }
        for j in 0..3 {
            let expected: f64 = block
                .entries()
                .iter()
                .zip(&probs)
                .map(|(e, p)| p * ops::softmax(&e.transitions[1].vector)[j])
                .sum();
            assert!((step.next_state().log_probs[j].exp() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_tie_break_picks_lowest_index() {
        let block = block();
        let start = block.initial_state().distribution();
        let step = block.step(&[0.1, 0.9, 0.0, 0.9], &start).unwrap();
        assert_eq!(step.symbol(), 1);
    }

    #[test]
    fn test_step_is_deterministic() {
        let block = block();
        let start = block.initial_state().distribution();
        let a = block.step_symbol(3, &start).unwrap();
        let b = block.step_symbol(3, &start).unwrap();
        assert_eq!(a.output(), b.output());
        assert_eq!(a.next_state(), b.next_state());
    }

    #[test]
    fn test_certain_state_selects_entry() {
        let block = block();
        let step = block.step_symbol(0, &StateDist::certain(2, 3)).unwrap();
        let expected = ops::log_softmax(&block.entries()[2].output.vector);
        for (got, want) in step.output().iter().zip(&expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_contract_violations() {
        let block = block();
        let start = block.initial_state().distribution();
        assert!(matches!(
            block.step(&[1.0, 0.0], &start),
            Err(StatebrainError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            block.step_symbol(4, &start),
            Err(StatebrainError::SymbolOutOfRange { .. })
        ));
        assert!(matches!(
            block.step_symbol(0, &StateDist::uniform(2)),
            Err(StatebrainError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_propagate_without_upstream_is_noop() {
        let block = block();
        let start = block.initial_state().distribution();
        let step = block.step_symbol(0, &start).unwrap();
        let mut grad = Gradient::new();
        let ds = step.propagate(None, None, &mut grad).unwrap();
        assert_eq!(ds, vec![0.0; 3]);
        assert!(grad.is_empty());
    }

    #[test]
    fn test_propagate_rejects_bad_upstream() {
        let block = block();
        let start = block.initial_state().distribution();
        let step = block.step_symbol(0, &start).unwrap();
        let mut grad = Gradient::new();
        let err = step.propagate(Some(&[1.0; 3][..]), None, &mut grad).unwrap_err();
        assert!(matches!(err, StatebrainError::ShapeMismatch { what: "output gradient", .. }));
        assert!(grad.is_empty());
    }

    #[test]
    fn test_propagate_r_without_upstream_is_noop() {
        let block = block();
        let rv = RVector::new();
        let start = block.initial_state_r(&rv).distribution();
        let step = block.step_r(&rv, &one_hot(1, 4), &start).unwrap();
        let mut rgrad = RGradient::new();
        let (ds, rds) = step
            .propagate_r(None, None, None, None, &mut rgrad, None)
            .unwrap();
        assert_eq!(ds, vec![0.0; 3]);
        assert_eq!(rds, vec![0.0; 3]);
        assert!(rgrad.is_empty());
    }

    #[test]
    fn test_propagate_r_plain_half_matches_propagate() {
        let block = block();
        let mut rv = RVector::new();
        for param in block.parameters() {
            rv.insert(param, vec![0.5; param.len()]);
        }
        let state = StateDist::new(ops::log_softmax(&[0.2, -0.3, 0.4]));
        let upstream = [1.0, -0.5, 0.25, 2.0];

        let mut grad = Gradient::new();
        let ds = block
            .step_symbol(2, &state)
            .unwrap()
            .propagate(Some(&upstream[..]), None, &mut grad)
            .unwrap();

        let mut rgrad = RGradient::new();
        let mut grad_r = Gradient::new();
        let (ds_r, _) = block
            .step_r(&rv, &one_hot(2, 4), &state)
            .unwrap()
            .propagate_r(Some(&upstream[..]), None, None, None, &mut rgrad, Some(&mut grad_r))
            .unwrap();

        for (a, b) in ds.iter().zip(&ds_r) {
            assert!((a - b).abs() < 1e-12);
        }
        for param in block.parameters() {
            assert_eq!(grad.contains(param.id), grad_r.contains(param.id));
            assert_eq!(grad.contains(param.id), rgrad.contains(param.id));
        }
    }

    #[test]
    fn test_propagate_r_needs_tangent_step() {
        let block = block();
        let start = block.initial_state().distribution();
        let step = block.step_symbol(0, &start).unwrap();
        let mut rgrad = RGradient::new();
        let err = step
            .propagate_r(Some(&[1.0; 4][..]), None, None, None, &mut rgrad, None)
            .unwrap_err();
        assert!(matches!(err, StatebrainError::Autodiff(AutodiffError::MissingTangents)));
    }

    #[test]
    fn test_propagate_r_rejects_bad_tangent_upstream() {
        let block = block();
        let rv = RVector::new();
        let start = block.initial_state_r(&rv).distribution();
        let step = block.step_r(&rv, &one_hot(0, 4), &start).unwrap();
        let mut rgrad = RGradient::new();
        let err = step
            .propagate_r(None, None, None, Some(&[1.0; 4][..]), &mut rgrad, None)
            .unwrap_err();
        assert!(matches!(err, StatebrainError::ShapeMismatch { what: "next state gradient", .. }));
        assert!(rgrad.is_empty());
    }

    #[test]
    fn test_state_gradient_only_touches_used_row() {
        let block = block();
        let state = StateDist::uniform(3);
        let step = block.step_symbol(2, &state).unwrap();
        let mut grad = Gradient::new();
        step.propagate(None, Some(&[1.0, -1.0, 0.5][..]), &mut grad).unwrap();

        for entry in block.entries() {
            assert!(!grad.contains(entry.output.id));
            for (c, row) in entry.transitions.iter().enumerate() {
                assert_eq!(grad.contains(row.id), c == 2);
            }
        }
    }
}
