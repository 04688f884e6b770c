//! # Parameter Container
//!
//! [`Block`] owns every learnable tensor of the fuzzy Markov chain:
//!
//! | Tensor | Shape | Meaning |
//! |--------|-------|---------|
//! | `start` | `[states]` | logits of the initial state distribution |
//! | `entries[s].output` | `[alphabet]` | logits of the symbols emitted in state `s` |
//! | `entries[s].transitions[c]` | `[states]` | logits of the next state after `s` reads `c` |
//!
//! Logits are never normalized in place; every use goes through a
//! log-softmax on the tape.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use statebrain_autodiff::Variable;

use crate::config::BlockConfig;
use crate::error::{Result, StatebrainError};

/// One fuzzy Markov state
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    /// Output symbol logits
    pub output: Variable,
    /// Next-state logits, one row per input symbol
    pub transitions: Vec<Variable>,
}

/// Learned states, outputs and transitions of a fuzzy Markov chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub(crate) start: Variable,
    pub(crate) entries: Vec<StateEntry>,
    pub(crate) alphabet_size: usize,
}

impl Block {
    /// Create a randomly initialized block with default init settings
    pub fn new(alphabet_size: usize, state_count: usize) -> Result<Self> {
        Self::with_config(&BlockConfig::new(alphabet_size, state_count))
    }

    /// Create a randomly initialized block.
    ///
    /// The start logits are zero except for `start_bias` on state 0; output
    /// and transition logits are drawn from zero-mean Gaussians.
    pub fn with_config(config: &BlockConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let output_dist = gaussian(config.output_stddev)?;
        let transition_dist = gaussian(config.transition_stddev)?;

        let mut start = vec![0.0; config.state_count];
        start[0] = config.start_bias;

        let entries = (0..config.state_count)
            .map(|_| {
                let output = (0..config.alphabet_size)
                    .map(|_| output_dist.sample(&mut rng))
                    .collect();
                let transitions = (0..config.alphabet_size)
                    .map(|_| {
                        Variable::new(
                            (0..config.state_count)
                                .map(|_| transition_dist.sample(&mut rng))
                                .collect(),
                        )
                    })
                    .collect();
                StateEntry {
                    output: Variable::new(output),
                    transitions,
                }
            })
            .collect();

        tracing::debug!(
            alphabet_size = config.alphabet_size,
            state_count = config.state_count,
            seeded = config.seed.is_some(),
            "created block"
        );

        Ok(Self {
            start: Variable::new(start),
            entries,
            alphabet_size: config.alphabet_size,
        })
    }

    /// Build a block from raw logits, checking every shape.
    ///
    /// `transitions[s][c]` is the next-state logit row for state `s` reading
    /// symbol `c`.
    pub fn from_logits(
        start: Vec<f64>,
        outputs: Vec<Vec<f64>>,
        transitions: Vec<Vec<Vec<f64>>>,
    ) -> Result<Self> {
        let state_count = start.len();
        if state_count == 0 {
            return Err(StatebrainError::InvalidConfig(
                "state count must be positive".to_string(),
            ));
        }
        if outputs.len() != state_count {
            return Err(StatebrainError::shape("output tables", state_count, outputs.len()));
        }
        if transitions.len() != state_count {
            return Err(StatebrainError::shape(
                "transition tables",
                state_count,
                transitions.len(),
            ));
        }
        let alphabet_size = outputs[0].len();
        if alphabet_size == 0 {
            return Err(StatebrainError::InvalidConfig(
                "alphabet size must be positive".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(state_count);
        for (output, rows) in outputs.into_iter().zip(transitions) {
            if output.len() != alphabet_size {
                return Err(StatebrainError::shape("output logits", alphabet_size, output.len()));
            }
            if rows.len() != alphabet_size {
                return Err(StatebrainError::shape("transition rows", alphabet_size, rows.len()));
            }
            if let Some(bad) = rows.iter().find(|row| row.len() != state_count) {
                return Err(StatebrainError::shape("transition logits", state_count, bad.len()));
            }
            entries.push(StateEntry {
                output: Variable::new(output),
                transitions: rows.into_iter().map(Variable::new).collect(),
            });
        }

        Ok(Self {
            start: Variable::new(start),
            entries,
            alphabet_size,
        })
    }

    pub fn state_count(&self) -> usize {
        self.entries.len()
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    /// Initial-state logits
    pub fn start(&self) -> &Variable {
        &self.start
    }

    pub fn entries(&self) -> &[StateEntry] {
        &self.entries
    }

    /// Every learnable tensor: start, then per state its output followed by
    /// its transition rows in symbol order.
    pub fn parameters(&self) -> Vec<&Variable> {
        let mut params = Vec::with_capacity(1 + self.entries.len() * (1 + self.alphabet_size));
        params.push(&self.start);
        for entry in &self.entries {
            params.push(&entry.output);
            params.extend(entry.transitions.iter());
        }
        params
    }

    /// Mutable view in the same order as [`Block::parameters`].
    ///
    /// Callers update values in place; resizing a vector breaks the block.
    pub fn parameters_mut(&mut self) -> Vec<&mut Variable> {
        let mut params = Vec::with_capacity(1 + self.entries.len() * (1 + self.alphabet_size));
        params.push(&mut self.start);
        for entry in &mut self.entries {
            params.push(&mut entry.output);
            params.extend(entry.transitions.iter_mut());
        }
        params
    }
}

fn gaussian(stddev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, stddev).map_err(|e| StatebrainError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        let block = Block::new(4, 3).unwrap();
        assert_eq!(block.state_count(), 3);
        assert_eq!(block.alphabet_size(), 4);
        assert_eq!(block.start().len(), 3);
        for entry in block.entries() {
            assert_eq!(entry.output.len(), 4);
            assert_eq!(entry.transitions.len(), 4);
            assert!(entry.transitions.iter().all(|t| t.len() == 3));
        }
    }

    #[test]
    fn test_start_bias() {
        let block = Block::new(4, 3).unwrap();
        assert_eq!(block.start().vector, vec![100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_empty_shapes() {
        assert!(Block::new(0, 3).is_err());
        assert!(Block::new(4, 0).is_err());
    }

    #[test]
    fn test_seed_is_reproducible() {
        let config = BlockConfig::new(5, 2).with_seed(42);
        let a = Block::with_config(&config).unwrap();
        let b = Block::with_config(&config).unwrap();
        let va: Vec<_> = a.parameters().iter().map(|p| p.vector.clone()).collect();
        let vb: Vec<_> = b.parameters().iter().map(|p| p.vector.clone()).collect();
        assert_eq!(va, vb);
    }

    #[test]
    fn test_parameter_order() {
        let block = Block::new(2, 2).unwrap();
        let params = block.parameters();
        assert_eq!(params.len(), 1 + 2 * (1 + 2));
        assert_eq!(params[0].id, block.start().id);
        assert_eq!(params[1].id, block.entries()[0].output.id);
        assert_eq!(params[2].id, block.entries()[0].transitions[0].id);
        assert_eq!(params[3].id, block.entries()[0].transitions[1].id);
        assert_eq!(params[4].id, block.entries()[1].output.id);

        let again: Vec<_> = block.parameters().iter().map(|p| p.id).collect();
        let first: Vec<_> = params.iter().map(|p| p.id).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_parameters_mut_matches_order() {
        let mut block = Block::new(3, 2).unwrap();
        let ids: Vec<_> = block.parameters().iter().map(|p| p.id).collect();
        let mut_ids: Vec<_> = block.parameters_mut().iter().map(|p| p.id).collect();
        assert_eq!(ids, mut_ids);

        block.parameters_mut()[1].vector[0] = 9.0;
        assert_eq!(block.entries()[0].output.vector[0], 9.0);
    }

    #[test]
    fn test_from_logits_validates() {
        let ok = Block::from_logits(
            vec![0.0, 1.0],
            vec![vec![0.0; 3], vec![0.0; 3]],
            vec![vec![vec![0.0; 2]; 3], vec![vec![0.0; 2]; 3]],
        );
        assert!(ok.is_ok());

        let bad_row = Block::from_logits(
            vec![0.0, 1.0],
            vec![vec![0.0; 3], vec![0.0; 3]],
            vec![vec![vec![0.0; 2]; 3], vec![vec![0.0; 1]; 3]],
        );
        assert!(matches!(bad_row, Err(StatebrainError::ShapeMismatch { .. })));

        let bad_output = Block::from_logits(
            vec![0.0, 1.0],
            vec![vec![0.0; 3], vec![0.0; 2]],
            vec![vec![vec![0.0; 2]; 3], vec![vec![0.0; 2]; 3]],
        );
        assert!(bad_output.is_err());

        assert!(Block::from_logits(vec![], vec![], vec![]).is_err());
    }
}
