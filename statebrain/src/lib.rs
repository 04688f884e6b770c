//! # 🧠 Statebrain - Fuzzy Markov Block
//!
//! A recurrent block that behaves like a soft ("fuzzy") Markov chain. The
//! block holds learned logits for the start distribution, for each state's
//! output symbols and for each state's transitions per input symbol. Every
//! step mixes these per-state distributions by the current state
//! distribution, entirely in log space, and records a graph that yields
//! exact gradients for every parameter and for the incoming state.
//!
//! ## Architecture
//!
//! ```text
//!               ┌──────────────── Block ─────────────────┐
//!               │ start │ outputs[s] │ transitions[s][c] │
//!               └───┬───────────┬─────────────┬──────────┘
//!                   │           │             │
//!  initial_state ◄──┘           ▼             ▼
//!        │              ┌────────────── step ───────────────┐
//!        └── state ───► │ logΣ_s p_s + log_softmax(...)     │ ──► output
//!                       └───────────────────────────────────┘ ──► next state
//!                                        │
//!                                   StepResult::propagate
//!                                        │
//!                       Gradient (per parameter) + dLoss/dState
//! ```
//!
//! ## Usage
//!
//! ```
//! use statebrain::prelude::*;
//!
//! let block = Block::with_config(&BlockConfig::new(4, 3).with_seed(7)).unwrap();
//! let start = block.initial_state();
//! let step = block.step(&one_hot(2, 4), &start.distribution()).unwrap();
//!
//! let mut grad = Gradient::new();
//! let state_grad = step.propagate(Some(&[1.0; 4][..]), None, &mut grad).unwrap();
//! start.propagate(&state_grad, &mut grad).unwrap();
//! assert!(grad.contains(block.entries()[0].output.id));
//! ```

pub mod batch;
pub mod block;
pub mod config;
pub mod error;
pub mod inspect;
pub mod loss;
pub mod persist;
pub mod sequence;
pub mod state;
pub mod step;

// Re-exports
pub use batch::{BatchItem, BatchResult};
pub use block::{Block, StateEntry};
pub use config::BlockConfig;
pub use error::{Result, StatebrainError};
pub use inspect::{BlockReport, DEFAULT_MASS_THRESHOLD, ProbabilityMass, StateReport, top_mass};
pub use loss::{negative_log_likelihood, one_hot};
pub use persist::{BLOCK_TYPE, deserialize_block};
pub use sequence::{RecurrentBlock, SequenceRun, run_sequence, run_sequence_r};
pub use state::{StartState, StateDist};
pub use step::StepResult;

pub use statebrain_autodiff::{Gradient, ParamId, RGradient, RVector, Variable};

/// Single import for the common types
pub mod prelude {
    pub use crate::batch::{BatchItem, BatchResult};
    pub use crate::block::{Block, StateEntry};
    pub use crate::config::BlockConfig;
    pub use crate::error::{Result, StatebrainError};
    pub use crate::loss::{negative_log_likelihood, one_hot};
    pub use crate::sequence::{RecurrentBlock, run_sequence, run_sequence_r};
    pub use crate::state::StateDist;
    pub use crate::step::StepResult;
    pub use statebrain_autodiff::{Gradient, RGradient, RVector, Variable};
}
