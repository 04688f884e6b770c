//! # 🧮 statebrain-autodiff - Differentiable Vector Substrate
//!
//! Small automatic-differentiation engine over `f64` vectors, sized for
//! recurrent models that live entirely in log-probability space.
//!
//! ## Pieces
//!
//! | Item | Description |
//! |------|-------------|
//! | [`Variable`] | Learnable tensor with a stable [`ParamId`] |
//! | [`Gradient`] | Additive `ParamId -> Vec<f64>` accumulation map |
//! | [`RVector`] | Tangent directions for the forward-mode (R) channel |
//! | [`RGradient`] | Gradient R-part from [`Tape::backward_r`] |
//! | [`Tape`] | Records operations, replays them backwards |
//! | [`ops`] | Pure log-domain math shared by the tape and its callers |
//!
//! ## Usage
//!
//! ```
//! use statebrain_autodiff::{Gradient, Tape, Variable};
//!
//! let logits = Variable::new(vec![1.0, 2.0, 3.0]);
//! let mut tape = Tape::new();
//! let leaf = tape.variable(&logits);
//! let dist = tape.log_softmax(leaf);
//!
//! let mut grad = Gradient::new();
//! tape.backward(&[(dist, vec![1.0, 0.0, 0.0])], &mut grad).unwrap();
//! assert_eq!(grad.get(logits.id).unwrap().len(), 3);
//! ```

pub mod error;
pub mod gradient;
pub mod ops;
pub mod tape;
pub mod variable;

pub use error::{AutodiffError, Result};
pub use gradient::{Gradient, RGradient, RVector};
pub use tape::{LeafGradients, NodeId, Tape};
pub use variable::{ParamId, Variable};
