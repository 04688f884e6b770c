//! Learnable tensors and their identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a learnable tensor.
///
/// Gradients are keyed by this id, never by position, so several models can
/// share one [`crate::Gradient`] without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    /// Allocate an id no other live variable has.
    pub fn fresh() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// A parameter vector.
///
/// `Clone` keeps the id: a clone is a snapshot of the same parameter, which is
/// what finite-difference checks and optimizer double-buffering want.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: ParamId,
    pub vector: Vec<f64>,
}

impl Variable {
    pub fn new(vector: Vec<f64>) -> Self {
        Self {
            id: ParamId::fresh(),
            vector,
        }
    }

    /// All-zero variable of the given length
    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = Variable::zeros(3);
        let b = Variable::zeros(3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_clone_keeps_identity() {
        let a = Variable::new(vec![1.0, 2.0]);
        let mut b = a.clone();
        b.vector[0] = 5.0;
        assert_eq!(a.id, b.id);
        assert_eq!(a.vector[0], 1.0);
    }
}
