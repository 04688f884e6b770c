//! Loss functions over output log-distributions.

use crate::error::{Result, StatebrainError};

/// One-hot score vector for `symbol`
///
/// # Panics
///
/// If `symbol >= size`. Callers taking symbols from outside check them
/// against the alphabet first.
pub fn one_hot(symbol: usize, size: usize) -> Vec<f64> {
    assert!(symbol < size, "symbol {symbol} out of range for alphabet of {size}");
    let mut v = vec![0.0; size];
    v[symbol] = 1.0;
    v
}

/// Negative log-likelihood of `targets` under per-step log-distributions.
///
/// Returns the total loss and dLoss/dOutput for every step, ready for
/// [`crate::sequence::SequenceRun::propagate`].
pub fn negative_log_likelihood(
    outputs: &[Vec<f64>],
    targets: &[usize],
) -> Result<(f64, Vec<Vec<f64>>)> {
    if outputs.len() != targets.len() {
        return Err(StatebrainError::shape("targets", outputs.len(), targets.len()));
    }

    let mut loss = 0.0;
    let mut grads = Vec::with_capacity(outputs.len());
    for (output, &target) in outputs.iter().zip(targets) {
        if target >= output.len() {
            return Err(StatebrainError::SymbolOutOfRange {
                symbol: target,
                alphabet_size: output.len(),
            });
        }
        loss -= output[target];
        let mut g = vec![0.0; output.len()];
        g[target] = -1.0;
        grads.push(g);
    }
    Ok((loss, grads))
}
