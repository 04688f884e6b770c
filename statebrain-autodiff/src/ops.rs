//! # Log-Domain Math
//!
//! Pure functions over slices. The tape records these as graph nodes; the
//! CLI and tests call them directly.
//!
//! | Function | Description |
//! |----------|-------------|
//! | `log_add` | `ln(e^a + e^b)` without overflow |
//! | `log_sum_exp` | `ln(Σ e^xi)` |
//! | `softmax` | `e^xi / Σ e^xj` |
//! | `log_softmax` | `xi - ln(Σ e^xj)` |
//! | `max_index` | First index of the maximum |

/// Numerically stable `ln(e^a + e^b)`.
///
/// Uses `max + ln(1 + e^(min - max))`; negative infinity is the identity.
#[inline]
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// `ln(Σ e^xi)`, `-inf` for an empty slice
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Log of the softmax of `xs`
pub fn log_softmax(xs: &[f64]) -> Vec<f64> {
    let lse = log_sum_exp(xs);
    xs.iter().map(|&x| x - lse).collect()
}

/// Softmax of `xs`
pub fn softmax(xs: &[f64]) -> Vec<f64> {
    log_softmax(xs).into_iter().map(f64::exp).collect()
}

/// Index of the largest entry.
///
/// Ties resolve to the lowest index. An empty slice, or one holding only
/// NaN/`-inf`, yields 0.
pub fn max_index(xs: &[f64]) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &x) in xs.iter().enumerate() {
        if x > best_val {
            best_val = x;
            best = i;
        }
    }
    best
}

/// `e^(x - total)`, with `0` when `x` carries no mass.
///
/// Share of `total` (both in log space) contributed by `x`; used by the
/// derivative of `log_add`.
#[inline]
pub(crate) fn log_share(x: f64, total: f64) -> f64 {
    if x == f64::NEG_INFINITY {
        0.0
    } else {
        (x - total).exp()
    }
}
