//! # Gradient Maps
//!
//! [`Gradient`] accumulates reverse-mode results, [`RVector`] holds the
//! directions the forward-mode channel differentiates along. Both are plain
//! `ParamId -> Vec<f64>` maps; the difference is who writes into them.

use std::collections::HashMap;

use crate::variable::{ParamId, Variable};

/// Accumulated gradient per parameter.
///
/// Every write is additive, so partial maps computed on different workers
/// can be merged in any grouping and still sum to the same totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradient {
    entries: HashMap<ParamId, Vec<f64>>,
}

impl Gradient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gradient with an all-zero entry for each of `params`
    pub fn zeros_for<'a>(params: impl IntoIterator<Item = &'a Variable>) -> Self {
        let entries = params
            .into_iter()
            .map(|p| (p.id, vec![0.0; p.len()]))
            .collect();
        Self { entries }
    }

    /// Add `values` into the entry for `id`, creating it on first touch.
    ///
    /// # Panics
    ///
    /// If an existing entry has a different length.
    pub fn accumulate(&mut self, id: ParamId, values: &[f64]) {
        match self.entries.get_mut(&id) {
            Some(existing) => {
                assert_eq!(
                    existing.len(),
                    values.len(),
                    "gradient length mismatch for {}",
                    id
                );
                for (e, v) in existing.iter_mut().zip(values) {
                    *e += v;
                }
            }
            None => {
                self.entries.insert(id, values.to_vec());
            }
        }
    }

    /// Add every entry of `other` into this map.
    pub fn merge(&mut self, other: Gradient) {
        for (id, values) in other.entries {
            if self.entries.contains_key(&id) {
                self.accumulate(id, &values);
            } else {
                self.entries.insert(id, values);
            }
        }
    }

    pub fn get(&self, id: ParamId) -> Option<&[f64]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: ParamId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamId, &Vec<f64>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reset every entry to zero while keeping the allocations
    pub fn clear(&mut self) {
        for values in self.entries.values_mut() {
            values.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

/// Directional derivative of a [`Gradient`] along an [`RVector`].
///
/// Same additive map; filled by [`crate::Tape::backward_r`].
pub type RGradient = Gradient;

/// Tangent directions for the R-operator.
///
/// A parameter without an entry moves along the zero direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RVector {
    entries: HashMap<ParamId, Vec<f64>>,
}

impl RVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the direction for `var`.
    ///
    /// # Panics
    ///
    /// If `direction` is not as long as the variable.
    pub fn insert(&mut self, var: &Variable, direction: Vec<f64>) {
        assert_eq!(var.len(), direction.len(), "tangent length mismatch for {}", var.id);
        self.entries.insert(var.id, direction);
    }

    pub fn get(&self, id: ParamId) -> Option<&[f64]> {
        self.entries.get(&id).map(Vec::as_slice)
    }

    /// Direction for `var`, zeros when none was set
    pub fn direction(&self, var: &Variable) -> Vec<f64> {
        self.get(var.id)
            .map(<[f64]>::to_vec)
            .unwrap_or_else(|| vec![0.0; var.len()])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_is_additive() {
        let var = Variable::zeros(2);
        let mut grad = Gradient::new();
        grad.accumulate(var.id, &[1.0, 2.0]);
        grad.accumulate(var.id, &[0.5, -1.0]);
        assert_eq!(grad.get(var.id).unwrap(), &[1.5, 1.0]);
    }

    #[test]
    fn test_merge_sums_shared_entries() {
        let a = Variable::zeros(1);
        let b = Variable::zeros(1);

        let mut left = Gradient::new();
        left.accumulate(a.id, &[1.0]);

        let mut right = Gradient::new();
        right.accumulate(a.id, &[2.0]);
        right.accumulate(b.id, &[3.0]);

        left.merge(right);
        assert_eq!(left.get(a.id).unwrap(), &[3.0]);
        assert_eq!(left.get(b.id).unwrap(), &[3.0]);
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn test_zeros_for_and_clear() {
        let vars = [Variable::new(vec![1.0, 1.0]), Variable::new(vec![2.0])];
        let mut grad = Gradient::zeros_for(vars.iter());
        assert_eq!(grad.len(), 2);
        grad.accumulate(vars[1].id, &[4.0]);
        grad.clear();
        assert_eq!(grad.get(vars[1].id).unwrap(), &[0.0]);
    }

    #[test]
    #[should_panic(expected = "gradient length mismatch")]
    fn test_accumulate_length_mismatch_panics() {
        let var = Variable::zeros(2);
        let mut grad = Gradient::new();
        grad.accumulate(var.id, &[1.0, 2.0]);
        grad.accumulate(var.id, &[1.0]);
    }

    #[test]
    fn test_rvector_defaults_to_zero_direction() {
        let var = Variable::zeros(3);
        let rv = RVector::new();
        assert_eq!(rv.direction(&var), vec![0.0; 3]);
    }
}
