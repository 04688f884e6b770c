//! # Inspection
//!
//! Summaries of a trained block: for the start distribution and each state's
//! output distribution, the most likely indices until their cumulative
//! probability passes a threshold.

use std::fmt;

use serde::Serialize;
use statebrain_autodiff::ops;

use crate::block::Block;

/// Cumulative mass the `analyze` report stops at by default
pub const DEFAULT_MASS_THRESHOLD: f64 = 0.95;

/// One index of a softmaxed logit vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbabilityMass {
    pub index: usize,
    pub probability: f64,
}

impl fmt::Display for ProbabilityMass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:x}) (p={:.4})",
            self.index, self.index, self.probability
        )
    }
}

/// Softmax `logits` and keep the most likely indices, in descending order,
/// up to and including the one whose cumulative probability exceeds
/// `threshold`. Equal probabilities keep index order.
pub fn top_mass(logits: &[f64], threshold: f64) -> Vec<ProbabilityMass> {
    let mut ranked: Vec<ProbabilityMass> = ops::softmax(logits)
        .into_iter()
        .enumerate()
        .map(|(index, probability)| ProbabilityMass { index, probability })
        .collect();
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    let mut total = 0.0;
    let mut kept = Vec::new();
    for entry in ranked {
        total += entry.probability;
        kept.push(entry);
        if total > threshold {
            break;
        }
    }
    kept
}

/// Most likely outputs of one state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    pub state: usize,
    pub outputs: Vec<ProbabilityMass>,
}

/// Human-readable digest of a block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockReport {
    pub threshold: f64,
    pub start: Vec<ProbabilityMass>,
    pub states: Vec<StateReport>,
}

impl BlockReport {
    pub fn from_block(block: &Block, threshold: f64) -> Self {
        let states = block
            .entries()
            .iter()
            .enumerate()
            .map(|(state, entry)| StateReport {
                state,
                outputs: top_mass(&entry.output.vector, threshold),
            })
            .collect();
        Self {
            threshold,
            start: top_mass(&block.start().vector, threshold),
            states,
        }
    }
}

fn write_masses(f: &mut fmt::Formatter<'_>, masses: &[ProbabilityMass]) -> fmt::Result {
    for mass in masses {
        write!(f, " {mass}")?;
    }
    writeln!(f)
}

impl fmt::Display for BlockReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Start states:")?;
        write_masses(f, &self.start)?;
        for state in &self.states {
            write!(f, "State {} outputs:", state.state)?;
            write_masses(f, &state.outputs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_mass_stops_past_threshold() {
        let probs = [0.6f64, 0.3, 0.1];
        let logits: Vec<f64> = probs.iter().map(|p| p.ln()).collect();
        let top = top_mass(&logits, 0.8);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].index, 0);
        assert_eq!(top[1].index, 1);
        assert!((top[1].probability - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_top_mass_orders_descending() {
        let top = top_mass(&[0.0, 3.0, 1.0, 2.0], 1.0);
        let order: Vec<_> = top.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_top_mass_ties_keep_index_order() {
        let top = top_mass(&[1.0, 1.0, 1.0, 1.0], 0.4);
        let order: Vec<_> = top.iter().map(|m| m.index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_report_text() {
        let block = Block::from_logits(
            vec![100.0, 0.0],
            vec![vec![0.0, 50.0], vec![0.0, 0.0]],
            vec![vec![vec![0.0; 2]; 2], vec![vec![0.0; 2]; 2]],
        )
        .unwrap();
        let text = BlockReport::from_block(&block, DEFAULT_MASS_THRESHOLD).to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Start states: 0 (0x0) (p=1.0000)");
        assert_eq!(lines[1], "State 0 outputs: 1 (0x1) (p=1.0000)");
        assert_eq!(lines[2], "State 1 outputs: 0 (0x0) (p=0.5000) 1 (0x1) (p=0.5000)");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_report_serializes() {
        let block = Block::new(3, 2).unwrap();
        let report = BlockReport::from_block(&block, 0.5);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["states"].as_array().unwrap().len(), 2);
        assert_eq!(value["start"][0]["index"], 0);
    }

    #[test]
    fn test_hex_index() {
        let mass = ProbabilityMass {
            index: 255,
            probability: 0.125,
        };
        assert_eq!(mass.to_string(), "255 (0xff) (p=0.1250)");
    }
}
