//! Block configuration

use crate::error::{Result, StatebrainError};

/// Configuration for creating a [`crate::Block`]
#[derive(Debug, Clone, PartialEq)]
pub struct BlockConfig {
    /// Number of input/output symbols
    pub alphabet_size: usize,

    /// Number of latent states
    pub state_count: usize,

    /// Logit placed on state 0 of the start distribution.
    ///
    /// Large enough that the chain starts almost surely in state 0, finite so
    /// the start log-distribution never holds `-inf`.
    pub start_bias: f64,

    /// Standard deviation of the output-logit initialization
    pub output_stddev: f64,

    /// Standard deviation of the transition-logit initialization
    pub transition_stddev: f64,

    /// Seed for reproducible initialization; entropy when `None`
    pub seed: Option<u64>,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            alphabet_size: 256,
            state_count: 16,
            start_bias: 100.0,
            output_stddev: 1.0,
            transition_stddev: 2.0,
            seed: None,
        }
    }
}

impl BlockConfig {
    pub fn new(alphabet_size: usize, state_count: usize) -> Self {
        Self {
            alphabet_size,
            state_count,
            ..Default::default()
        }
    }

    /// One symbol per byte value
    pub fn byte_level(state_count: usize) -> Self {
        Self::new(256, state_count)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_start_bias(mut self, start_bias: f64) -> Self {
        self.start_bias = start_bias;
        self
    }

    /// Reject configurations no block can be built from
    pub fn validate(&self) -> Result<()> {
        if self.alphabet_size == 0 {
            return Err(StatebrainError::InvalidConfig(
                "alphabet size must be positive".to_string(),
            ));
        }
        if self.state_count == 0 {
            return Err(StatebrainError::InvalidConfig(
                "state count must be positive".to_string(),
            ));
        }
        if !self.start_bias.is_finite() {
            return Err(StatebrainError::InvalidConfig(format!(
                "start bias must be finite, got {}",
                self.start_bias
            )));
        }
        for (name, value) in [
            ("output", self.output_stddev),
            ("transition", self.transition_stddev),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StatebrainError::InvalidConfig(format!(
                    "{} stddev must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BlockConfig::default();
        assert_eq!(config.alphabet_size, 256);
        assert_eq!(config.start_bias, 100.0);
        assert_eq!(config.transition_stddev, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = BlockConfig::byte_level(4).with_seed(7).with_start_bias(5.0);
        assert_eq!(config.alphabet_size, 256);
        assert_eq!(config.state_count, 4);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.start_bias, 5.0);
    }

    #[test]
    fn test_validate_rejects_empty_shapes() {
        assert!(matches!(
            BlockConfig::new(0, 3).validate(),
            Err(StatebrainError::InvalidConfig(_))
        ));
        assert!(matches!(
            BlockConfig::new(4, 0).validate(),
            Err(StatebrainError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_init() {
        let mut config = BlockConfig::new(4, 3);
        config.output_stddev = -1.0;
        assert!(config.validate().is_err());

        let config = BlockConfig::new(4, 3).with_start_bias(f64::INFINITY);
        assert!(config.validate().is_err());
    }
}
