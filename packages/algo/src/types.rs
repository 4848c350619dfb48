//! Common Types and Constants
//!
//! Hyperparameter structures and encoding constants shared across modules.

use serde::{Deserialize, Serialize};

use crate::error::{DkvmnError, Result};

// ==================== Constants ====================

/// Index reserved for padding in both embedding tables
pub const PAD_INDEX: u32 = 0;

/// Target value marking a padded timestep
pub const PADDING_TARGET: f32 = -1.0;

/// Probability above which a prediction counts as "correct"
pub const PREDICTION_THRESHOLD: f64 = 0.5;

/// Denominator guard for cosine addressing
pub const COSINE_EPSILON: f64 = 1e-8;

/// Probabilities are clipped to [PROB_EPSILON, 1 - PROB_EPSILON] before taking logs
pub const PROB_EPSILON: f64 = 1e-7;

// ==================== Addressing ====================

/// Similarity used to turn a query embedding into attention over key slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Addressing {
    /// Dot product between the query and each key slot
    #[default]
    Dot,
    /// Cosine similarity between the query and each key slot
    Cosine,
}

impl Addressing {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dot" => Some(Addressing::Dot),
            "cosine" | "cos" => Some(Addressing::Cosine),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Addressing::Dot => "dot",
            Addressing::Cosine => "cosine",
        }
    }
}

// ==================== Model Config ====================

/// Architecture hyperparameters of the memory network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of distinct questions; ids run from 1 to n_question
    pub n_question: usize,
    /// Maximum sequence length; longer learner histories are chunked
    pub seqlen: usize,
    /// Question embedding size, also the key memory width
    pub q_embed_dim: usize,
    /// Interaction embedding size, also the value memory width
    pub qa_embed_dim: usize,
    /// Number of memory slots
    pub memory_size: usize,
    /// Hidden width of the summary layer
    pub final_fc_dim: usize,
    /// Standard deviation of the Gaussian parameter initialisation
    pub init_std: f64,
    /// Similarity used by the read and write heads
    pub addressing: Addressing,
    /// When set, the write head addresses memory through its own key projection
    pub separate_write_key: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_question: 110,
            seqlen: 200,
            q_embed_dim: 50,
            qa_embed_dim: 200,
            memory_size: 20,
            final_fc_dim: 50,
            init_std: 0.1,
            addressing: Addressing::Dot,
            separate_write_key: false,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("n_question", self.n_question),
            ("seqlen", self.seqlen),
            ("q_embed_dim", self.q_embed_dim),
            ("qa_embed_dim", self.qa_embed_dim),
            ("memory_size", self.memory_size),
            ("final_fc_dim", self.final_fc_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(DkvmnError::Config(format!("{name} must be positive")));
            }
        }
        if !(self.init_std.is_finite() && self.init_std > 0.0) {
            return Err(DkvmnError::Config(format!(
                "init_std must be a positive number, got {}",
                self.init_std
            )));
        }
        Ok(())
    }

    /// Rows of the question embedding table (ids plus padding)
    pub fn q_vocab(&self) -> usize {
        self.n_question + 1
    }

    /// Rows of the interaction embedding table (two answers per question plus padding)
    pub fn qa_vocab(&self) -> usize {
        2 * self.n_question + 1
    }
}

// ==================== Train Config ====================

/// Optimisation hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Floor the schedule never decays below
    pub final_lr: f64,
    pub momentum: f64,
    /// Global gradient norm threshold; clipping is disabled when not positive
    pub max_grad_norm: f64,
    /// Epochs between learning rate decays
    pub lr_decay_epochs: usize,
    pub lr_decay_factor: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_epochs: 100,
            learning_rate: 0.05,
            final_lr: 1e-5,
            momentum: 0.9,
            max_grad_norm: 50.0,
            lr_decay_epochs: 20,
            lr_decay_factor: 0.667,
            seed: 1024,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DkvmnError::Config("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(DkvmnError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(DkvmnError::Config(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if !(self.lr_decay_factor > 0.0 && self.lr_decay_factor <= 1.0) {
            return Err(DkvmnError::Config(format!(
                "lr_decay_factor must be in (0, 1], got {}",
                self.lr_decay_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addressing_parse() {
        assert_eq!(Addressing::parse("DOT"), Some(Addressing::Dot));
        assert_eq!(Addressing::parse("cos"), Some(Addressing::Cosine));
        assert_eq!(Addressing::parse("manhattan"), None);
    }

    #[test]
    fn test_vocab_sizes() {
        let config = ModelConfig {
            n_question: 50,
            ..Default::default()
        };
        assert_eq!(config.q_vocab(), 51);
        assert_eq!(config.qa_vocab(), 101);
    }

    #[test]
    fn test_validate_rejects_zero_memory() {
        let config = ModelConfig {
            memory_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ModelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_train_config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        let bad = TrainConfig {
            momentum: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = ModelConfig {
            addressing: Addressing::Cosine,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"cosine\""));
        let restored: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
