//! # dkvmn-algo - knowledge tracing with a Dynamic Key-Value Memory Network
//!
//! Predicts whether a learner will answer the next question correctly from
//! the sequence of questions they already answered.
//!
//! ## Module layout
//!
//! - [`memory`] - key/value memory: attention, read, erase-then-add write
//! - [`model`] - embeddings, read/write heads and the recurrent forward pass
//! - [`data`] - three-line CSV loader, chunking and mini-batches
//! - [`metrics`] - loss, accuracy and AUC over an epoch
//! - [`optim`] - momentum SGD with gradient clipping, step learning-rate decay
//! - [`train`] - masked loss, training and evaluation loop
//! - [`checkpoint`] - best-model persistence and result logs
//! - [`sanitize`] - NaN/Inf checks
//! - [`types`] - configuration and constants
//!
//! ## Example
//!
//! ```no_run
//! use candle_core::Device;
//! use dkvmn_algo::{KtDataset, ModelConfig, TrainConfig, Trainer};
//!
//! let model = ModelConfig::default();
//! let train = KtDataset::load_csv("data/train.csv", model.n_question, model.seqlen)?;
//! let valid = KtDataset::load_csv("data/valid.csv", model.n_question, model.seqlen)?;
//! let mut trainer = Trainer::new(&model, &TrainConfig::default(), &Device::Cpu)?;
//! let outcome = trainer.fit(&train, &valid, None)?;
//! println!("best valid auc: {:?}", outcome.best_valid_auc);
//! # Ok::<(), dkvmn_algo::DkvmnError>(())
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod checkpoint;
pub mod data;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod sanitize;
pub mod train;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use error::{DkvmnError, Result};

pub use memory::KeyValueMemory;

pub use model::{AttentionTrace, Dkvmn, ForwardOutput};

pub use data::{Batch, KtDataset, LearnerRecord};

pub use metrics::{EpochMetrics, PredictionLog};

pub use optim::{FactorScheduler, MomentumSgd, ParamsMomentumSgd};

pub use train::{EpochRecord, FitOutcome, Trainer, TrainingHistory};

pub use checkpoint::{run_name, CheckpointMeta, CheckpointStore};
