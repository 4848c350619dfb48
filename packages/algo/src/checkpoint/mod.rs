//! Checkpoints and Result Logs
//!
//! Layout for a run named `b32_q50_qa200_m20_std0.1_lr0.05_gn50_f50_s1024`:
//!
//! ```text
//! <model_dir>/<run>.safetensors   parameters of the best validation epoch
//! <model_dir>/<run>.json          epoch, validation AUC and model config
//! <result_dir>/<run>              per-epoch metric log, test metrics appended
//! <result_dir>/<run>.history.json the same history as JSON
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DkvmnError, Result};
use crate::metrics::EpochMetrics;
use crate::sanitize::diagnose_parameters;
use crate::train::TrainingHistory;
use crate::types::{ModelConfig, TrainConfig};

/// Sidecar stored next to the best parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub run_name: String,
    pub epoch: usize,
    pub valid_auc: f64,
    pub model: ModelConfig,
}

/// Run identifier built from the hyperparameters that shape the result.
pub fn run_name(model: &ModelConfig, train: &TrainConfig) -> String {
    format!(
        "b{}_q{}_qa{}_m{}_std{}_lr{}_gn{}_f{}_s{}",
        train.batch_size,
        model.q_embed_dim,
        model.qa_embed_dim,
        model.memory_size,
        model.init_std,
        train.learning_rate,
        train.max_grad_norm,
        model.final_fc_dim,
        train.seed,
    )
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    model_dir: PathBuf,
    result_dir: PathBuf,
    run_name: String,
}

impl CheckpointStore {
    pub fn new(model_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>, run_name: &str) -> Self {
        Self {
            model_dir: model_dir.into(),
            result_dir: result_dir.into(),
            run_name: run_name.to_string(),
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn params_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.safetensors", self.run_name))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.json", self.run_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.result_dir.join(&self.run_name)
    }

    pub fn history_path(&self) -> PathBuf {
        self.result_dir.join(format!("{}.history.json", self.run_name))
    }

    /// Overwrite the stored parameters with the current state of `varmap`.
    pub fn save_best(&self, varmap: &VarMap, meta: &CheckpointMeta) -> Result<()> {
        let health = diagnose_parameters(varmap)?;
        if !health.is_healthy {
            warn!(tensors = ?health.unhealthy, "saving parameters that contain NaN or Inf");
        }
        fs::create_dir_all(&self.model_dir)?;
        varmap.save(self.params_path())?;
        fs::write(self.meta_path(), serde_json::to_string_pretty(meta)?)?;
        info!(
            epoch = meta.epoch,
            valid_auc = meta.valid_auc,
            path = %self.params_path().display(),
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn load_meta(&self) -> Result<CheckpointMeta> {
        let text = fs::read_to_string(self.meta_path())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load the stored parameters into an already assembled model's `varmap`.
    ///
    /// Fails when the sidecar was written for a different architecture.
    pub fn load_best(&self, varmap: &mut VarMap, expected: &ModelConfig) -> Result<CheckpointMeta> {
        let meta = self.load_meta()?;
        if &meta.model != expected {
            return Err(DkvmnError::CheckpointMismatch(format!(
                "{} was trained with {:?}, expected {:?}",
                self.meta_path().display(),
                meta.model,
                expected
            )));
        }
        varmap.load(self.params_path())?;
        info!(epoch = meta.epoch, valid_auc = meta.valid_auc, "checkpoint loaded");
        Ok(meta)
    }

    /// Write the per-epoch metric log, replacing any previous one.
    pub fn write_history(&self, history: &TrainingHistory) -> Result<()> {
        fs::create_dir_all(&self.result_dir)?;
        fs::write(self.log_path(), format_history(history))?;
        fs::write(self.history_path(), serde_json::to_string_pretty(history)?)?;
        Ok(())
    }

    /// Append held-out test metrics to the metric log.
    pub fn append_test(&self, metrics: &EpochMetrics) -> Result<()> {
        fs::create_dir_all(&self.result_dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        write!(
            file,
            "\ntest_auc:\t{}\ntest_accuracy:\t{}\ntest_loss:\t{}\n",
            fmt_metric(metrics.auc),
            fmt_metric(metrics.accuracy),
            fmt_metric(metrics.loss)
        )?;
        Ok(())
    }

    pub fn has_checkpoint(&self) -> bool {
        exists(&self.params_path()) && exists(&self.meta_path())
    }
}

fn exists(path: &Path) -> bool {
    path.is_file()
}

fn fmt_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

/// One block per metric, each an `{epoch: value, ...}` map.
pub fn format_history(history: &TrainingHistory) -> String {
    let series: [(&str, fn(&crate::train::EpochRecord) -> Option<f64>); 6] = [
        ("valid_auc", |r| r.valid.auc),
        ("train_auc", |r| r.train.auc),
        ("valid_loss", |r| r.valid.loss),
        ("train_loss", |r| r.train.loss),
        ("valid_accuracy", |r| r.valid.accuracy),
        ("train_accuracy", |r| r.train.accuracy),
    ];

    series
        .iter()
        .map(|(name, pick)| {
            let entries: Vec<String> = history
                .epochs
                .iter()
                .map(|record| format!("{}: {}", record.epoch, fmt_metric(pick(record))))
                .collect();
            format!("{name}:\n{{{}}}\n\n", entries.join(", "))
        })
        .collect()
}
