//! Run configuration from the environment (and `.env`).
//!
//! `DKVMN_DATASET` picks a preset; every other `DKVMN_*` variable overrides a
//! single field of it.

use std::path::PathBuf;
use std::str::FromStr;

use dkvmn_algo::{Addressing, ModelConfig, TrainConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown dataset preset {0:?} (expected synthetic, assist2009_updated, assist2015 or STATICS)")]
    UnknownDataset(String),

    #[error(transparent)]
    Model(#[from] dkvmn_algo::DkvmnError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Synthetic,
    Assist2009Updated,
    Assist2015,
    Statics,
}

impl Dataset {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "synthetic" => Some(Self::Synthetic),
            "assist2009_updated" => Some(Self::Assist2009Updated),
            "assist2015" => Some(Self::Assist2015),
            "STATICS" | "statics" => Some(Self::Statics),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::Assist2009Updated => "assist2009_updated",
            Self::Assist2015 => "assist2015",
            Self::Statics => "STATICS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Train, optionally followed by a test pass
    Train,
    /// Only evaluate a stored model on the test split
    Test,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dataset: Dataset,
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub data_dir: PathBuf,
    pub data_name: String,
    /// Sub-directory of `model_root` a test run loads from
    pub load: String,
    /// Sub-directory of `model_root` and `result_root` a run writes to
    pub save: String,
    pub model_root: PathBuf,
    pub result_root: PathBuf,
    pub mode: Mode,
    /// Run the test split right after training
    pub train_test: bool,
    pub gpu: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Defaults of a dataset preset, before any override.
    pub fn preset(dataset: Dataset) -> Self {
        // (batch, q_dim, qa_dim, memory, lr, n_question, seqlen, data_name, save)
        let (batch_size, q_embed_dim, qa_embed_dim, memory_size, lr, n_question, seqlen, data_name, save) =
            match dataset {
                Dataset::Synthetic => (32, 10, 10, 5, 0.05, 50, 50, "naive_c5_q50_s4000_v1", "synthetic/v1"),
                Dataset::Assist2009Updated => {
                    (32, 50, 200, 20, 0.05, 110, 200, "assist2009_updated", "assist2009_updated")
                }
                Dataset::Assist2015 => (50, 50, 100, 20, 0.1, 100, 200, "assist2015", "assist2015"),
                Dataset::Statics => (10, 50, 100, 50, 0.01, 1223, 200, "STATICS", "STATICS"),
            };

        Self {
            dataset,
            model: ModelConfig {
                n_question,
                seqlen,
                q_embed_dim,
                qa_embed_dim,
                memory_size,
                final_fc_dim: 50,
                init_std: 0.1,
                addressing: Addressing::Dot,
                separate_write_key: false,
            },
            train: TrainConfig {
                batch_size,
                learning_rate: lr,
                ..TrainConfig::default()
            },
            data_dir: PathBuf::from("data").join(dataset.name()),
            data_name: data_name.to_string(),
            load: save.to_string(),
            save: save.to_string(),
            model_root: PathBuf::from("model"),
            result_root: PathBuf::from("result"),
            mode: Mode::Train,
            train_test: true,
            gpu: None,
            log_level: "info".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dataset = match lookup("DKVMN_DATASET") {
            Some(name) => Dataset::parse(&name).ok_or(ConfigError::UnknownDataset(name))?,
            None => Dataset::Assist2009Updated,
        };
        let mut config = Self::preset(dataset);
        let env = Overrides { lookup: &lookup };

        env.parse("DKVMN_BATCH_SIZE", &mut config.train.batch_size)?;
        env.parse("DKVMN_MAX_EPOCHS", &mut config.train.max_epochs)?;
        env.parse("DKVMN_INIT_LR", &mut config.train.learning_rate)?;
        env.parse("DKVMN_FINAL_LR", &mut config.train.final_lr)?;
        env.parse("DKVMN_MOMENTUM", &mut config.train.momentum)?;
        env.parse("DKVMN_MAX_GRAD_NORM", &mut config.train.max_grad_norm)?;
        env.parse("DKVMN_LR_DECAY_EPOCHS", &mut config.train.lr_decay_epochs)?;
        env.parse("DKVMN_LR_DECAY_FACTOR", &mut config.train.lr_decay_factor)?;
        env.parse("DKVMN_SEED", &mut config.train.seed)?;

        env.parse("DKVMN_N_QUESTION", &mut config.model.n_question)?;
        env.parse("DKVMN_SEQLEN", &mut config.model.seqlen)?;
        env.parse("DKVMN_Q_EMBED_DIM", &mut config.model.q_embed_dim)?;
        env.parse("DKVMN_QA_EMBED_DIM", &mut config.model.qa_embed_dim)?;
        env.parse("DKVMN_MEMORY_SIZE", &mut config.model.memory_size)?;
        env.parse("DKVMN_FINAL_FC_DIM", &mut config.model.final_fc_dim)?;
        env.parse("DKVMN_INIT_STD", &mut config.model.init_std)?;
        env.flag("DKVMN_SEPARATE_WRITE_KEY", &mut config.model.separate_write_key)?;
        if let Some(value) = lookup("DKVMN_ADDRESSING") {
            config.model.addressing = Addressing::parse(&value).ok_or_else(|| ConfigError::Invalid {
                key: "DKVMN_ADDRESSING",
                value,
                reason: "expected dot or cosine".into(),
            })?;
        }

        if let Some(dir) = lookup("DKVMN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("DKVMN_DATA_NAME") {
            config.data_name = name;
        }
        if let Some(save) = lookup("DKVMN_SAVE") {
            config.load = save.clone();
            config.save = save;
        }
        if let Some(load) = lookup("DKVMN_LOAD") {
            config.load = load;
        }
        if let Some(root) = lookup("DKVMN_MODEL_ROOT") {
            config.model_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("DKVMN_RESULT_ROOT") {
            config.result_root = PathBuf::from(root);
        }
        if let Some(value) = lookup("DKVMN_MODE") {
            config.mode = match value.as_str() {
                "train" => Mode::Train,
                "test" => Mode::Test,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DKVMN_MODE",
                        value,
                        reason: "expected train or test".into(),
                    })
                }
            };
        }
        env.flag("DKVMN_TRAIN_TEST", &mut config.train_test)?;
        if lookup("DKVMN_GPU").is_some() {
            let mut ordinal = 0usize;
            env.parse("DKVMN_GPU", &mut ordinal)?;
            config.gpu = Some(ordinal);
        }
        if let Some(level) = lookup("RUST_LOG") {
            config.log_level = level;
        }

        config.model.validate()?;
        config.train.validate()?;
        Ok(config)
    }

    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_train1.csv", self.data_name))
    }

    pub fn valid_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_valid1.csv", self.data_name))
    }

    pub fn test_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_test.csv", self.data_name))
    }

    pub fn save_model_dir(&self) -> PathBuf {
        self.model_root.join(&self.save)
    }

    pub fn load_model_dir(&self) -> PathBuf {
        self.model_root.join(&self.load)
    }

    pub fn result_dir(&self) -> PathBuf {
        self.result_root.join(&self.save)
    }
}

struct Overrides<'a, F> {
    lookup: &'a F,
}

impl<F> Overrides<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = (self.lookup)(key) {
            *slot = value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    fn flag(&self, key: &'static str, slot: &mut bool) -> Result<(), ConfigError> {
        if let Some(value) = (self.lookup)(key) {
            *slot = match value.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key,
                        value,
                        reason: "expected true or false".into(),
                    })
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_preset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.dataset, Dataset::Assist2009Updated);
        assert_eq!(config.model.n_question, 110);
        assert_eq!(config.model.qa_embed_dim, 200);
        assert_eq!(config.train.batch_size, 32);
        assert_eq!(config.mode, Mode::Train);
        assert!(config.train_test);
        assert!(config.gpu.is_none());
        assert_eq!(
            config.train_path(),
            PathBuf::from("data/assist2009_updated/assist2009_updated_train1.csv")
        );
    }

    #[test]
    fn test_statics_preset_with_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DKVMN_DATASET", "STATICS"),
            ("DKVMN_BATCH_SIZE", "16"),
            ("DKVMN_ADDRESSING", "cosine"),
            ("DKVMN_MODE", "test"),
            ("DKVMN_LOAD", "statics/old"),
            ("DKVMN_GPU", "1"),
        ]))
        .unwrap();
        assert_eq!(config.model.n_question, 1223);
        assert_eq!(config.model.memory_size, 50);
        assert_eq!(config.train.learning_rate, 0.01);
        assert_eq!(config.train.batch_size, 16);
        assert_eq!(config.model.addressing, Addressing::Cosine);
        assert_eq!(config.mode, Mode::Test);
        assert_eq!(config.load_model_dir(), PathBuf::from("model/statics/old"));
        assert_eq!(config.result_dir(), PathBuf::from("result/STATICS"));
        assert_eq!(config.gpu, Some(1));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = Config::from_lookup(lookup(&[("DKVMN_BATCH_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DKVMN_BATCH_SIZE", .. }));

        let err = Config::from_lookup(lookup(&[("DKVMN_DATASET", "KDD")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDataset(_)));

        let err = Config::from_lookup(lookup(&[("DKVMN_TRAIN_TEST", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DKVMN_TRAIN_TEST", .. }));
    }

    #[test]
    fn test_zero_memory_fails_validation() {
        let err = Config::from_lookup(lookup(&[("DKVMN_MEMORY_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Model(_)));
    }
}
