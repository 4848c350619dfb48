//! Train / test entry point shared by the binary and the tests.

use candle_core::Device;
use dkvmn_algo::{run_name, CheckpointStore, DkvmnError, EpochMetrics, KtDataset, Trainer};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ConfigError, Mode};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Algo(#[from] DkvmnError),

    #[error("no checkpoint {0} to test")]
    MissingCheckpoint(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_name: String,
    pub best_epoch: Option<usize>,
    pub best_valid_auc: Option<f64>,
    pub test: Option<EpochMetrics>,
}

pub fn select_device(gpu: Option<usize>) -> Result<Device, AppError> {
    match gpu {
        Some(ordinal) => {
            let device = Device::new_cuda(ordinal).map_err(DkvmnError::from)?;
            info!(ordinal, "training with gpu");
            Ok(device)
        }
        None => {
            info!("training with cpu");
            Ok(Device::Cpu)
        }
    }
}

pub fn run(config: &Config) -> Result<RunSummary, AppError> {
    let device = select_device(config.gpu)?;
    let name = run_name(&config.model, &config.train);
    info!(
        dataset = config.dataset.name(),
        run = %name,
        mode = ?config.mode,
        "starting"
    );

    match config.mode {
        Mode::Train => train(config, &device, name),
        Mode::Test => {
            let test = test(config, &device, &name)?;
            Ok(RunSummary {
                run_name: name,
                best_epoch: None,
                best_valid_auc: None,
                test: Some(test),
            })
        }
    }
}

fn load(config: &Config, path: std::path::PathBuf) -> Result<KtDataset, AppError> {
    Ok(KtDataset::load_csv(path, config.model.n_question, config.model.seqlen)?)
}

fn train(config: &Config, device: &Device, name: String) -> Result<RunSummary, AppError> {
    let train_data = load(config, config.train_path())?;
    let valid_data = load(config, config.valid_path())?;
    info!(train = train_data.len(), valid = valid_data.len(), "datasets loaded");

    let store = CheckpointStore::new(config.save_model_dir(), config.result_dir(), &name);
    let mut trainer = Trainer::new(&config.model, &config.train, device)?;
    let outcome = trainer.fit(&train_data, &valid_data, Some(&store))?;

    let test = if config.train_test {
        Some(test(config, device, &name)?)
    } else {
        None
    };

    Ok(RunSummary {
        run_name: name,
        best_epoch: outcome.best_epoch,
        best_valid_auc: outcome.best_valid_auc,
        test,
    })
}

/// Evaluate the best stored parameters on the test split and append the result.
fn test(config: &Config, device: &Device, name: &str) -> Result<EpochMetrics, AppError> {
    let source = CheckpointStore::new(config.load_model_dir(), config.result_dir(), name);
    if !source.has_checkpoint() {
        return Err(AppError::MissingCheckpoint(source.params_path().display().to_string()));
    }
    let test_data = load(config, config.test_path())?;

    let mut trainer = Trainer::new(&config.model, &config.train, device)?;
    source.load_best(trainer.varmap_mut(), &config.model)?;
    let metrics = trainer.test(&test_data)?;

    let results = CheckpointStore::new(config.save_model_dir(), config.result_dir(), name);
    results.append_test(&metrics)?;
    Ok(metrics)
}
