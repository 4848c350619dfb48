//! Training and Evaluation Loop
//!
//! `Trainer` owns the network, its parameters and the optimizer state. Every
//! batch starts from a fresh value memory, so samples never leak into each
//! other across batches or epochs.

pub mod loss;

use candle_core::Device;
use candle_nn::{Optimizer, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointMeta, CheckpointStore};
use crate::data::KtDataset;
use crate::error::{DkvmnError, Result};
use crate::metrics::{EpochMetrics, PredictionLog};
use crate::model::Dkvmn;
use crate::optim::{FactorScheduler, MomentumSgd, ParamsMomentumSgd};
use crate::sanitize::diagnose_parameters;
use crate::types::{ModelConfig, TrainConfig};

pub use loss::masked_bce_with_logits;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: EpochMetrics,
    pub valid: EpochMetrics,
    /// Learning rate in effect at the end of the epoch
    pub learning_rate: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn valid_auc_curve(&self) -> Vec<Option<f64>> {
        self.epochs.iter().map(|r| r.valid.auc).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    /// `None` when validation AUC was never defined
    pub best_epoch: Option<usize>,
    pub best_valid_auc: Option<f64>,
    pub history: TrainingHistory,
}

pub struct Trainer {
    model: Dkvmn,
    varmap: VarMap,
    optimizer: MomentumSgd,
    scheduler: Option<FactorScheduler>,
    rng: ChaCha8Rng,
    device: Device,
    config: TrainConfig,
    num_update: usize,
}

impl Trainer {
    /// Build a freshly initialised model. Parameter values and the shuffling
    /// order both derive from `train_config.seed`.
    pub fn new(model_config: &ModelConfig, train_config: &TrainConfig, device: &Device) -> Result<Self> {
        train_config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(train_config.seed);
        let varmap = VarMap::new();
        let model = Dkvmn::seeded(&varmap, model_config, &mut rng, device)?;
        let optimizer = MomentumSgd::new(
            varmap.all_vars(),
            ParamsMomentumSgd {
                lr: train_config.learning_rate,
                momentum: train_config.momentum,
                max_grad_norm: train_config.max_grad_norm,
            },
        )?;

        info!(
            n_question = model_config.n_question,
            memory_size = model_config.memory_size,
            addressing = model_config.addressing.as_str(),
            batch_size = train_config.batch_size,
            lr = train_config.learning_rate,
            seed = train_config.seed,
            "trainer initialised"
        );

        Ok(Self {
            model,
            varmap,
            optimizer,
            scheduler: None,
            rng,
            device: device.clone(),
            config: train_config.clone(),
            num_update: 0,
        })
    }

    pub fn model(&self) -> &Dkvmn {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Mutable access for loading stored parameters into the model.
    pub fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn num_update(&self) -> usize {
        self.num_update
    }

    fn scheduler_for(&mut self, data: &KtDataset) -> &mut FactorScheduler {
        let updates_per_epoch = data.len() / self.config.batch_size;
        let step = self.config.lr_decay_epochs * updates_per_epoch;
        let config = &self.config;
        self.scheduler.get_or_insert_with(|| {
            FactorScheduler::new(config.learning_rate, step, config.lr_decay_factor, config.final_lr)
        })
    }

    /// One pass over `data` in shuffled order, dropping the incomplete last batch.
    pub fn train_epoch(&mut self, data: &KtDataset, epoch: usize) -> Result<EpochMetrics> {
        let order = data.epoch_order(Some(&mut self.rng));
        let batches = KtDataset::batch_indices(&order, self.config.batch_size, true);

        let mut log = PredictionLog::new();
        for (batch_idx, indices) in batches.iter().enumerate() {
            let batch = data.batch(indices, &self.device)?;
            if batch.valid_count == 0 {
                continue;
            }

            let output = self.model.forward(&batch.q, &batch.qa)?;
            let Some(loss) = masked_bce_with_logits(&output.logits, &batch.targets, &batch.mask, batch.valid_count)?
            else {
                continue;
            };
            let loss_value = loss.to_scalar::<f32>()?;
            if !loss_value.is_finite() {
                return Err(DkvmnError::NonFiniteLoss { epoch, batch: batch_idx });
            }

            let grads = loss.backward()?;
            self.num_update += 1;
            let num_update = self.num_update;
            let lr = self.scheduler_for(data).lr_at(num_update);
            self.optimizer.set_learning_rate(lr);
            self.optimizer.step(&grads)?;

            debug!(
                epoch,
                batch = batch_idx,
                loss = loss_value,
                grad_norm = self.optimizer.last_grad_norm(),
                lr,
                "train step"
            );

            let probs = output.probs.detach().flatten_all()?.to_vec1::<f32>()?;
            log.extend_masked(&probs, &batch.raw_targets);
        }
        Ok(log.summarize())
    }

    /// Forward-only pass over every sample of `data`.
    pub fn evaluate(&self, data: &KtDataset, label: &str) -> Result<EpochMetrics> {
        let order = data.epoch_order(None);
        let mut log = PredictionLog::new();
        for indices in KtDataset::batch_indices(&order, self.config.batch_size, false) {
            let batch = data.batch(indices, &self.device)?;
            if batch.valid_count == 0 {
                continue;
            }
            let output = self.model.forward(&batch.q, &batch.qa)?;
            let probs = output.probs.detach().flatten_all()?.to_vec1::<f32>()?;
            log.extend_masked(&probs, &batch.raw_targets);
        }
        let metrics = log.summarize();
        debug!(label, samples = metrics.samples, auc = metrics.auc, "evaluated");
        Ok(metrics)
    }

    /// Train for `max_epochs`, keeping the parameters of the epoch with the
    /// highest validation AUC in `store`.
    pub fn fit(
        &mut self,
        train: &KtDataset,
        valid: &KtDataset,
        store: Option<&CheckpointStore>,
    ) -> Result<FitOutcome> {
        let mut history = TrainingHistory::default();
        let mut best_epoch = None;
        let mut best_valid_auc: Option<f64> = None;

        for epoch in 1..=self.config.max_epochs {
            let train_metrics = self.train_epoch(train, epoch)?;
            let valid_metrics = self.evaluate(valid, "valid")?;

            info!(
                epoch,
                train_loss = train_metrics.loss,
                train_auc = train_metrics.auc,
                train_accuracy = train_metrics.accuracy,
                valid_loss = valid_metrics.loss,
                valid_auc = valid_metrics.auc,
                valid_accuracy = valid_metrics.accuracy,
                lr = self.learning_rate(),
                "epoch finished"
            );

            let health = diagnose_parameters(&self.varmap)?;
            if health.is_healthy {
                debug!(epoch, max_abs = health.max_abs, numel = health.numel, "parameters healthy");
            } else {
                warn!(epoch, tensors = ?health.unhealthy, "parameters contain NaN or Inf");
            }

            history.epochs.push(EpochRecord {
                epoch,
                train: train_metrics,
                valid: valid_metrics,
                learning_rate: self.learning_rate(),
            });

            if let Some(auc) = valid_metrics.auc {
                if best_valid_auc.map_or(true, |best| auc > best) {
                    best_valid_auc = Some(auc);
                    best_epoch = Some(epoch);
                    if let Some(store) = store {
                        store.save_best(
                            &self.varmap,
                            &CheckpointMeta {
                                run_name: store.run_name().to_string(),
                                epoch,
                                valid_auc: auc,
                                model: self.model.config().clone(),
                            },
                        )?;
                    }
                }
            }
        }

        if let Some(store) = store {
            store.write_history(&history)?;
        }
        info!(best_epoch, best_valid_auc, "training finished");

        Ok(FitOutcome {
            best_epoch,
            best_valid_auc,
            history,
        })
    }

    /// Evaluate a held-out set with the current parameters.
    pub fn test(&self, data: &KtDataset) -> Result<EpochMetrics> {
        let metrics = self.evaluate(data, "test")?;
        info!(
            test_auc = metrics.auc,
            test_accuracy = metrics.accuracy,
            test_loss = metrics.loss,
            samples = metrics.samples,
            "test finished"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LearnerRecord;

    fn tiny_model() -> ModelConfig {
        ModelConfig {
            n_question: 4,
            seqlen: 6,
            q_embed_dim: 4,
            qa_embed_dim: 6,
            memory_size: 3,
            final_fc_dim: 5,
            ..Default::default()
        }
    }

    fn tiny_train() -> TrainConfig {
        TrainConfig {
            batch_size: 2,
            max_epochs: 2,
            ..Default::default()
        }
    }

    fn records() -> Vec<LearnerRecord> {
        (0..5u32)
            .map(|i| LearnerRecord {
                questions: (0..6).map(|t| (i + t) % 4 + 1).collect(),
                answers: (0..6).map(|t| ((i + t) % 2) as u8).collect(),
            })
            .collect()
    }

    #[test]
    fn test_train_epoch_updates_counter() {
        let data = KtDataset::from_records(&records(), 4, 6).unwrap();
        let mut trainer = Trainer::new(&tiny_model(), &tiny_train(), &Device::Cpu).unwrap();
        let metrics = trainer.train_epoch(&data, 1).unwrap();
        // 5 samples with batch size 2: the last one is dropped
        assert_eq!(trainer.num_update(), 2);
        assert_eq!(metrics.samples, 24);
        assert!(metrics.loss.unwrap().is_finite());
    }

    #[test]
    fn test_learning_rate_decays_between_epochs() {
        let data = KtDataset::from_records(&records(), 4, 6).unwrap();
        let config = TrainConfig {
            lr_decay_epochs: 1,
            lr_decay_factor: 0.5,
            final_lr: 0.02,
            ..tiny_train()
        };
        let mut trainer = Trainer::new(&tiny_model(), &config, &Device::Cpu).unwrap();
        let base = config.learning_rate;

        // two updates per epoch, so the first decay lands on update 3
        trainer.train_epoch(&data, 1).unwrap();
        assert_eq!(trainer.learning_rate(), base);
        trainer.train_epoch(&data, 2).unwrap();
        assert!((trainer.learning_rate() - base * 0.5).abs() < 1e-12);
        trainer.train_epoch(&data, 3).unwrap();
        assert!((trainer.learning_rate() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_keeps_every_sample() {
        let data = KtDataset::from_records(&records(), 4, 6).unwrap();
        let trainer = Trainer::new(&tiny_model(), &tiny_train(), &Device::Cpu).unwrap();
        let metrics = trainer.evaluate(&data, "valid").unwrap();
        assert_eq!(metrics.samples, 30);
        assert_eq!(trainer.num_update(), 0);
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let data = KtDataset::from_records(&records(), 4, 6).unwrap();
        let mut trainer = Trainer::new(&tiny_model(), &tiny_train(), &Device::Cpu).unwrap();
        let outcome = trainer.fit(&data, &data, None).unwrap();
        assert_eq!(outcome.history.epochs.len(), 2);
        assert!(outcome.best_epoch.is_some());
        let best = outcome
            .history
            .valid_auc_curve()
            .into_iter()
            .flatten()
            .fold(f64::MIN, f64::max);
        assert_eq!(outcome.best_valid_auc, Some(best));
    }
}
