//! Seeded parameter initialisation.
//!
//! Candle's CPU random source cannot be seeded, so every trainable tensor is
//! drawn here from a ChaCha stream and inserted into the `VarMap` before the
//! network is assembled. The builder then finds the variables already present.

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{DkvmnError, Result};
use crate::types::ModelConfig;

/// How a parameter is filled before training starts
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamInit {
    Normal { std: f64 },
    Zeros,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: ParamInit,
}

impl ParamSpec {
    fn normal(name: &str, shape: &[usize], std: f64) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            init: ParamInit::Normal { std },
        }
    }

    fn zeros(name: &str, shape: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
            init: ParamInit::Zeros,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Every trainable tensor of the network, named as the model looks them up.
pub fn parameter_specs(config: &ModelConfig) -> Vec<ParamSpec> {
    let std = config.init_std;
    let dk = config.q_embed_dim;
    let dv = config.qa_embed_dim;
    let n = config.memory_size;
    let fc = config.final_fc_dim;

    let mut specs = vec![
        ParamSpec::normal("q_embed.weight", &[config.q_vocab(), dk], std),
        ParamSpec::normal("qa_embed.weight", &[config.qa_vocab(), dv], std),
        ParamSpec::normal("memory.key", &[n, dk], std),
        ParamSpec::normal("memory.init_value", &[n, dv], std),
        ParamSpec::normal("read.summary.weight", &[fc, dv + dk], std),
        ParamSpec::zeros("read.summary.bias", &[fc]),
        ParamSpec::normal("read.output.weight", &[1, fc], std),
        ParamSpec::zeros("read.output.bias", &[1]),
        ParamSpec::normal("write.erase.weight", &[dv, dv], std),
        ParamSpec::zeros("write.erase.bias", &[dv]),
        ParamSpec::normal("write.add.weight", &[dv, dv], std),
        ParamSpec::zeros("write.add.bias", &[dv]),
    ];
    if config.separate_write_key {
        specs.push(ParamSpec::normal("write.key.weight", &[dk, dk], std));
        specs.push(ParamSpec::zeros("write.key.bias", &[dk]));
    }
    specs
}

/// Draws every spec from `rng` and stores it in `varmap`, replacing existing entries.
pub fn seed_parameters(
    varmap: &VarMap,
    specs: &[ParamSpec],
    rng: &mut ChaCha8Rng,
    device: &Device,
) -> Result<()> {
    let mut data = varmap.data().lock().unwrap_or_else(|e| e.into_inner());
    for spec in specs {
        let values: Vec<f32> = match spec.init {
            ParamInit::Normal { std } => {
                let normal = Normal::new(0.0, std).map_err(|err| {
                    DkvmnError::Config(format!("{}: invalid init std {std}: {err}", spec.name))
                })?;
                (0..spec.numel()).map(|_| normal.sample(rng) as f32).collect()
            }
            ParamInit::Zeros => vec![0.0; spec.numel()],
        };
        let tensor = Tensor::from_vec(values, spec.shape.as_slice(), device)?;
        data.insert(spec.name.clone(), Var::from_tensor(&tensor)?);
    }
    Ok(())
}
