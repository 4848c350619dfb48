//! DKVMN Network
//!
//! Per timestep t, for a batch of learners:
//! 1. Embed the question `q_t` and the interaction `qa_t = q_t + correct * n_question`
//! 2. Read weights `w_t = softmax(sim(q_t, Mk))`, read content `r_t = Σ w_t(i) Mv(i)`
//! 3. `p_t = sigmoid(W_o tanh(W_f [r_t; q_t] + b_f) + b_o)`
//! 4. Write: `e_t = sigmoid(W_e qa_t)`, `a_t = tanh(W_a qa_t)`, erase-then-add into `Mv`
//!
//! The prediction at step t only sees memory written by steps before t.

pub mod heads;
pub mod params;

use candle_core::{Device, DType, Tensor};
use candle_nn::{Embedding, Init, Module, VarBuilder, VarMap};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::error::Result;
use crate::memory::KeyValueMemory;
use crate::types::ModelConfig;

pub use heads::{ReadHead, WriteHead};
pub use params::{parameter_specs, seed_parameters, ParamInit, ParamSpec};

/// Output of a forward pass over a (B, T) batch
pub struct ForwardOutput {
    /// Pre-sigmoid scores (B, T), still attached to the graph
    pub logits: Tensor,
    /// Predicted probability of a correct answer (B, T)
    pub probs: Tensor,
}

/// Attention distributions recorded during a traced forward pass
pub struct AttentionTrace {
    /// (B, T, N)
    pub read_weights: Tensor,
    /// (B, T, N)
    pub write_weights: Tensor,
}

pub struct Dkvmn {
    config: ModelConfig,
    q_embed: Embedding,
    qa_embed: Embedding,
    memory: KeyValueMemory,
    read_head: ReadHead,
    write_head: WriteHead,
}

impl Dkvmn {
    /// Assemble the network from `vb`; missing variables are created from the builder hints.
    pub fn new(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let init = Init::Randn {
            mean: 0.0,
            stdev: config.init_std,
        };
        let dk = config.q_embed_dim;
        let dv = config.qa_embed_dim;

        let q_weight = vb.pp("q_embed").get_with_hints((config.q_vocab(), dk), "weight", init)?;
        let qa_weight = vb.pp("qa_embed").get_with_hints((config.qa_vocab(), dv), "weight", init)?;

        Ok(Self {
            config: config.clone(),
            q_embed: Embedding::new(q_weight, dk),
            qa_embed: Embedding::new(qa_weight, dv),
            memory: KeyValueMemory::new(
                vb.pp("memory"),
                config.memory_size,
                dk,
                dv,
                config.addressing,
                init,
            )?,
            read_head: ReadHead::new(vb.pp("read"), dk, dv, config.final_fc_dim, init)?,
            write_head: WriteHead::new(vb.pp("write"), dk, dv, config.separate_write_key, init)?,
        })
    }

    /// Seed every parameter into `varmap` from `rng`, then build the network on top of it.
    pub fn seeded(
        varmap: &VarMap,
        config: &ModelConfig,
        rng: &mut ChaCha8Rng,
        device: &Device,
    ) -> Result<Self> {
        let specs = parameter_specs(config);
        seed_parameters(varmap, &specs, rng, device)?;
        for spec in &specs {
            debug!(name = %spec.name, shape = ?spec.shape, "parameter");
        }
        Self::new(VarBuilder::from_varmap(varmap, DType::F32, device), config)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn memory(&self) -> &KeyValueMemory {
        &self.memory
    }

    /// Forward over question ids `q` and interaction ids `qa`, both (B, T) u32.
    pub fn forward(&self, q: &Tensor, qa: &Tensor) -> Result<ForwardOutput> {
        let (output, _) = self.run(q, qa)?;
        Ok(output)
    }

    /// Forward that also returns the read and write weights of every step.
    pub fn forward_traced(&self, q: &Tensor, qa: &Tensor) -> Result<(ForwardOutput, AttentionTrace)> {
        self.run(q, qa)
    }

    fn run(&self, q: &Tensor, qa: &Tensor) -> Result<(ForwardOutput, AttentionTrace)> {
        let (batch_size, seq_len) = q.dims2()?;

        let q_embed = self.q_embed.forward(q)?;
        let qa_embed = self.qa_embed.forward(qa)?;

        // The key memory is static within a sequence, so addressing for every
        // step can be computed up front; only the value memory is recurrent.
        let read_weights = self.memory.attention(&q_embed)?;
        let write_weights = match self.write_head.write_query(&q_embed)? {
            Some(query) => self.memory.attention(&query)?,
            None => read_weights.clone(),
        };
        let (erase, add) = self.write_head.erase_add(&qa_embed)?;

        let mut state = self.memory.init_state(batch_size)?;
        let mut reads = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let w_read = step(&read_weights, t)?;
            reads.push(self.memory.read(&state, &w_read)?);

            let w_write = step(&write_weights, t)?;
            state = self
                .memory
                .write(&state, &w_write, &step(&erase, t)?, &step(&add, t)?)?;
        }
        let read_content = Tensor::stack(&reads, 1)?;

        let logits = self.read_head.logits(&read_content, &q_embed)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;

        Ok((
            ForwardOutput { logits, probs },
            AttentionTrace {
                read_weights,
                write_weights,
            },
        ))
    }
}

/// Slice timestep `t` out of a (B, T, X) tensor as a contiguous (B, X)
fn step(x: &Tensor, t: usize) -> Result<Tensor> {
    Ok(x.narrow(1, t, 1)?.squeeze(1)?.contiguous()?)
}
