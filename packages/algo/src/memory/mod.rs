//! Key-Value Memory
//!
//! The memory pair at the heart of the network:
//! - Key memory `Mk` (N x d_k) stores one concept embedding per slot and stays fixed
//!   while a sequence is processed
//! - Value memory `Mv` (N x d_v) stores the learner's mastery of each concept and is
//!   rewritten after every interaction
//!
//! Every row of a batch is an independent learner, so the value memory carries a
//! leading batch dimension and is rebuilt from the learned initial state for each batch.

use candle_core::{Tensor, D};
use candle_nn::{Init, VarBuilder};

use crate::error::Result;
use crate::types::{Addressing, COSINE_EPSILON};

pub struct KeyValueMemory {
    /// (N, d_k)
    key: Tensor,
    /// (N, d_v)
    init_value: Tensor,
    addressing: Addressing,
}

impl KeyValueMemory {
    pub fn new(
        vb: VarBuilder,
        memory_size: usize,
        key_dim: usize,
        value_dim: usize,
        addressing: Addressing,
        init: Init,
    ) -> Result<Self> {
        let key = vb.get_with_hints((memory_size, key_dim), "key", init)?;
        let init_value = vb.get_with_hints((memory_size, value_dim), "init_value", init)?;
        Ok(Self::from_tensors(key, init_value, addressing))
    }

    pub fn from_tensors(key: Tensor, init_value: Tensor, addressing: Addressing) -> Self {
        Self {
            key,
            init_value,
            addressing,
        }
    }

    pub fn memory_size(&self) -> usize {
        self.key.dims()[0]
    }

    pub fn value_dim(&self) -> usize {
        self.init_value.dims()[1]
    }

    pub fn key(&self) -> &Tensor {
        &self.key
    }

    /// Attention over memory slots for queries shaped (..., d_k).
    ///
    /// Returns (..., N); the last axis is a softmax and sums to 1.
    pub fn attention(&self, query: &Tensor) -> Result<Tensor> {
        let dims = query.dims().to_vec();
        let key_dim = *dims.last().unwrap_or(&0);
        let rows = query.elem_count() / key_dim.max(1);

        let flat = query.reshape((rows, key_dim))?;
        let (flat, key) = match self.addressing {
            Addressing::Dot => (flat, self.key.clone()),
            Addressing::Cosine => (l2_normalize(&flat)?, l2_normalize(&self.key)?),
        };
        let scores = flat.matmul(&key.t()?.contiguous()?)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let mut out_dims = dims[..dims.len() - 1].to_vec();
        out_dims.push(self.memory_size());
        Ok(weights.reshape(out_dims)?)
    }

    /// Fresh value memory (B, N, d_v) broadcast from the learned initial state.
    pub fn init_state(&self, batch_size: usize) -> Result<Tensor> {
        let (slots, width) = self.init_value.dims2()?;
        Ok(self
            .init_value
            .unsqueeze(0)?
            .broadcast_as((batch_size, slots, width))?
            .contiguous()?)
    }

    /// Weighted sum of value slots: state (B, N, d_v), weights (B, N) -> (B, d_v)
    pub fn read(&self, state: &Tensor, weights: &Tensor) -> Result<Tensor> {
        let read = weights.unsqueeze(1)?.matmul(state)?;
        Ok(read.squeeze(1)?)
    }

    /// Erase-then-add update.
    ///
    /// `Mv_i' = Mv_i * (1 - w_i * erase) + w_i * add` with weights (B, N) and
    /// erase/add (B, d_v).
    pub fn write(
        &self,
        state: &Tensor,
        weights: &Tensor,
        erase: &Tensor,
        add: &Tensor,
    ) -> Result<Tensor> {
        let w = weights.unsqueeze(2)?;
        let erase_term = w.broadcast_mul(&erase.unsqueeze(1)?)?;
        let add_term = w.broadcast_mul(&add.unsqueeze(1)?)?;
        let retained = state.mul(&erase_term.affine(-1.0, 1.0)?)?;
        Ok(retained.add(&add_term)?)
    }
}

/// Row-wise L2 normalisation of a 2-D tensor
fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x
        .sqr()?
        .sum_keepdim(D::Minus1)?
        .sqrt()?
        .affine(1.0, COSINE_EPSILON)?;
    Ok(x.broadcast_div(&norm)?)
}
