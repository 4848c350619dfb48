//! Read and write heads.

use candle_core::{Tensor, D};
use candle_nn::ops::sigmoid;
use candle_nn::{Init, Linear, Module, VarBuilder};

use crate::error::Result;

fn linear(vb: &VarBuilder, in_dim: usize, out_dim: usize, name: &str, init: Init) -> Result<Linear> {
    let vb = vb.pp(name);
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Turns read content plus the question embedding into a correctness logit.
pub struct ReadHead {
    summary: Linear,
    output: Linear,
}

impl ReadHead {
    pub fn new(
        vb: VarBuilder,
        key_dim: usize,
        value_dim: usize,
        hidden_dim: usize,
        init: Init,
    ) -> Result<Self> {
        Ok(Self {
            summary: linear(&vb, value_dim + key_dim, hidden_dim, "summary", init)?,
            output: linear(&vb, hidden_dim, 1, "output", init)?,
        })
    }

    /// read_content (B, T, d_v), q_embed (B, T, d_k) -> logits (B, T)
    pub fn logits(&self, read_content: &Tensor, q_embed: &Tensor) -> Result<Tensor> {
        let joined = Tensor::cat(&[read_content, q_embed], D::Minus1)?;
        let hidden = self.summary.forward(&joined)?.tanh()?;
        Ok(self.output.forward(&hidden)?.squeeze(D::Minus1)?)
    }
}

/// Produces erase/add vectors from the interaction embedding and, optionally,
/// its own addressing key.
pub struct WriteHead {
    erase: Linear,
    add: Linear,
    key: Option<Linear>,
}

impl WriteHead {
    pub fn new(
        vb: VarBuilder,
        key_dim: usize,
        value_dim: usize,
        separate_key: bool,
        init: Init,
    ) -> Result<Self> {
        let key = if separate_key {
            Some(linear(&vb, key_dim, key_dim, "key", init)?)
        } else {
            None
        };
        Ok(Self {
            erase: linear(&vb, value_dim, value_dim, "erase", init)?,
            add: linear(&vb, value_dim, value_dim, "add", init)?,
            key,
        })
    }

    /// Erase in (0, 1) and add in (-1, 1), both shaped like `qa_embed`
    pub fn erase_add(&self, qa_embed: &Tensor) -> Result<(Tensor, Tensor)> {
        let erase = sigmoid(&self.erase.forward(qa_embed)?)?;
        let add = self.add.forward(qa_embed)?.tanh()?;
        Ok((erase, add))
    }

    /// Query used to address memory for writing; `None` means reuse the read weights
    pub fn write_query(&self, q_embed: &Tensor) -> Result<Option<Tensor>> {
        match &self.key {
            Some(proj) => Ok(Some(proj.forward(q_embed)?)),
            None => Ok(None),
        }
    }
}
