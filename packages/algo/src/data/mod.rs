//! Knowledge Tracing Datasets
//!
//! Learner histories are stored in a three-line CSV layout:
//!
//! ```text
//! 4
//! 12,7,7,31
//! 1,0,1,1
//! ```
//!
//! line 1 is the number of interactions, line 2 the question ids (1-based) and
//! line 3 the answers (1 = correct). Histories longer than `seqlen` are split
//! into consecutive chunks; every chunk is right-padded with `PAD_INDEX`.

use std::path::Path;

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use crate::error::{DkvmnError, Result};
use crate::types::{PADDING_TARGET, PAD_INDEX};

/// Padded question and interaction ids, row-major (samples x seqlen)
#[derive(Clone, Debug, PartialEq)]
pub struct KtDataset {
    n_question: usize,
    seqlen: usize,
    q: Vec<u32>,
    qa: Vec<u32>,
}

/// One learner's raw history
#[derive(Clone, Debug, PartialEq)]
pub struct LearnerRecord {
    pub questions: Vec<u32>,
    pub answers: Vec<u8>,
}

impl KtDataset {
    /// Build from learner records, chunking long histories.
    pub fn from_records(records: &[LearnerRecord], n_question: usize, seqlen: usize) -> Result<Self> {
        if seqlen == 0 {
            return Err(DkvmnError::Config("seqlen must be positive".into()));
        }
        let mut q = Vec::new();
        let mut qa = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            if record.questions.len() != record.answers.len() {
                return Err(DkvmnError::Data {
                    path: "<records>".into(),
                    line: idx,
                    message: format!(
                        "{} questions but {} answers",
                        record.questions.len(),
                        record.answers.len()
                    ),
                });
            }
            if let Some((step, message)) = invalid_step(record, n_question) {
                return Err(DkvmnError::Data {
                    path: "<records>".into(),
                    line: idx,
                    message: format!("step {step}: {message}"),
                });
            }
            for (q_chunk, a_chunk) in record
                .questions
                .chunks(seqlen)
                .zip(record.answers.chunks(seqlen))
            {
                let start = q.len();
                q.resize(start + seqlen, PAD_INDEX);
                qa.resize(start + seqlen, PAD_INDEX);
                for (i, (&question, &answer)) in q_chunk.iter().zip(a_chunk.iter()).enumerate() {
                    q[start + i] = question;
                    qa[start + i] = question + answer as u32 * n_question as u32;
                }
            }
        }
        Ok(Self {
            n_question,
            seqlen,
            q,
            qa,
        })
    }

    /// Parse the three-line CSV layout from a string. `source` names the input in errors.
    pub fn parse(text: &str, source: &str, n_question: usize, seqlen: usize) -> Result<Self> {
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .collect();

        if lines.len() % 3 != 0 {
            let line = lines.last().map(|(n, _)| *n).unwrap_or(0);
            return Err(DkvmnError::Data {
                path: source.to_string(),
                line,
                message: format!("expected groups of 3 lines, found {} lines", lines.len()),
            });
        }

        let records: Vec<LearnerRecord> = lines
            .par_chunks(3)
            .map(|group| parse_learner(group, source, n_question))
            .collect::<Result<_>>()?;

        Self::from_records(&records, n_question, seqlen)
    }

    pub fn load_csv(path: impl AsRef<Path>, n_question: usize, seqlen: usize) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let dataset = Self::parse(&text, &path.display().to_string(), n_question, seqlen)?;
        info!(
            path = %path.display(),
            samples = dataset.len(),
            seqlen,
            "dataset loaded"
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.q.len() / self.seqlen
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn seqlen(&self) -> usize {
        self.seqlen
    }

    pub fn n_question(&self) -> usize {
        self.n_question
    }

    pub fn q_row(&self, idx: usize) -> &[u32] {
        &self.q[idx * self.seqlen..(idx + 1) * self.seqlen]
    }

    pub fn qa_row(&self, idx: usize) -> &[u32] {
        &self.qa[idx * self.seqlen..(idx + 1) * self.seqlen]
    }

    /// Correctness target of an interaction id; padding maps to the sentinel.
    pub fn target_of(&self, qa: u32) -> f32 {
        if qa == PAD_INDEX {
            PADDING_TARGET
        } else {
            ((qa - 1) / self.n_question as u32) as f32
        }
    }

    /// Sample order for one epoch: shuffled when an RNG is supplied.
    pub fn epoch_order(&self, rng: Option<&mut ChaCha8Rng>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order
    }

    /// Group `order` into batches; with `drop_last` the incomplete tail is skipped.
    pub fn batch_indices(order: &[usize], batch_size: usize, drop_last: bool) -> Vec<&[usize]> {
        order
            .chunks(batch_size.max(1))
            .filter(|chunk| !drop_last || chunk.len() == batch_size)
            .collect()
    }

    /// Materialise the samples at `indices` as tensors on `device`.
    pub fn batch(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        let rows = indices.len();
        let mut q = Vec::with_capacity(rows * self.seqlen);
        let mut qa = Vec::with_capacity(rows * self.seqlen);
        for &idx in indices {
            q.extend_from_slice(self.q_row(idx));
            qa.extend_from_slice(self.qa_row(idx));
        }
        let raw_targets: Vec<f32> = qa.iter().map(|&id| self.target_of(id)).collect();
        let mask: Vec<f32> = raw_targets
            .iter()
            .map(|&t| if t >= 0.0 { 1.0 } else { 0.0 })
            .collect();
        let targets: Vec<f32> = raw_targets.iter().map(|&t| t.max(0.0)).collect();
        let valid_count = mask.iter().filter(|&&m| m > 0.0).count();

        let shape = (rows, self.seqlen);
        Ok(Batch {
            q: Tensor::from_vec(q, shape, device)?,
            qa: Tensor::from_vec(qa, shape, device)?,
            targets: Tensor::from_vec(targets, shape, device)?,
            mask: Tensor::from_vec(mask, shape, device)?,
            raw_targets,
            valid_count,
        })
    }
}

fn parse_learner(group: &[(usize, &str)], source: &str, n_question: usize) -> Result<LearnerRecord> {
    let err = |line: usize, message: String| DkvmnError::Data {
        path: source.to_string(),
        line,
        message,
    };

    let (len_line, len_text) = group[0];
    let declared: usize = len_text
        .trim_end_matches(',')
        .parse()
        .map_err(|_| err(len_line, format!("invalid sequence length {len_text:?}")))?;

    let (q_line, q_text) = group[1];
    let questions = split_fields(q_text)
        .map(|field| {
            let id: u32 = field
                .parse()
                .map_err(|_| err(q_line, format!("invalid question id {field:?}")))?;
            if id == 0 || id as usize > n_question {
                return Err(err(q_line, format!("question id {id} outside 1..={n_question}")));
            }
            Ok(id)
        })
        .collect::<Result<Vec<u32>>>()?;

    let (a_line, a_text) = group[2];
    let answers = split_fields(a_text)
        .map(|field| match field {
            "0" => Ok(0u8),
            "1" => Ok(1u8),
            other => Err(err(a_line, format!("answer must be 0 or 1, got {other:?}"))),
        })
        .collect::<Result<Vec<u8>>>()?;

    if questions.len() != answers.len() {
        return Err(err(
            a_line,
            format!("{} questions but {} answers", questions.len(), answers.len()),
        ));
    }
    if declared != questions.len() {
        tracing::debug!(
            line = len_line,
            declared,
            actual = questions.len(),
            "declared length differs from parsed length"
        );
    }

    Ok(LearnerRecord { questions, answers })
}

/// First step whose question id is outside `1..=n_question` or whose answer is not 0/1.
fn invalid_step(record: &LearnerRecord, n_question: usize) -> Option<(usize, String)> {
    record
        .questions
        .iter()
        .zip(record.answers.iter())
        .enumerate()
        .find_map(|(step, (&question, &answer))| {
            if question == 0 || question as usize > n_question {
                Some((step, format!("question id {question} outside 1..={n_question}")))
            } else if answer > 1 {
                Some((step, format!("answer must be 0 or 1, got {answer}")))
            } else {
                None
            }
        })
}

fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(',').map(str::trim).filter(|field| !field.is_empty())
}

/// Tensors for one mini-batch, all shaped (B, T)
pub struct Batch {
    /// Question ids (u32)
    pub q: Tensor,
    /// Interaction ids (u32)
    pub qa: Tensor,
    /// 0/1 targets with padding replaced by 0 (f32)
    pub targets: Tensor,
    /// 1 for real interactions, 0 for padding (f32)
    pub mask: Tensor,
    /// Targets with the padding sentinel kept, row-major
    pub raw_targets: Vec<f32>,
    pub valid_count: usize,
}
