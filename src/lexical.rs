// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! In-process lexical backend
//!
//! A hashed bag-of-words logistic regression that follows the same training
//! protocol as a transformer fine-tune: seeded shuffling, mini-batches with a
//! warmup/decay learning-rate schedule, periodic validation with GermEval F1,
//! best-checkpoint selection and early stopping. The hashing is salted with the
//! base model name, so each base model behaves like a distinct tokenizer.
//!
//! Useful for dry runs of the full cross-validation sweep and for tests.

use crate::datasets::LabeledText;
use crate::metrics::germeval_f1;
use crate::models::BaseModel;
use crate::training::{EarlyStopping, EvalOutcome, FineTuneJob, TrainingBackend};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const CHECKPOINT_FILE: &str = "lexical_model.json";

/// Sparse, L2-normalised term-frequency vector
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Number of hash buckets
    pub dim: usize,
    /// Peak SGD learning rate, independent of `TrainingArgs::learning_rate`
    pub learning_rate: f64,
    pub l2: f64,
    /// Tokens kept per comment
    pub max_tokens: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            dim: 1 << 14,
            learning_rate: 0.5,
            l2: 1e-4,
            max_tokens: 200,
        }
    }
}

/// Logistic regression weights for one base model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalModel {
    pub base: BaseModel,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LexicalModel {
    fn new(base: BaseModel, dim: usize) -> Self {
        Self {
            base,
            weights: vec![0.0; dim],
            bias: 0.0,
        }
    }

    fn logit(&self, x: &SparseVector) -> f64 {
        self.bias + x.iter().map(|&(i, v)| self.weights[i] * v).sum::<f64>()
    }

    fn predict_class(&self, x: &SparseVector) -> u8 {
        u8::from(self.logit(x) > 0.0)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// FNV-1a over salt and token
fn bucket(salt: &str, token: &str, dim: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in salt.bytes().chain(std::iter::once(0xff)).chain(token.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dim as u64) as usize
}

fn tokenize(text: &str, max_tokens: usize) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .take(max_tokens)
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct LexicalBackend {
    config: LexicalConfig,
}

impl LexicalBackend {
    pub fn new(config: LexicalConfig) -> Self {
        Self { config }
    }

    fn encode(&self, base: BaseModel, text: &str) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for token in tokenize(text, self.config.max_tokens) {
            *counts.entry(bucket(base.short_name(), &token, self.config.dim)).or_insert(0.0) += 1.0;
        }

        // sort before summing so the norm does not depend on hash map order
        let mut vector: SparseVector = counts.into_iter().collect();
        vector.sort_unstable_by_key(|&(i, _)| i);
        let norm = vector.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, v) in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    fn encode_all(&self, base: BaseModel, rows: &[LabeledText]) -> (Vec<SparseVector>, Vec<u8>) {
        rows.iter()
            .map(|r| (self.encode(base, &r.text), r.label))
            .unzip()
    }

    /// Linear warmup followed by linear decay to zero
    fn learning_rate(&self, step: usize, warmup: usize, total: usize) -> f64 {
        let peak = self.config.learning_rate;
        if step < warmup {
            peak * (step + 1) as f64 / warmup as f64
        } else if total > warmup {
            peak * (total - step) as f64 / (total - warmup) as f64
        } else {
            peak
        }
    }
}

impl TrainingBackend for LexicalBackend {
    type Encoded = Vec<SparseVector>;
    type Model = LexicalModel;

    fn tokenize(&self, base: BaseModel, texts: &[&str]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| self.encode(base, t)).collect())
    }

    fn fine_tune(&self, job: &FineTuneJob<'_>) -> Result<LexicalModel> {
        let args = job.args;
        if args.batch_size == 0 || args.eval_steps == 0 {
            anyhow::bail!("batch_size and eval_steps must be positive");
        }

        let (train_x, train_y) = self.encode_all(job.base, job.train);
        let (val_x, val_y) = self.encode_all(job.base, job.validation);

        let mut rng = ChaCha8Rng::seed_from_u64(job.seed);
        let mut model = LexicalModel::new(job.base, self.config.dim);
        let mut order: Vec<usize> = (0..train_x.len()).collect();

        let steps_per_epoch = train_x.len().div_ceil(args.batch_size);
        let total_steps = steps_per_epoch * args.epochs;
        let warmup = (total_steps as f64 * args.warmup_ratio) as usize;

        let mut stopper = EarlyStopping::new(args.early_stopping_patience);
        let mut best: Option<LexicalModel> = None;
        let mut step = 0;

        'training: for epoch in 0..args.epochs {
            order.shuffle(&mut rng);

            for batch in order.chunks(args.batch_size) {
                let lr = self.learning_rate(step, warmup, total_steps);
                let scale = lr / batch.len() as f64;

                let mut grad: HashMap<usize, f64> = HashMap::new();
                let mut grad_bias = 0.0;
                for &i in batch {
                    let err = sigmoid(model.logit(&train_x[i])) - f64::from(train_y[i]);
                    grad_bias += err;
                    for &(j, v) in &train_x[i] {
                        *grad.entry(j).or_insert(0.0) += err * v;
                    }
                }

                let decay = 1.0 - lr * self.config.l2;
                for w in model.weights.iter_mut() {
                    *w *= decay;
                }
                for (j, g) in grad {
                    model.weights[j] -= scale * g;
                }
                model.bias -= scale * grad_bias;
                step += 1;

                if step % args.eval_steps == 0 && !val_x.is_empty() {
                    let predicted: Vec<u8> = val_x.iter().map(|x| model.predict_class(x)).collect();
                    let f1 = germeval_f1(&val_y, &predicted);
                    match stopper.observe(step, f1) {
                        EvalOutcome::Improved => best = Some(model.clone()),
                        EvalOutcome::Stalled => {}
                        EvalOutcome::Stop => {
                            tracing::debug!("Early stopping at epoch {}, step {}", epoch, step);
                            break 'training;
                        }
                    }
                }
            }
        }

        if let Some((best_step, f1)) = stopper.best() {
            tracing::debug!("Best validation F1 {:.4} at step {}", f1, best_step);
        }
        Ok(best.unwrap_or(model))
    }

    fn save_checkpoint(&self, model: &LexicalModel, dir: &Path) -> Result<()> {
        let path = dir.join(CHECKPOINT_FILE);
        let json = serde_json::to_string(model)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn load_checkpoint(&self, base: BaseModel, dir: &Path) -> Result<LexicalModel> {
        let path = dir.join(CHECKPOINT_FILE);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let model: LexicalModel = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt checkpoint {}", path.display()))?;

        if model.base != base {
            anyhow::bail!(
                "Checkpoint {} was trained from {}, not {}",
                path.display(),
                model.base,
                base
            );
        }
        if model.weights.len() != self.config.dim {
            anyhow::bail!(
                "Checkpoint {} has {} weights, backend expects {}",
                path.display(),
                model.weights.len(),
                self.config.dim
            );
        }
        Ok(model)
    }

    fn predict_logits(&self, model: &LexicalModel, encoded: &Vec<SparseVector>) -> Result<Vec<[f64; 2]>> {
        Ok(encoded.iter().map(|x| [0.0, model.logit(x)]).collect())
    }
}
