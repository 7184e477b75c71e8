// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Boundary to the tokenizer/transformer stack
//!
//! The crate never looks inside a tokenizer or a model. A `TrainingBackend`
//! turns texts into an opaque encoding, fine-tunes a binary classifier,
//! persists and restores it, and produces two logits per record.

use crate::datasets::LabeledText;
use crate::models::BaseModel;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyperparameters forwarded to the backend for every fine-tuning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingArgs {
    /// Upper bound on passes over the training data
    pub epochs: usize,
    /// Evaluate on the validation set every this many optimizer steps
    pub eval_steps: usize,
    /// Stop after this many evaluations without F1 improvement
    pub early_stopping_patience: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub warmup_ratio: f64,
    /// Token limit per comment (padding and truncation length)
    pub max_length: usize,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            epochs: 10,
            eval_steps: 40,
            early_stopping_patience: 2,
            batch_size: 24,
            learning_rate: 5e-5,
            warmup_ratio: 0.3,
            max_length: 200,
        }
    }
}

/// Seed for one sub-model's initialization and shuffling
pub fn training_seed(fold: usize, repetition: usize) -> u64 {
    (fold * 100 + repetition) as u64
}

/// Everything a backend needs to fine-tune one sub-model
#[derive(Debug, Clone, Copy)]
pub struct FineTuneJob<'a> {
    pub base: BaseModel,
    pub train: &'a [LabeledText],
    pub validation: &'a [LabeledText],
    pub args: &'a TrainingArgs,
    pub seed: u64,
}

/// Tokenizer plus binary sequence classifier for a set of base models
pub trait TrainingBackend {
    /// Tokenized batch of texts
    type Encoded;
    /// Fine-tuned classifier
    type Model;

    fn tokenize(&self, base: BaseModel, texts: &[&str]) -> Result<Self::Encoded>;

    /// Train a fresh 2-class classifier initialized from `job.base`.
    ///
    /// Implementations evaluate every `eval_steps`, keep the weights with the
    /// best GermEval F1 on `job.validation` and stop after
    /// `early_stopping_patience` evaluations without improvement.
    fn fine_tune(&self, job: &FineTuneJob<'_>) -> Result<Self::Model>;

    fn save_checkpoint(&self, model: &Self::Model, dir: &Path) -> Result<()>;

    fn load_checkpoint(&self, base: BaseModel, dir: &Path) -> Result<Self::Model>;

    /// Raw class scores, one `[negative, positive]` pair per encoded record
    fn predict_logits(&self, model: &Self::Model, encoded: &Self::Encoded) -> Result<Vec<[f64; 2]>>;
}

/// Numerically stable softmax over two logits
pub fn softmax(logits: [f64; 2]) -> [f64; 2] {
    let max = logits[0].max(logits[1]);
    let e0 = (logits[0] - max).exp();
    let e1 = (logits[1] - max).exp();
    let sum = e0 + e1;
    [e0 / sum, e1 / sum]
}

/// Outcome of recording one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    /// New best score, keep the current weights
    Improved,
    /// No improvement, keep training
    Stalled,
    /// Patience exhausted, stop training
    Stop,
}

/// Best-checkpoint selection with patience-based early stopping
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<(usize, f64)>,
    stalled: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            stalled: 0,
        }
    }

    /// Record the validation F1 observed at `step`
    pub fn observe(&mut self, step: usize, f1: f64) -> EvalOutcome {
        match self.best {
            Some((_, best)) if f1 <= best => {
                self.stalled += 1;
                if self.stalled >= self.patience {
                    EvalOutcome::Stop
                } else {
                    EvalOutcome::Stalled
                }
            }
            _ => {
                self.best = Some((step, f1));
                self.stalled = 0;
                EvalOutcome::Improved
            }
        }
    }

    /// Step and score of the best evaluation so far
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}
