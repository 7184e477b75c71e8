// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Bagged ensemble of fine-tuned sub-models for one label and fold
//!
//! Every base model is fine-tuned `model_count` times, each time on a different
//! bootstrap split of the fold's training rows. The softmax outputs of all
//! sub-models on the validation fold are summed and divided by the number of
//! sub-models.

use crate::cache::{CacheKey, CheckpointCache};
use crate::datasets::{labeled_texts, Comment, TaskLabel};
use crate::error::EnsembleError;
use crate::folds::BootstrapSplit;
use crate::models::BaseModel;
use crate::training::{softmax, training_seed, TrainingArgs, TrainingBackend};
use anyhow::{Context, Result};

/// How many sub-models to build and from what
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub base_models: Vec<BaseModel>,
    pub model_count: usize,
    pub bootstrap_fraction: f64,
    pub training: TrainingArgs,
}

/// Averaged class probabilities for a validation fold
#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    /// `[p(0), p(1)]` per validation record
    pub probabilities: Vec<[f64; 2]>,
    /// Argmax class per validation record
    pub predicted: Vec<u8>,
    /// Sub-models that had to be trained (the rest came from the cache)
    pub trained: usize,
}

impl EnsemblePrediction {
    /// Probability of the positive class per record
    pub fn positive(&self) -> Vec<f64> {
        self.probabilities.iter().map(|p| p[1]).collect()
    }
}

fn argmax(p: &[f64; 2]) -> u8 {
    // ties resolve to the first class
    u8::from(p[1] > p[0])
}

pub struct SubModelEnsembler<'b, B: TrainingBackend> {
    backend: &'b B,
    cache: CheckpointCache<'b, B>,
    config: EnsembleConfig,
}

impl<'b, B: TrainingBackend> SubModelEnsembler<'b, B> {
    pub fn new(backend: &'b B, cache: CheckpointCache<'b, B>, config: EnsembleConfig) -> Self {
        Self {
            backend,
            cache,
            config,
        }
    }

    /// Softmax probabilities of one sub-model on the validation fold
    fn sub_model_probabilities(
        &self,
        label: TaskLabel,
        fold: usize,
        repetition: usize,
        base: BaseModel,
        train_fold: &[&Comment],
        encoded_val: &B::Encoded,
    ) -> Result<(Vec<[f64; 2]>, bool)> {
        let split = BootstrapSplit::draw(
            train_fold,
            self.config.bootstrap_fraction,
            repetition as u64,
        );
        if split.train_of_train.is_empty() {
            return Err(EnsembleError::EmptyTrainingSplit { fold, repetition }.into());
        }

        let key = CacheKey::derive(&split.train_of_train, base, label);
        let train = labeled_texts(&split.train_of_train, label);
        let validation = labeled_texts(&split.val_of_train, label);

        let (model, trained) = self.cache.get_or_train(
            &key,
            &train,
            &validation,
            base,
            &self.config.training,
            training_seed(fold, repetition),
        )?;

        let logits = self
            .backend
            .predict_logits(&model, encoded_val)
            .with_context(|| format!("Inference with {} failed", key))?;
        Ok((logits.into_iter().map(softmax).collect(), trained))
    }

    /// Average the predictions of every (base model, repetition) sub-model
    pub fn ensemble_predict(
        &self,
        label: TaskLabel,
        fold: usize,
        train_fold: &[&Comment],
        val_fold: &[&Comment],
    ) -> Result<EnsemblePrediction> {
        let texts: Vec<&str> = val_fold.iter().map(|c| c.text.as_str()).collect();
        let mut total = vec![[0.0f64; 2]; val_fold.len()];
        let mut trained = 0;

        for &base in &self.config.base_models {
            let encoded_val = self
                .backend
                .tokenize(base, &texts)
                .with_context(|| format!("Tokenizing validation fold {} with {}", fold, base))?;

            total = (0..self.config.model_count).try_fold(
                total,
                |mut acc, repetition| -> Result<Vec<[f64; 2]>> {
                    let (probs, was_trained) = self.sub_model_probabilities(
                        label,
                        fold,
                        repetition,
                        base,
                        train_fold,
                        &encoded_val,
                    )?;
                    if probs.len() != acc.len() {
                        return Err(anyhow::Error::from(EnsembleError::LengthMismatch {
                            what: "sub-model predictions",
                            left: probs.len(),
                            right: acc.len(),
                        }));
                    }
                    for (sum, p) in acc.iter_mut().zip(probs) {
                        sum[0] += p[0];
                        sum[1] += p[1];
                    }
                    trained += usize::from(was_trained);
                    Ok(acc)
                },
            )?;
        }

        let members = (self.config.model_count * self.config.base_models.len()) as f64;
        let probabilities: Vec<[f64; 2]> = total
            .into_iter()
            .map(|[a, b]| [a / members, b / members])
            .collect();
        let predicted = probabilities.iter().map(argmax).collect();

        tracing::debug!(
            "{} fold {}: averaged {} sub-models ({} trained)",
            label,
            fold,
            members,
            trained
        );

        Ok(EnsemblePrediction {
            probabilities,
            predicted,
            trained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CheckpointStore;
    use crate::training::FineTuneJob;
    use std::path::Path;

    /// Every model of a base architecture returns the same fixed distribution
    struct FixedBackend;

    impl FixedBackend {
        fn distribution(base: BaseModel) -> [f64; 2] {
            match base {
                BaseModel::GBert => [0.9, 0.1],
                BaseModel::GElectra => [0.7, 0.3],
                BaseModel::GottBert => [0.2, 0.8],
            }
        }
    }

    impl TrainingBackend for FixedBackend {
        type Encoded = usize;
        type Model = BaseModel;

        fn tokenize(&self, _base: BaseModel, texts: &[&str]) -> Result<usize> {
            Ok(texts.len())
        }

        fn fine_tune(&self, job: &FineTuneJob<'_>) -> Result<BaseModel> {
            Ok(job.base)
        }

        fn save_checkpoint(&self, _model: &BaseModel, dir: &Path) -> Result<()> {
            std::fs::write(dir.join("weights"), b"fixed")?;
            Ok(())
        }

        fn load_checkpoint(&self, base: BaseModel, _dir: &Path) -> Result<BaseModel> {
            Ok(base)
        }

        fn predict_logits(&self, model: &BaseModel, encoded: &usize) -> Result<Vec<[f64; 2]>> {
            let [p0, p1] = Self::distribution(*model);
            Ok(vec![[p0.ln(), p1.ln()]; *encoded])
        }
    }

    fn rows(n: usize) -> Vec<Comment> {
        (0..n)
            .map(|i| Comment {
                id: i,
                text: format!("kommentar {}", i),
                toxic: (i % 2) as u8,
                engaging: 0,
                fact: 0,
            })
            .collect()
    }

    fn config(base_models: Vec<BaseModel>, model_count: usize) -> EnsembleConfig {
        EnsembleConfig {
            base_models,
            model_count,
            bootstrap_fraction: 0.1,
            training: TrainingArgs::default(),
        }
    }

    #[test]
    fn test_two_base_models_average() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixedBackend;
        let cache = CheckpointCache::new(&backend, CheckpointStore::new(dir.path()));
        let ensembler = SubModelEnsembler::new(
            &backend,
            cache,
            config(vec![BaseModel::GBert, BaseModel::GElectra], 1),
        );

        let data = rows(30);
        let refs: Vec<&Comment> = data.iter().collect();
        let prediction = ensembler
            .ensemble_predict(TaskLabel::Toxic, 0, &refs[..20], &refs[20..])
            .unwrap();

        assert_eq!(prediction.probabilities.len(), 10);
        for p in &prediction.probabilities {
            assert!((p[0] - 0.8).abs() < 1e-9);
            assert!((p[1] - 0.2).abs() < 1e-9);
        }
        assert!(prediction.predicted.iter().all(|&c| c == 0));
        assert_eq!(prediction.trained, 2);
    }

    #[test]
    fn test_order_of_base_models_does_not_matter() {
        let data = rows(30);
        let refs: Vec<&Comment> = data.iter().collect();
        let backend = FixedBackend;

        let run = |models: Vec<BaseModel>| {
            let dir = tempfile::tempdir().unwrap();
            let cache = CheckpointCache::new(&backend, CheckpointStore::new(dir.path()));
            SubModelEnsembler::new(&backend, cache, config(models, 2))
                .ensemble_predict(TaskLabel::Toxic, 1, &refs[..20], &refs[20..])
                .unwrap()
        };

        let a = run(vec![BaseModel::GBert, BaseModel::GottBert]);
        let b = run(vec![BaseModel::GottBert, BaseModel::GBert]);
        for (pa, pb) in a.probabilities.iter().zip(b.probabilities.iter()) {
            assert!((pa[0] - pb[0]).abs() < 1e-12);
        }
        // (0.9 + 0.2) / 2 vs (0.1 + 0.8) / 2
        assert!(a.predicted.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_second_run_reuses_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixedBackend;
        let data = rows(40);
        let refs: Vec<&Comment> = data.iter().collect();

        for expected_trained in [3, 0] {
            let cache = CheckpointCache::new(&backend, CheckpointStore::new(dir.path()));
            let ensembler = SubModelEnsembler::new(&backend, cache, config(vec![BaseModel::GBert], 3));
            let prediction = ensembler
                .ensemble_predict(TaskLabel::Engaging, 2, &refs[..30], &refs[30..])
                .unwrap();
            assert_eq!(prediction.trained, expected_trained);
        }
    }

    #[test]
    fn test_empty_training_split_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixedBackend;
        let cache = CheckpointCache::new(&backend, CheckpointStore::new(dir.path()));
        let mut cfg = config(vec![BaseModel::GBert], 1);
        cfg.bootstrap_fraction = 1.0;
        let ensembler = SubModelEnsembler::new(&backend, cache, cfg);

        let data = rows(5);
        let refs: Vec<&Comment> = data.iter().collect();
        let err = ensembler
            .ensemble_predict(TaskLabel::Fact, 0, &refs[..3], &refs[3..])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnsembleError>(),
            Some(EnsembleError::EmptyTrainingSplit { fold: 0, repetition: 0 })
        ));
    }
}
