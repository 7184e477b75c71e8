// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Content-addressed cache of fine-tuned checkpoints
//!
//! A checkpoint is identified by the exact rows it was trained on, the base
//! model and the task label. The first request for a key trains and persists a
//! model; every later request loads it.

use crate::datasets::{Comment, LabeledText, TaskLabel};
use crate::models::BaseModel;
use crate::training::{FineTuneJob, TrainingArgs, TrainingBackend};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Identity of one trained checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash the training rows (order, id, text and all labels) and append the
    /// model and label names
    pub fn derive(train_rows: &[&Comment], base: BaseModel, label: TaskLabel) -> Self {
        let mut hasher = Sha256::new();
        for row in train_rows {
            hasher.update((row.id as u64).to_le_bytes());
            hasher.update((row.text.len() as u64).to_le_bytes());
            hasher.update(row.text.as_bytes());
            hasher.update([row.toxic, row.engaging, row.fact]);
        }
        let digest = hex::encode(hasher.finalize());
        Self(format!("{}_{}_{}", digest, base.checkpoint_suffix(), label.name()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of looking a key up in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointLookup {
    Found(PathBuf),
    NotFound,
}

/// Directory with one sub-directory per cache key
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Only a missing entry is a miss; other I/O errors propagate
    pub fn lookup(&self, key: &CacheKey) -> Result<CheckpointLookup> {
        let path = self.path_for(key);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => Ok(CheckpointLookup::Found(path)),
            Ok(_) => anyhow::bail!("Checkpoint path is not a directory: {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CheckpointLookup::NotFound),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to inspect checkpoint {}", path.display())),
        }
    }

    /// Let `write` fill a staging directory, then move it into place
    pub fn persist<F>(&self, key: &CacheKey, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let target = self.path_for(key);
        let staging = self.root.join(format!(".{}.partial", key.as_str()));

        if staging.exists() {
            std::fs::remove_dir_all(&staging).with_context(|| {
                format!("Failed to clear stale staging dir {}", staging.display())
            })?;
        }
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        write(&staging)?;

        std::fs::rename(&staging, &target).with_context(|| {
            format!("Failed to move checkpoint into {}", target.display())
        })?;
        Ok(target)
    }
}

/// Loads cached checkpoints or trains and persists new ones
pub struct CheckpointCache<'b, B: TrainingBackend> {
    backend: &'b B,
    store: CheckpointStore,
}

impl<'b, B: TrainingBackend> CheckpointCache<'b, B> {
    pub fn new(backend: &'b B, store: CheckpointStore) -> Self {
        Self { backend, store }
    }

    /// Return the model for `key` and whether it had to be trained
    pub fn get_or_train(
        &self,
        key: &CacheKey,
        train: &[LabeledText],
        validation: &[LabeledText],
        base: BaseModel,
        args: &TrainingArgs,
        seed: u64,
    ) -> Result<(B::Model, bool)> {
        match self.store.lookup(key)? {
            CheckpointLookup::Found(path) => {
                tracing::debug!("Checkpoint hit: {}", key);
                let model = self
                    .backend
                    .load_checkpoint(base, &path)
                    .with_context(|| format!("Failed to load checkpoint {}", path.display()))?;
                Ok((model, false))
            }
            CheckpointLookup::NotFound => {
                tracing::info!(
                    "Checkpoint miss, training {} on {} rows (seed {})",
                    base,
                    train.len(),
                    seed
                );
                let job = FineTuneJob {
                    base,
                    train,
                    validation,
                    args,
                    seed,
                };
                let model = self
                    .backend
                    .fine_tune(&job)
                    .with_context(|| format!("Fine-tuning {} failed for {}", base, key))?;
                let path = self
                    .store
                    .persist(key, |dir| self.backend.save_checkpoint(&model, dir))?;
                tracing::debug!("Checkpoint saved to {}", path.display());
                Ok((model, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn comment(id: usize, text: &str) -> Comment {
        Comment {
            id,
            text: text.to_string(),
            toxic: 1,
            engaging: 0,
            fact: 0,
        }
    }

    /// Backend whose model is the training set size
    #[derive(Default)]
    struct CountingBackend {
        trained: Cell<usize>,
    }

    impl TrainingBackend for CountingBackend {
        type Encoded = usize;
        type Model = usize;

        fn tokenize(&self, _base: BaseModel, texts: &[&str]) -> Result<usize> {
            Ok(texts.len())
        }

        fn fine_tune(&self, job: &FineTuneJob<'_>) -> Result<usize> {
            self.trained.set(self.trained.get() + 1);
            Ok(job.train.len())
        }

        fn save_checkpoint(&self, model: &usize, dir: &Path) -> Result<()> {
            std::fs::write(dir.join("model.txt"), model.to_string())?;
            Ok(())
        }

        fn load_checkpoint(&self, _base: BaseModel, dir: &Path) -> Result<usize> {
            Ok(std::fs::read_to_string(dir.join("model.txt"))?.parse()?)
        }

        fn predict_logits(&self, _model: &usize, encoded: &usize) -> Result<Vec<[f64; 2]>> {
            Ok(vec![[0.0, 0.0]; *encoded])
        }
    }

    fn pairs(n: usize) -> Vec<LabeledText> {
        (0..n)
            .map(|i| LabeledText {
                text: format!("t{}", i),
                label: (i % 2) as u8,
            })
            .collect()
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let rows = vec![comment(0, "hallo"), comment(1, "welt")];
        let refs: Vec<&Comment> = rows.iter().collect();

        let a = CacheKey::derive(&refs, BaseModel::GBert, TaskLabel::Toxic);
        let b = CacheKey::derive(&refs, BaseModel::GBert, TaskLabel::Toxic);
        assert_eq!(a, b);
        assert!(a.as_str().ends_with("_gbert-large_toxic"));
        assert_eq!(a.as_str().find('_'), Some(64));
    }

    #[test]
    fn test_cache_key_changes_with_content_model_and_label() {
        let rows = vec![comment(0, "hallo"), comment(1, "welt")];
        let changed = vec![comment(0, "hallo"), comment(1, "Welt")];
        let refs: Vec<&Comment> = rows.iter().collect();
        let changed_refs: Vec<&Comment> = changed.iter().collect();

        let base = CacheKey::derive(&refs, BaseModel::GBert, TaskLabel::Toxic);
        assert_ne!(base, CacheKey::derive(&changed_refs, BaseModel::GBert, TaskLabel::Toxic));
        assert_ne!(base, CacheKey::derive(&refs, BaseModel::GElectra, TaskLabel::Toxic));
        assert_ne!(base, CacheKey::derive(&refs, BaseModel::GBert, TaskLabel::Fact));

        let reordered: Vec<&Comment> = refs.iter().rev().copied().collect();
        assert_ne!(base, CacheKey::derive(&reordered, BaseModel::GBert, TaskLabel::Toxic));
    }

    #[test]
    fn test_lookup_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let key = CacheKey("abc_gbert-large_toxic".to_string());

        assert_eq!(store.lookup(&key).unwrap(), CheckpointLookup::NotFound);
        let path = store.persist(&key, |_| Ok(())).unwrap();
        assert_eq!(store.lookup(&key).unwrap(), CheckpointLookup::Found(path));
    }

    #[test]
    fn test_lookup_propagates_non_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let key = CacheKey("file_gbert-large_toxic".to_string());
        std::fs::write(store.path_for(&key), b"not a checkpoint").unwrap();

        assert!(store.lookup(&key).is_err());
    }

    #[test]
    fn test_failed_write_leaves_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let key = CacheKey("broken_gbert-large_toxic".to_string());

        let result = store.persist(&key, |_| anyhow::bail!("disk full"));
        assert!(result.is_err());
        assert_eq!(store.lookup(&key).unwrap(), CheckpointLookup::NotFound);
    }

    #[test]
    fn test_get_or_train_trains_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend::default();
        let cache = CheckpointCache::new(&backend, CheckpointStore::new(dir.path()));
        let key = CacheKey("k_gbert-large_toxic".to_string());
        let args = TrainingArgs::default();

        let (model, trained) = cache
            .get_or_train(&key, &pairs(9), &pairs(1), BaseModel::GBert, &args, 0)
            .unwrap();
        assert_eq!((model, trained), (9, true));

        let (model, trained) = cache
            .get_or_train(&key, &pairs(9), &pairs(1), BaseModel::GBert, &args, 0)
            .unwrap();
        assert_eq!((model, trained), (9, false));
        assert_eq!(backend.trained.get(), 1);
    }
}
