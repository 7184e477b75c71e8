// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validation driver for the GermEval ensemble
//!
//! Orchestrates:
//! - K-fold partitioning of the shuffled dataset
//! - One bagged ensemble per (label, fold)
//! - Per-fold scoring and the macro aggregate over labels
//! - Results serialization and a Markdown summary

use crate::cache::{CheckpointCache, CheckpointStore};
use crate::datasets::{Dataset, TaskLabel, DEFAULT_SHUFFLE_SEED};
use crate::ensemble::{EnsembleConfig, SubModelEnsembler};
use crate::error::EnsembleError;
use crate::folds::k_fold;
use crate::metrics::{ScoreCollection, ScoreRecord, METRIC_NAMES};
use crate::models::BaseModel;
use crate::training::{TrainingArgs, TrainingBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration for a cross-validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    /// Seed for the one-off dataset shuffle
    pub seed: u64,
    /// CSV to evaluate on; a synthetic dataset is generated when absent
    pub dataset_path: Option<String>,
    pub synthetic_size: usize,
    pub folds: usize,
    /// Bootstrap repetitions per base model
    pub model_count: usize,
    pub base_models: Vec<BaseModel>,
    pub labels: Vec<TaskLabel>,
    /// Share of a fold's training rows held out per sub-model
    pub bootstrap_fraction: f64,
    pub checkpoint_dir: String,
    pub output_dir: String,
    pub training: TrainingArgs,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SHUFFLE_SEED,
            dataset_path: None,
            synthetic_size: 1000,
            folds: 5,
            model_count: 25,
            base_models: vec![BaseModel::GBert, BaseModel::GElectra],
            labels: TaskLabel::ALL.to_vec(),
            bootstrap_fraction: 0.1,
            checkpoint_dir: "../models".to_string(),
            output_dir: "results".to_string(),
            training: TrainingArgs::default(),
        }
    }
}

impl CrossValidationConfig {
    /// Load a JSON config; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), EnsembleError> {
        let invalid = |msg: &str| Err(EnsembleError::InvalidConfig(msg.to_string()));

        if self.folds < 2 {
            return invalid("at least 2 folds are required");
        }
        if self.model_count == 0 {
            return invalid("model_count must be positive");
        }
        if self.base_models.is_empty() {
            return invalid("at least one base model is required");
        }
        if self.labels.is_empty() {
            return invalid("at least one label is required");
        }
        if !(self.bootstrap_fraction > 0.0 && self.bootstrap_fraction < 1.0) {
            return invalid("bootstrap_fraction must lie strictly between 0 and 1");
        }
        if self.training.batch_size == 0 || self.training.eval_steps == 0 {
            return invalid("batch_size and eval_steps must be positive");
        }
        Ok(())
    }

    fn ensemble_config(&self) -> EnsembleConfig {
        EnsembleConfig {
            base_models: self.base_models.clone(),
            model_count: self.model_count,
            bootstrap_fraction: self.bootstrap_fraction,
            training: self.training.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelBalance {
    pub positive: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub total_samples: usize,
    pub label_distribution: BTreeMap<String, LabelBalance>,
}

impl DatasetInfo {
    fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            name: dataset.name.clone(),
            total_samples: dataset.len(),
            label_distribution: dataset
                .label_distribution()
                .into_iter()
                .map(|(label, (positive, negative))| {
                    (label.name().to_string(), LabelBalance { positive, negative })
                })
                .collect(),
        }
    }
}

/// Per-fold scores of one label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelScores {
    pub label: TaskLabel,
    pub scores: ScoreCollection,
}

/// Complete cross-validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationResults {
    pub config: CrossValidationConfig,
    pub dataset_info: DatasetInfo,
    pub labels: Vec<LabelScores>,
    pub macro_scores: ScoreCollection,
    /// Sub-models trained during this run (cache hits excluded)
    pub sub_models_trained: usize,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl CrossValidationResults {
    pub fn scores_for(&self, label: TaskLabel) -> Option<&ScoreCollection> {
        self.labels.iter().find(|l| l.label == label).map(|l| &l.scores)
    }

    /// Report titles with their collections, labels first and macro last
    pub fn report_entries(&self) -> Vec<(&'static str, &ScoreCollection)> {
        self.labels
            .iter()
            .map(|l| (l.label.report_title(), &l.scores))
            .chain(std::iter::once(("macro", &self.macro_scores)))
            .collect()
    }
}

/// Runs the (label × fold) sweep
pub struct CrossValidationDriver<'b, B: TrainingBackend> {
    config: CrossValidationConfig,
    backend: &'b B,
    progress: Option<ProgressBar>,
}

impl<'b, B: TrainingBackend> CrossValidationDriver<'b, B> {
    pub fn new(config: CrossValidationConfig, backend: &'b B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            progress: None,
        })
    }

    /// Advance `progress` by one unit per finished (label, fold)
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Number of (label, fold) units the sweep will run
    pub fn total_units(&self) -> u64 {
        (self.config.labels.len() * self.config.folds) as u64
    }

    /// Load the configured dataset
    pub fn load_dataset(&self) -> Result<Dataset> {
        match self.config.dataset_path {
            Some(ref path) => Dataset::load_csv(Path::new(path), self.config.seed),
            None => {
                tracing::warn!(
                    "No dataset path provided, using {} synthetic comments",
                    self.config.synthetic_size
                );
                Ok(Dataset::load_synthetic(
                    self.config.synthetic_size,
                    self.config.seed,
                ))
            }
        }
    }

    /// Run the full sweep over labels and folds
    pub fn run(&self, dataset: &Dataset) -> Result<CrossValidationResults> {
        let folds = k_fold(dataset.len(), self.config.folds)?;

        std::fs::create_dir_all(&self.config.checkpoint_dir).with_context(|| {
            format!("Failed to create checkpoint dir {}", self.config.checkpoint_dir)
        })?;
        let cache = CheckpointCache::new(
            self.backend,
            CheckpointStore::new(&self.config.checkpoint_dir),
        );
        let ensembler = SubModelEnsembler::new(self.backend, cache, self.config.ensemble_config());

        let mut labels = Vec::with_capacity(self.config.labels.len());
        let mut sub_models_trained = 0;

        for &label in &self.config.labels {
            let mut scores = ScoreCollection::default();

            for fold in &folds {
                if let Some(ref pb) = self.progress {
                    pb.set_message(format!("{} fold {}", label, fold.index));
                }

                let train = dataset.select(&fold.train);
                let validation = dataset.select(&fold.validation);
                let y_val: Vec<u8> = validation.iter().map(|c| c.label(label)).collect();

                let prediction = ensembler
                    .ensemble_predict(label, fold.index, &train, &validation)
                    .with_context(|| format!("Ensemble for {} fold {} failed", label, fold.index))?;
                let record = ScoreRecord::score(&y_val, &prediction.predicted, &prediction.positive())?;

                tracing::info!(
                    "{} fold {} - Precision: {:.4}, Recall: {:.4}, F1: {:.4}, AUC: {:.4}",
                    label,
                    fold.index,
                    record.precision,
                    record.recall,
                    record.f1,
                    record.auc
                );

                sub_models_trained += prediction.trained;
                scores.push(record);
                if let Some(ref pb) = self.progress {
                    pb.inc(1);
                }
            }

            labels.push(LabelScores { label, scores });
        }

        let named: Vec<(&str, &ScoreCollection)> =
            labels.iter().map(|l| (l.label.name(), &l.scores)).collect();
        let macro_scores = ScoreCollection::macro_average(&named)?;

        Ok(CrossValidationResults {
            config: self.config.clone(),
            dataset_info: DatasetInfo::from_dataset(dataset),
            labels,
            macro_scores,
            sub_models_trained,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Save results to JSON file
pub fn save_results(results: &CrossValidationResults, output_path: &Path) -> Result<()> {
    std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(output_path, json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    tracing::info!("Results saved to {}", output_path.display());
    Ok(())
}

/// Generate a markdown report
pub fn generate_report(results: &CrossValidationResults) -> String {
    let mut report = String::new();

    report.push_str("# GermEval Ensemble Cross-Validation Report\n\n");
    report.push_str(&format!(
        "**Generated:** {}\n\n",
        results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("**Version:** {}\n\n", results.version));

    report.push_str("## Dataset\n\n");
    report.push_str(&format!("- **Name:** {}\n", results.dataset_info.name));
    report.push_str(&format!(
        "- **Total Samples:** {}\n",
        results.dataset_info.total_samples
    ));
    for (label, balance) in &results.dataset_info.label_distribution {
        report.push_str(&format!(
            "- **{}:** {} positive / {} negative\n",
            label, balance.positive, balance.negative
        ));
    }

    let models: Vec<&str> = results.config.base_models.iter().map(|m| m.hub_id()).collect();
    report.push_str("\n## Ensemble\n\n");
    report.push_str(&format!("- **Folds:** {}\n", results.config.folds));
    report.push_str(&format!("- **Base models:** {}\n", models.join(", ")));
    report.push_str(&format!(
        "- **Sub-models per base model:** {}\n",
        results.config.model_count
    ));
    report.push_str(&format!(
        "- **Sub-models trained this run:** {}\n\n",
        results.sub_models_trained
    ));

    report.push_str("## Scores (mean ± std over folds, %)\n\n");
    report.push_str("| Label | Precision | Recall | F1 | AUC |\n");
    report.push_str("|-------|-----------|--------|----|-----|\n");
    for (title, scores) in results.report_entries() {
        let cells: Vec<String> = scores
            .summary()
            .iter()
            .map(|s| format!("{:.2} ± {:.2}", s.mean * 100.0, s.std * 100.0))
            .collect();
        report.push_str(&format!("| {} | {} |\n", title, cells.join(" | ")));
    }

    report.push_str("\n## Per-Fold Scores\n\n");
    for (title, scores) in results.report_entries() {
        report.push_str(&format!("### {}\n\n", title));
        report.push_str(&format!("| Fold | {} |\n", METRIC_NAMES.join(" | ")));
        report.push_str("|------|-----------|--------|----|-----|\n");
        for fold in 0..scores.len() {
            if let Some(r) = scores.record(fold) {
                report.push_str(&format!(
                    "| {} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                    fold, r.precision, r.recall, r.f1, r.auc
                ));
            }
        }
        report.push('\n');
    }

    report.push_str("## Configuration\n\n");
    report.push_str(&format!(
        "```json\n{}\n```\n",
        serde_json::to_string_pretty(&results.config).unwrap_or_default()
    ));

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::{LexicalBackend, LexicalConfig};

    fn small_config(checkpoints: &Path) -> CrossValidationConfig {
        CrossValidationConfig {
            seed: 42,
            synthetic_size: 20,
            folds: 2,
            model_count: 2,
            base_models: vec![BaseModel::GBert],
            checkpoint_dir: checkpoints.to_string_lossy().to_string(),
            ..CrossValidationConfig::default()
        }
    }

    fn backend() -> LexicalBackend {
        LexicalBackend::new(LexicalConfig {
            dim: 2048,
            ..LexicalConfig::default()
        })
    }

    #[test]
    fn test_end_to_end_small_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let driver = CrossValidationDriver::new(small_config(dir.path()), &backend).unwrap();
        let dataset = driver.load_dataset().unwrap();
        assert_eq!(dataset.len(), 20);

        let results = driver.run(&dataset).unwrap();

        assert_eq!(results.labels.len(), 3);
        for (_, scores) in results.report_entries() {
            assert_eq!(scores.len(), 2);
            for column in scores.columns() {
                assert!(column.iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
        assert_eq!(results.macro_scores.len(), 2);

        // at most 3 labels x 2 folds x 2 repetitions, one directory per trained key
        let checkpoints = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert!(results.sub_models_trained > 0 && results.sub_models_trained <= 12);
        assert_eq!(checkpoints, results.sub_models_trained);
    }

    #[test]
    fn test_second_run_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let driver = CrossValidationDriver::new(small_config(dir.path()), &backend).unwrap();
        let dataset = driver.load_dataset().unwrap();

        let first = driver.run(&dataset).unwrap();
        let second = driver.run(&dataset).unwrap();

        assert_eq!(second.sub_models_trained, 0);
        for (a, b) in first.macro_scores.f1.iter().zip(&second.macro_scores.f1) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_macro_is_mean_of_labels() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let driver = CrossValidationDriver::new(small_config(dir.path()), &backend).unwrap();
        let results = driver.run(&driver.load_dataset().unwrap()).unwrap();

        for fold in 0..2 {
            let mean: f64 = TaskLabel::ALL
                .iter()
                .map(|&l| results.scores_for(l).unwrap().f1[fold])
                .sum::<f64>()
                / 3.0;
            assert!((results.macro_scores.f1[fold] - mean).abs() < 1e-12);
        }
    }

    #[test]
    fn test_too_few_records_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let mut config = small_config(dir.path());
        config.folds = 5;
        let driver = CrossValidationDriver::new(config, &backend).unwrap();

        let dataset = Dataset::load_synthetic(3, 1);
        assert!(driver.run(&dataset).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CrossValidationConfig::default();
        assert!(config.validate().is_ok());

        config.bootstrap_fraction = 1.0;
        assert!(matches!(config.validate(), Err(EnsembleError::InvalidConfig(_))));

        let config = CrossValidationConfig {
            base_models: vec![],
            ..CrossValidationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.json");
        std::fs::write(
            &path,
            r#"{"model_count": 3, "base_models": ["gottbert"], "training": {"epochs": 2}}"#,
        )
        .unwrap();

        let config = CrossValidationConfig::from_json_file(&path).unwrap();
        assert_eq!(config.model_count, 3);
        assert_eq!(config.base_models, vec![BaseModel::GottBert]);
        assert_eq!(config.training.epochs, 2);
        assert_eq!(config.training.eval_steps, 40);
        assert_eq!(config.folds, 5);
    }

    #[test]
    fn test_generate_report() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let driver = CrossValidationDriver::new(small_config(dir.path()), &backend).unwrap();
        let results = driver.run(&driver.load_dataset().unwrap()).unwrap();

        let report = generate_report(&results);
        assert!(report.contains("GermEval Ensemble Cross-Validation Report"));
        assert!(report.contains("| fact-claiming |"));
        assert!(report.contains("### macro"));

        let json_path = dir.path().join("out").join("results.json");
        save_results(&results, &json_path).unwrap();
        assert!(json_path.exists());
    }
}
