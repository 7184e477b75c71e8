// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validated ensemble evaluation for GermEval 2021 comment classifiers
//!
//! This crate provides:
//! - Dataset loading, cleanup and seeded shuffling (toxic, engaging, fact-claiming)
//! - K-fold partitioning and per-sub-model bootstrap splits
//! - A content-addressed cache of fine-tuned checkpoints
//! - Bagged ensembles averaged over base models and bootstrap repetitions
//! - GermEval metrics (macro P/R, harmonic-mean F1, AUC) and macro aggregation
//! - Text and chart reports with mean ± std over folds

pub mod cache;
pub mod datasets;
pub mod ensemble;
pub mod error;
pub mod folds;
pub mod lexical;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod text;
pub mod training;

pub use cache::{CacheKey, CheckpointCache, CheckpointLookup, CheckpointStore};
pub use datasets::{Comment, Dataset, TaskLabel};
pub use ensemble::{EnsembleConfig, EnsemblePrediction, SubModelEnsembler};
pub use error::EnsembleError;
pub use lexical::{LexicalBackend, LexicalConfig};
pub use metrics::{ClassificationReport, ConfusionMatrix, MetricSummary, ScoreCollection, ScoreRecord};
pub use models::BaseModel;
pub use pipeline::{CrossValidationConfig, CrossValidationDriver, CrossValidationResults};
pub use report::{ReportSink, SvgChartSink, TextSummarySink};
pub use training::{TrainingArgs, TrainingBackend};
