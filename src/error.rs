// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Domain errors that callers may want to match on.
//!
//! Everything else travels as `anyhow::Error` with context attached.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("unknown base model '{0}' (expected one of: gbert, gelectra, gottbert)")]
    UnknownBaseModel(String),
    #[error("unknown label '{0}' (expected one of: toxic, engaging, fact)")]
    UnknownLabel(String),
    #[error("cannot split {records} records into {folds} folds")]
    TooFewRecords { records: usize, folds: usize },
    #[error("length mismatch: {what} has {left} entries but {right} were expected")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },
    #[error("label '{label}' has {found} fold scores, expected {expected}")]
    FoldCountMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("bootstrap split for fold {fold}, repetition {repetition} left no training rows")]
    EmptyTrainingSplit { fold: usize, repetition: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
