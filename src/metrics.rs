// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics for binary comment classification
//!
//! Implements:
//! - Confusion matrix with binary precision/recall
//! - Per-class classification report with macro averages
//! - GermEval F1: harmonic mean of macro precision and macro recall
//! - ROC AUC with tie handling
//! - Per-fold score collections and their macro aggregate

use crate::error::EnsembleError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Confusion matrix for binary classification (positive class = 1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Create from ground truth and predicted labels
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Self {
        let mut matrix = Self::default();

        for (&truth, &pred) in y_true.iter().zip(y_pred.iter()) {
            match (truth, pred) {
                (1, 1) => matrix.tp += 1,
                (0, 0) => matrix.tn += 1,
                (0, 1) => matrix.fp += 1,
                (1, 0) => matrix.fn_ += 1,
                _ => {}
            }
        }

        matrix
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Recall: TP / (TP + FN)
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    num as f64 / denom as f64
}

fn harmonic_mean(p: f64, r: f64) -> f64 {
    if p + r > 0.0 {
        2.0 * p * r / (p + r)
    } else {
        0.0
    }
}

/// Binary precision of class 1
pub fn precision(y_true: &[u8], y_pred: &[u8]) -> f64 {
    ConfusionMatrix::from_labels(y_true, y_pred).precision()
}

/// Binary recall of class 1
pub fn recall(y_true: &[u8], y_pred: &[u8]) -> f64 {
    ConfusionMatrix::from_labels(y_true, y_pred).recall()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class report over every class seen in truth or predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub macro_precision: f64,
    pub macro_recall: f64,
}

impl ClassificationReport {
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Self {
        let classes: BTreeSet<u8> = y_true.iter().chain(y_pred.iter()).copied().collect();

        let per_class: Vec<ClassMetrics> = classes
            .iter()
            .map(|&class| {
                let mut tp = 0;
                let mut predicted = 0;
                let mut support = 0;
                for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
                    if p == class {
                        predicted += 1;
                    }
                    if t == class {
                        support += 1;
                        if p == class {
                            tp += 1;
                        }
                    }
                }
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                ClassMetrics {
                    class,
                    precision,
                    recall,
                    f1_score: harmonic_mean(precision, recall),
                    support,
                }
            })
            .collect();

        let n = per_class.len().max(1) as f64;
        let macro_precision = per_class.iter().map(|c| c.precision).sum::<f64>() / n;
        let macro_recall = per_class.iter().map(|c| c.recall).sum::<f64>() / n;

        Self {
            per_class,
            macro_precision,
            macro_recall,
        }
    }

    /// Harmonic mean of the macro averages
    pub fn germeval_f1(&self) -> f64 {
        harmonic_mean(self.macro_precision, self.macro_recall)
    }
}

/// GermEval F1 for a single label column
///
/// This is `2PR / (P + R)` over the report's macro precision and macro recall,
/// which is not the mean of per-class F1 scores.
pub fn germeval_f1(y_true: &[u8], y_pred: &[u8]) -> f64 {
    ClassificationReport::from_labels(y_true, y_pred).germeval_f1()
}

/// GermEval F1 averaged over several label columns
pub fn germeval_f1_columns(y_true: &[Vec<u8>], y_pred: &[Vec<u8>]) -> Result<f64, EnsembleError> {
    if y_true.len() != y_pred.len() {
        return Err(EnsembleError::LengthMismatch {
            what: "predicted label columns",
            left: y_pred.len(),
            right: y_true.len(),
        });
    }
    if y_true.is_empty() {
        return Ok(0.0);
    }

    let total: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| germeval_f1(t, p))
        .sum();
    Ok(total / y_true.len() as f64)
}

/// ROC AUC of positive-class scores; `None` when only one class is present
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let mut pairs: Vec<(f64, u8)> = scores.iter().copied().zip(y_true.iter().copied()).collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let n_pos = pairs.iter().filter(|(_, l)| *l == 1).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return None;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tpr_prev = 0.0;
    let mut fpr_prev = 0.0;
    let mut auc = 0.0;
    let mut i = 0;

    // one ROC point per distinct threshold so tied scores form a diagonal segment
    while i < pairs.len() {
        let threshold = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == threshold {
            if pairs[i].1 == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }

        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    Some(auc)
}

/// ROC AUC, scoring an undefined value as 0
pub fn auc_or_zero(y_true: &[u8], scores: &[f64]) -> f64 {
    roc_auc(y_true, scores).unwrap_or_else(|| {
        tracing::warn!("AUC undefined for a single-class fold, scoring it as 0");
        0.0
    })
}

/// Scores of one (label, fold) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub auc: f64,
}

impl ScoreRecord {
    /// Score a fold from truth, predicted classes and positive-class probabilities
    pub fn score(y_true: &[u8], y_pred: &[u8], p_positive: &[f64]) -> Result<Self, EnsembleError> {
        if y_pred.len() != y_true.len() {
            return Err(EnsembleError::LengthMismatch {
                what: "predicted labels",
                left: y_pred.len(),
                right: y_true.len(),
            });
        }
        if p_positive.len() != y_true.len() {
            return Err(EnsembleError::LengthMismatch {
                what: "positive-class probabilities",
                left: p_positive.len(),
                right: y_true.len(),
            });
        }

        Ok(Self {
            precision: precision(y_true, y_pred),
            recall: recall(y_true, y_pred),
            f1: germeval_f1(y_true, y_pred),
            auc: auc_or_zero(y_true, p_positive),
        })
    }
}

/// Metric names in report order
pub const METRIC_NAMES: [&str; 4] = ["Precision", "Recall", "F1", "AUC"];

/// Per-fold values of the four metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreCollection {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub auc: Vec<f64>,
}

impl ScoreCollection {
    pub fn push(&mut self, record: ScoreRecord) {
        self.precision.push(record.precision);
        self.recall.push(record.recall);
        self.f1.push(record.f1);
        self.auc.push(record.auc);
    }

    pub fn len(&self) -> usize {
        self.f1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f1.is_empty()
    }

    /// Columns in `METRIC_NAMES` order
    pub fn columns(&self) -> [&[f64]; 4] {
        [
            self.precision.as_slice(),
            self.recall.as_slice(),
            self.f1.as_slice(),
            self.auc.as_slice(),
        ]
    }

    pub fn record(&self, fold: usize) -> Option<ScoreRecord> {
        Some(ScoreRecord {
            precision: *self.precision.get(fold)?,
            recall: *self.recall.get(fold)?,
            f1: *self.f1.get(fold)?,
            auc: *self.auc.get(fold)?,
        })
    }

    /// Mean and population standard deviation per metric
    pub fn summary(&self) -> [MetricSummary; 4] {
        self.columns().map(MetricSummary::from_values)
    }

    /// Element-wise mean over several collections of equal length
    pub fn macro_average(
        collections: &[(&str, &ScoreCollection)],
    ) -> Result<ScoreCollection, EnsembleError> {
        let mut macro_scores = ScoreCollection::default();
        let Some((_, first)) = collections.first() else {
            return Ok(macro_scores);
        };

        let folds = first.len();
        for (label, collection) in collections {
            if collection.len() != folds {
                return Err(EnsembleError::FoldCountMismatch {
                    label: label.to_string(),
                    expected: folds,
                    found: collection.len(),
                });
            }
        }

        let n = collections.len() as f64;
        for fold in 0..folds {
            let mut sum = ScoreRecord {
                precision: 0.0,
                recall: 0.0,
                f1: 0.0,
                auc: 0.0,
            };
            for (_, collection) in collections {
                sum.precision += collection.precision[fold];
                sum.recall += collection.recall[fold];
                sum.f1 += collection.f1[fold];
                sum.auc += collection.auc[fold];
            }
            macro_scores.push(ScoreRecord {
                precision: sum.precision / n,
                recall: sum.recall / n,
                f1: sum.f1 / n,
                auc: sum.auc / n,
            });
        }

        Ok(macro_scores)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
}

impl MetricSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std: 0.0 };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}
