// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading and preprocessing for the GermEval 2021 comment task

use crate::error::EnsembleError;
use crate::text::clean_comment;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// Seed used for the one-off shuffle at load time
pub const DEFAULT_SHUFFLE_SEED: u64 = 9;

/// The three binary annotation tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLabel {
    Toxic,
    Engaging,
    Fact,
}

impl TaskLabel {
    pub const ALL: [TaskLabel; 3] = [TaskLabel::Toxic, TaskLabel::Engaging, TaskLabel::Fact];

    /// Name used in checkpoint keys and configs
    pub fn name(&self) -> &'static str {
        match self {
            TaskLabel::Toxic => "toxic",
            TaskLabel::Engaging => "engaging",
            TaskLabel::Fact => "fact",
        }
    }

    /// Name used for report artifacts
    pub fn report_title(&self) -> &'static str {
        match self {
            TaskLabel::Toxic => "toxic",
            TaskLabel::Engaging => "engaging",
            TaskLabel::Fact => "fact-claiming",
        }
    }

    /// Column names accepted in the CSV header (GermEval name first)
    fn columns(&self) -> [&'static str; 2] {
        match self {
            TaskLabel::Toxic => ["Sub1_Toxic", "toxic"],
            TaskLabel::Engaging => ["Sub2_Engaging", "engaging"],
            TaskLabel::Fact => ["Sub3_FactClaiming", "fact"],
        }
    }
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskLabel {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "toxic" => Ok(TaskLabel::Toxic),
            "engaging" => Ok(TaskLabel::Engaging),
            "fact" | "fact-claiming" => Ok(TaskLabel::Fact),
            _ => Err(EnsembleError::UnknownLabel(s.to_string())),
        }
    }
}

/// A single annotated comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Position in the shuffled dataset
    pub id: usize,
    pub text: String,
    pub toxic: u8,
    pub engaging: u8,
    pub fact: u8,
}

impl Comment {
    pub fn label(&self, task: TaskLabel) -> u8 {
        match task {
            TaskLabel::Toxic => self.toxic,
            TaskLabel::Engaging => self.engaging,
            TaskLabel::Fact => self.fact,
        }
    }
}

/// A (text, binary label) pair handed to a training backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledText {
    pub text: String,
    pub label: u8,
}

/// Project comments onto one task
pub fn labeled_texts(comments: &[&Comment], task: TaskLabel) -> Vec<LabeledText> {
    comments
        .iter()
        .map(|c| LabeledText {
            text: c.text.clone(),
            label: c.label(task),
        })
        .collect()
}

/// A loaded, deduplicated and shuffled dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub comments: Vec<Comment>,
}

impl Dataset {
    /// Build a dataset from raw rows: drop exact duplicates, shuffle once, renumber
    pub fn from_rows(name: &str, rows: Vec<Comment>, seed: u64) -> Self {
        let mut seen = HashSet::new();
        let mut comments: Vec<Comment> = rows
            .into_iter()
            .filter(|c| seen.insert((c.text.clone(), c.toxic, c.engaging, c.fact)))
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        comments.shuffle(&mut rng);
        for (idx, comment) in comments.iter_mut().enumerate() {
            comment.id = idx;
        }

        Self {
            name: name.to_string(),
            comments,
        }
    }

    /// Load the GermEval CSV (header required)
    pub fn load_csv(path: &Path, seed: u64) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open dataset file: {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .clone();
        let find = |names: &[&str]| -> Result<usize> {
            headers
                .iter()
                .position(|h| names.iter().any(|n| *n == h.trim()))
                .with_context(|| format!("Missing column {:?} in {}", names, path.display()))
        };

        let text_col = find(&["comment_text", "text"][..])?;
        let toxic_col = find(&TaskLabel::Toxic.columns()[..])?;
        let engaging_col = find(&TaskLabel::Engaging.columns()[..])?;
        let fact_col = find(&TaskLabel::Fact.columns()[..])?;

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result
                .with_context(|| format!("Failed to read record {} in {}", idx, path.display()))?;
            let field = |col: usize| record.get(col).unwrap_or("").trim();
            let flag = |col: usize| -> Result<u8> {
                match field(col) {
                    "0" => Ok(0),
                    "1" => Ok(1),
                    other => anyhow::bail!(
                        "Record {} in {}: expected 0/1 in column {}, found '{}'",
                        idx,
                        path.display(),
                        headers.get(col).unwrap_or("?"),
                        other
                    ),
                }
            };

            rows.push(Comment {
                id: idx,
                text: record.get(text_col).unwrap_or("").to_string(),
                toxic: flag(toxic_col)?,
                engaging: flag(engaging_col)?,
                fact: flag(fact_col)?,
            });
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        // dedup and shuffle see the raw text; cleanup runs on the survivors
        let mut dataset = Self::from_rows(&name, rows, seed);
        for comment in dataset.comments.iter_mut() {
            comment.text = clean_comment(&comment.text);
        }
        tracing::info!(
            "Loaded {} unique comments from {}",
            dataset.len(),
            path.display()
        );
        Ok(dataset)
    }

    /// Load a synthetic dataset for development/testing
    pub fn load_synthetic(size: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let toxic_phrases = [
            "Was für ein Idiot, unfassbar",
            "Halt einfach die Klappe",
            "Diese Leute sind der letzte Dreck",
            "So ein dummes Geschwätz",
        ];
        let engaging_phrases = [
            "Danke für den differenzierten Beitrag, ich sehe das ähnlich",
            "Interessanter Punkt, wie würden Sie das lösen?",
            "Ich verstehe Ihre Sorge, aber bedenken Sie auch",
            "Gute Frage, darüber sollten wir reden",
        ];
        let fact_phrases = [
            "Laut Statistischem Bundesamt stieg die Zahl um 12 Prozent",
            "Die Studie der Universität zeigt eindeutig",
            "Im Jahr 2019 wurden über 3000 Fälle gemeldet",
            "Nach Angaben des Ministeriums",
        ];
        let neutral_phrases = [
            "Schauen wir mal was passiert",
            "Naja, wer weiß das schon",
            "Heute Abend wieder Talkshow",
            "Mal sehen",
        ];

        let rows = (0..size)
            .map(|i| {
                let toxic = rng.gen_bool(0.3);
                let engaging = !toxic && rng.gen_bool(0.4);
                let fact = rng.gen_bool(0.3);

                let mut parts = Vec::new();
                if toxic {
                    parts.push(toxic_phrases[rng.gen_range(0..toxic_phrases.len())]);
                }
                if engaging {
                    parts.push(engaging_phrases[rng.gen_range(0..engaging_phrases.len())]);
                }
                if fact {
                    parts.push(fact_phrases[rng.gen_range(0..fact_phrases.len())]);
                }
                if parts.is_empty() {
                    parts.push(neutral_phrases[rng.gen_range(0..neutral_phrases.len())]);
                }

                Comment {
                    id: i,
                    text: format!("{} (Kommentar {})", parts.join(". "), i),
                    toxic: toxic as u8,
                    engaging: engaging as u8,
                    fact: fact as u8,
                }
            })
            .collect();

        Self::from_rows("synthetic", rows, seed)
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Select comments by index
    pub fn select(&self, indices: &[usize]) -> Vec<&Comment> {
        indices.iter().map(|&i| &self.comments[i]).collect()
    }

    /// Positive/negative counts per task
    pub fn label_distribution(&self) -> HashMap<TaskLabel, (usize, usize)> {
        TaskLabel::ALL
            .iter()
            .map(|&task| {
                let positive = self.comments.iter().filter(|c| c.label(task) == 1).count();
                (task, (positive, self.len() - positive))
            })
            .collect()
    }
}
