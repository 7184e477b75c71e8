// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! K-fold partitioning and bootstrap sub-sampling
//!
//! Folds are contiguous index blocks over the (already shuffled) dataset; the
//! first `n % k` folds receive one extra validation row. Bootstrap splits draw
//! a seeded sub-sample of a fold's training rows to act as the validation set
//! for one sub-model.

use crate::datasets::Comment;
use crate::error::EnsembleError;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

/// One train/validation partition of the dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Partition `n` records into `k` folds
pub fn k_fold(n: usize, k: usize) -> Result<Vec<Fold>, EnsembleError> {
    if k < 2 || n < k {
        return Err(EnsembleError::TooFewRecords { records: n, folds: k });
    }

    let base = n / k;
    let extra = n % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;

    for i in 0..k {
        let size = base + usize::from(i < extra);
        let end = start + size;
        folds.push(Fold {
            index: i,
            train: (0..start).chain(end..n).collect(),
            validation: (start..end).collect(),
        });
        start = end;
    }

    Ok(folds)
}

/// A fold's training rows split into a sub-model's training and validation sets
#[derive(Debug, Clone)]
pub struct BootstrapSplit<'a> {
    pub train_of_train: Vec<&'a Comment>,
    pub val_of_train: Vec<&'a Comment>,
}

impl<'a> BootstrapSplit<'a> {
    /// Draw `round(fraction * n)` rows with `seed`, then drop every training row
    /// whose text appears among the drawn rows.
    ///
    /// Rows sharing a text with a drawn row are removed too, so `train_of_train`
    /// can end up smaller than `n - sample`. The sample size rounds half to even,
    /// so 25 rows at 0.1 hold out 2. `val_of_train` is returned in index order,
    /// not draw order.
    pub fn draw(train: &[&'a Comment], fraction: f64, seed: u64) -> Self {
        let n = train.len();
        let amount = ((n as f64) * fraction).round_ties_even() as usize;
        let amount = amount.min(n);

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut picked = index::sample(&mut rng, n, amount).into_vec();
        picked.sort_unstable();

        let val_of_train: Vec<&'a Comment> = picked.iter().map(|&i| train[i]).collect();
        let sampled_texts: HashSet<&str> = val_of_train.iter().map(|c| c.text.as_str()).collect();
        let train_of_train = train
            .iter()
            .copied()
            .filter(|c| !sampled_texts.contains(c.text.as_str()))
            .collect();

        Self {
            train_of_train,
            val_of_train,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comments(texts: &[String]) -> Vec<Comment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Comment {
                id: i,
                text: t.clone(),
                toxic: (i % 2) as u8,
                engaging: 0,
                fact: 0,
            })
            .collect()
    }

    #[test]
    fn test_k_fold_covers_every_index_once() {
        let folds = k_fold(23, 5).unwrap();
        assert_eq!(folds.len(), 5);

        let sizes: Vec<usize> = folds.iter().map(|f| f.validation.len()).collect();
        assert_eq!(sizes, vec![5, 5, 5, 4, 4]);

        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.validation.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());

        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), 23);
            assert!(fold.train.iter().all(|i| !fold.validation.contains(i)));
        }
    }

    #[test]
    fn test_k_fold_rejects_tiny_datasets() {
        assert!(matches!(
            k_fold(3, 5),
            Err(EnsembleError::TooFewRecords { records: 3, folds: 5 })
        ));
        assert!(k_fold(10, 1).is_err());
    }

    #[test]
    fn test_bootstrap_ten_percent_of_unique_rows() {
        let texts: Vec<String> = (0..100).map(|i| format!("kommentar {}", i)).collect();
        let rows = comments(&texts);
        let refs: Vec<&Comment> = rows.iter().collect();

        let split = BootstrapSplit::draw(&refs, 0.1, 3);
        assert_eq!(split.val_of_train.len(), 10);
        assert_eq!(split.train_of_train.len(), 90);

        let held_out: HashSet<usize> = split.val_of_train.iter().map(|c| c.id).collect();
        assert!(split.train_of_train.iter().all(|c| !held_out.contains(&c.id)));
    }

    #[test]
    fn test_bootstrap_size_rounds_half_to_even() {
        let texts: Vec<String> = (0..25).map(|i| format!("kommentar {}", i)).collect();
        let rows = comments(&texts);
        let refs: Vec<&Comment> = rows.iter().collect();

        let split = BootstrapSplit::draw(&refs, 0.1, 0);
        assert_eq!(split.val_of_train.len(), 2);
        assert_eq!(split.train_of_train.len(), 23);

        let rows = comments(&texts[..5]);
        let refs: Vec<&Comment> = rows.iter().collect();
        let split = BootstrapSplit::draw(&refs, 0.1, 0);
        assert!(split.val_of_train.is_empty());
        assert_eq!(split.train_of_train.len(), 5);
    }

    #[test]
    fn test_bootstrap_val_rows_in_index_order() {
        let texts: Vec<String> = (0..60).map(|i| format!("t{}", i)).collect();
        let rows = comments(&texts);
        let refs: Vec<&Comment> = rows.iter().collect();

        let ids: Vec<usize> = BootstrapSplit::draw(&refs, 0.1, 5)
            .val_of_train
            .iter()
            .map(|c| c.id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bootstrap_is_reproducible_per_seed() {
        let texts: Vec<String> = (0..50).map(|i| format!("t{}", i)).collect();
        let rows = comments(&texts);
        let refs: Vec<&Comment> = rows.iter().collect();

        let ids = |s: &BootstrapSplit| s.val_of_train.iter().map(|c| c.id).collect::<Vec<_>>();
        let a = BootstrapSplit::draw(&refs, 0.1, 7);
        let b = BootstrapSplit::draw(&refs, 0.1, 7);
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_bootstrap_removes_duplicate_texts_together() {
        // every text appears twice, so each drawn row also removes its twin
        let texts: Vec<String> = (0..20).map(|i| format!("dup {}", i / 2)).collect();
        let rows = comments(&texts);
        let refs: Vec<&Comment> = rows.iter().collect();

        let split = BootstrapSplit::draw(&refs, 0.1, 1);
        assert_eq!(split.val_of_train.len(), 2);

        let drawn: HashSet<&str> = split.val_of_train.iter().map(|c| c.text.as_str()).collect();
        assert!(split.train_of_train.len() <= 18);
        assert_eq!(split.train_of_train.len(), 20 - 2 * drawn.len());
    }
}
