//! Model selection for duration/power regressors
//!
//! A minimal estimator contract (`fit(X, y)` / `predict(X)` over
//! single-feature rows) with k-fold cross-validation and grid search on top.
//! Folds and candidates are independent, so they are evaluated in parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ValidationError};
use crate::numeric::{ensure_same_length, r_squared};

/// Supervised regressor over single-feature rows
pub trait Estimator {
    /// Fit the estimator, replacing any previous fit
    fn fit(&mut self, x: &[[f64; 1]], y: &[f64]) -> Result<()>;

    /// Predict a target for each row
    fn predict(&self, x: &[[f64; 1]]) -> Result<Vec<f64>>;

    /// Coefficient of determination of the predictions on `x` against `y`
    fn score(&self, x: &[[f64; 1]], y: &[f64]) -> Result<f64> {
        ensure_same_length("x", x.len(), "y", y.len())?;
        let predicted = self.predict(x)?;
        Ok(r2_score(y, &predicted))
    }
}

/// Scoring function; higher is always better
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    #[default]
    R2,
    NegMeanSquaredError,
}

impl Scoring {
    pub fn score(&self, y_true: &[f64], y_pred: &[f64]) -> f64 {
        match self {
            Scoring::R2 => r2_score(y_true, y_pred),
            Scoring::NegMeanSquaredError => -mean_squared_error(y_true, y_pred),
        }
    }
}

pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    r_squared(y_true, y_pred)
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Contiguous k-fold splitter (no shuffling)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KFold {
    pub n_splits: usize,
}

impl Default for KFold {
    fn default() -> Self {
        Self { n_splits: 5 }
    }
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// (train indices, test indices) for each fold.
    ///
    /// The first `n_samples % n_splits` folds receive one extra sample.
    pub fn split(&self, n_samples: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 || self.n_splits > n_samples {
            return Err(ValidationError::InvalidParameter {
                parameter: "n_splits".to_string(),
                value: self.n_splits as f64,
                reason: format!("must be between 2 and the number of samples ({})", n_samples),
            }
            .into());
        }

        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for fold in 0..self.n_splits {
            let size = base + usize::from(fold < extra);
            let test: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..start).chain(start + size..n_samples).collect();
            folds.push((train, test));
            start += size;
        }
        Ok(folds)
    }
}

fn gather<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

/// Score an estimator on each fold, fitting a fresh clone per fold
pub fn cross_val_score<E>(
    estimator: &E,
    x: &[[f64; 1]],
    y: &[f64],
    kfold: &KFold,
    scoring: Scoring,
) -> Result<Vec<f64>>
where
    E: Estimator + Clone + Send + Sync,
{
    ensure_same_length("x", x.len(), "y", y.len())?;
    let folds = kfold.split(x.len())?;

    folds
        .par_iter()
        .map(|(train, test)| {
            let mut fold_estimator = estimator.clone();
            fold_estimator.fit(&gather(x, train), &gather(y, train))?;
            let predicted = fold_estimator.predict(&gather(x, test))?;
            Ok(scoring.score(&gather(y, test), &predicted))
        })
        .collect()
}

/// Outcome of [`grid_search`]
#[derive(Debug, Clone)]
pub struct GridSearchResult<E> {
    /// Index of the winning candidate
    pub best_index: usize,
    /// Winning candidate refitted on the full data
    pub best_estimator: E,
    /// Mean cross-validated score of the winner
    pub best_score: f64,
    /// Mean score per candidate; `None` where cross-validation failed
    pub mean_scores: Vec<Option<f64>>,
}

/// Cross-validate every candidate and refit the best on all data.
///
/// Candidates whose cross-validation fails are skipped; if every candidate
/// fails, the first failure is returned.
pub fn grid_search<E>(
    candidates: &[E],
    x: &[[f64; 1]],
    y: &[f64],
    kfold: &KFold,
    scoring: Scoring,
) -> Result<GridSearchResult<E>>
where
    E: Estimator + Clone + Send + Sync,
{
    if candidates.is_empty() {
        return Err(ValidationError::Empty {
            what: "candidate list".to_string(),
        }
        .into());
    }

    let outcomes: Vec<Result<f64>> = candidates
        .par_iter()
        .map(|candidate| {
            let scores = cross_val_score(candidate, x, y, kfold, scoring)?;
            Ok(scores.iter().sum::<f64>() / scores.len() as f64)
        })
        .collect();

    let mut mean_scores = Vec::with_capacity(outcomes.len());
    let mut first_error = None;
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(score) => mean_scores.push(Some(score)),
            Err(err) => {
                warn!(candidate = index, error = %err, "Candidate failed cross-validation");
                first_error.get_or_insert(err);
                mean_scores.push(None);
            }
        }
    }

    let best = mean_scores
        .iter()
        .enumerate()
        .filter_map(|(i, score)| score.map(|s| (i, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((best_index, best_score)) = best else {
        return Err(first_error.unwrap_or_else(|| {
            ValidationError::Empty {
                what: "candidate scores".to_string(),
            }
            .into()
        }));
    };

    let mut best_estimator = candidates[best_index].clone();
    best_estimator.fit(x, y)?;

    info!(best_index, best_score, "Grid search finished");

    Ok(GridSearchResult {
        best_index,
        best_estimator,
        best_score,
        mean_scores,
    })
}
