//! Shared numeric utilities
//!
//! Column reshaping for the estimator contract, input validation helpers,
//! and the small dense linear algebra the regression needs.

use statrs::statistics::Statistics;

use crate::error::{Result, ValidationError};

/// Reshape a flat slice into single-feature rows
pub fn reshape_column(values: &[f64]) -> Vec<[f64; 1]> {
    values.iter().map(|&v| [v]).collect()
}

/// Flatten single-feature rows back into a flat vector
pub fn flatten_column(rows: &[[f64; 1]]) -> Vec<f64> {
    rows.iter().map(|row| row[0]).collect()
}

/// Reject NaN and infinite values
pub fn ensure_finite(field: &str, values: &[f64]) -> Result<()> {
    if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ValidationError::NonFinite {
            field: field.to_string(),
            index,
            value,
        }
        .into());
    }
    Ok(())
}

/// Durations must be finite and strictly positive
pub fn ensure_positive_durations(durations: &[f64]) -> Result<()> {
    ensure_finite("duration", durations)?;
    if let Some((index, &value)) = durations.iter().enumerate().find(|(_, d)| **d <= 0.0) {
        return Err(ValidationError::NonPositiveDuration { index, value }.into());
    }
    Ok(())
}

/// Scalar parameter must be finite and strictly positive
pub fn ensure_positive(parameter: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::InvalidParameter {
            parameter: parameter.to_string(),
            value,
            reason: "must be finite and strictly positive".to_string(),
        }
        .into());
    }
    Ok(())
}

pub fn ensure_same_length(
    left_name: &str,
    left: usize,
    right_name: &str,
    right: usize,
) -> Result<()> {
    if left != right {
        return Err(ValidationError::LengthMismatch {
            left_name: left_name.to_string(),
            left,
            right_name: right_name.to_string(),
            right,
        }
        .into());
    }
    Ok(())
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot vanishes relative to the matrix scale.
pub fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tiny = scale * 1e-14;

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() <= tiny {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Ordinary least squares on (x, y) pairs.
/// Returns (slope, intercept), or `None` when the x values are degenerate.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }

    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() <= 1e-12 * n * sum_xx {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Coefficient of determination between observed and predicted values.
///
/// A constant target yields 1.0 for a perfect prediction and 0.0 otherwise.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> f64 {
    let mean = observed.iter().mean();
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();

    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    }
}
