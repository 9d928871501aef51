//! Power-duration (critical power) modelling
//!
//! Fits the hyperbolic critical power model to mean maximal power efforts
//! by nonlinear least squares and predicts sustainable power for arbitrary
//! durations. Two variants are available:
//!
//! - 2-parameter: `P(t) = CP + W' / t`
//! - 3-parameter (Morton): `P(t) = CP + W' / (t + W' / (Pmax - CP))`
//!
//! The 3-parameter form tends to the 2-parameter curve for long efforts and
//! is bounded by `Pmax` as the duration approaches zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::error::{ConvergenceError, NotFittedError, Result, SweatError, ValidationError};
use crate::model_selection::Estimator;
use crate::models::{Observation, PowerSeries};
use crate::numeric::{
    ensure_finite, ensure_positive_durations, ensure_same_length, flatten_column,
    linear_regression, r_squared, solve_linear_system,
};

/// Critical Power model variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpModelKind {
    /// Classic 2-parameter model: P = CP + W'/t
    #[default]
    #[serde(rename = "2_param")]
    TwoParameter,
    /// Morton 3-parameter model with maximal instantaneous power
    #[serde(rename = "3_param")]
    ThreeParameter,
}

impl CpModelKind {
    /// Canonical names accepted by [`FromStr`]
    pub const CHOICES: [&'static str; 2] = ["2_param", "3_param"];

    /// Number of free parameters
    pub fn parameter_count(&self) -> usize {
        match self {
            CpModelKind::TwoParameter => 2,
            CpModelKind::ThreeParameter => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CpModelKind::TwoParameter => "2_param",
            CpModelKind::ThreeParameter => "3_param",
        }
    }

    /// Model power at duration `t` for a raw parameter vector `[cp, w', (pmax)]`
    fn evaluate(&self, params: &[f64], t: f64) -> f64 {
        match self {
            CpModelKind::TwoParameter => params[0] + params[1] / t,
            CpModelKind::ThreeParameter => {
                let (cp, w_prime, p_max) = (params[0], params[1], params[2]);
                cp + w_prime / (t + w_prime / (p_max - cp))
            }
        }
    }

    /// Partial derivatives of the model power with respect to each parameter
    fn gradient(&self, params: &[f64], t: f64) -> Vec<f64> {
        match self {
            CpModelKind::TwoParameter => vec![1.0, 1.0 / t],
            CpModelKind::ThreeParameter => {
                let (cp, w_prime, p_max) = (params[0], params[1], params[2]);
                let gap = p_max - cp;
                let denom = t + w_prime / gap;
                let denom_sq = denom * denom;
                vec![
                    1.0 - (w_prime * w_prime) / (denom_sq * gap * gap),
                    1.0 / denom - w_prime / (denom_sq * gap),
                    (w_prime * w_prime) / (denom_sq * gap * gap),
                ]
            }
        }
    }

    fn is_feasible(&self, params: &[f64]) -> bool {
        let positive = params.iter().all(|p| p.is_finite() && *p > 0.0);
        match self {
            CpModelKind::TwoParameter => positive,
            CpModelKind::ThreeParameter => positive && params[2] > params[0],
        }
    }
}

impl fmt::Display for CpModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CpModelKind {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "2_param" | "2param" | "two_parameter" => Ok(CpModelKind::TwoParameter),
            "3_param" | "3param" | "three_parameter" => Ok(CpModelKind::ThreeParameter),
            _ => Err(ValidationError::InvalidChoice {
                parameter: "model".to_string(),
                value: s.to_string(),
                choices: Self::CHOICES.iter().map(|c| c.to_string()).collect(),
            }
            .into()),
        }
    }
}

/// Levenberg-Marquardt settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Iteration cap before reporting non-convergence
    pub max_iterations: usize,

    /// Relative reduction of the residual sum of squares considered converged
    pub cost_tolerance: f64,

    /// Relative parameter step considered converged
    pub step_tolerance: f64,

    /// Starting damping factor
    pub initial_damping: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            cost_tolerance: 1e-12,
            step_tolerance: 1e-10,
            initial_damping: 1e-3,
        }
    }
}

const MAX_DAMPING: f64 = 1e16;

/// Smallest accepted W' relative to CP times the longest duration
const MIN_CURVATURE_RATIO: f64 = 1e-6;

/// Smallest accepted Pmax - CP relative to CP
const MIN_P_MAX_GAP_RATIO: f64 = 1e-3;

/// Largest scaled gradient, relative to the observed power norm, at which a
/// rejected negligible step still counts as a stationary point
const STATIONARY_GRADIENT_RATIO: f64 = 1e-8;

/// Parameters of a successfully fitted critical power model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCpModel {
    /// Model variant the parameters belong to
    pub kind: CpModelKind,
    /// Critical Power in watts
    pub cp: f64,
    /// W' (anaerobic work capacity) in joules
    pub w_prime: f64,
    /// Maximal instantaneous power in watts (3-parameter model only)
    pub p_max: Option<f64>,
    /// Fit quality (R²) on the training observations
    pub r_squared: f64,
    /// Residual sum of squares at the optimum
    pub residual_sum_squares: f64,
    /// Optimizer iterations used
    pub iterations: usize,
}

impl FittedCpModel {
    /// Check that the parameters form a usable model of `kind`.
    ///
    /// Fitting always produces a consistent model; this guards values that
    /// were built by hand or deserialized.
    pub fn validate(&self) -> Result<()> {
        let inconsistent = |reason: String| -> SweatError {
            ValidationError::InconsistentModel {
                kind: self.kind.to_string(),
                reason,
            }
            .into()
        };

        for (name, value) in [("cp", self.cp), ("w_prime", self.w_prime)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(inconsistent(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }

        match (self.kind, self.p_max) {
            (CpModelKind::TwoParameter, None) => Ok(()),
            (CpModelKind::TwoParameter, Some(p_max)) => {
                Err(inconsistent(format!("unexpected p_max {}", p_max)))
            }
            (CpModelKind::ThreeParameter, None) => {
                Err(inconsistent("p_max is missing".to_string()))
            }
            (CpModelKind::ThreeParameter, Some(p_max))
                if !p_max.is_finite() || p_max <= self.cp =>
            {
                Err(inconsistent(format!("p_max {} must exceed cp {}", p_max, self.cp)))
            }
            (CpModelKind::ThreeParameter, Some(_)) => Ok(()),
        }
    }

    fn params(&self) -> Vec<f64> {
        let mut params = vec![self.cp, self.w_prime];
        params.extend(self.p_max);
        params
    }

    /// Predicted power for a single duration
    pub fn power_at(&self, duration_seconds: f64) -> Result<f64> {
        Ok(self.predict(&[duration_seconds])?[0])
    }

    /// Predicted power for each duration
    pub fn predict(&self, durations: &[f64]) -> Result<Vec<f64>> {
        self.validate()?;
        ensure_positive_durations(durations)?;
        let params = self.params();
        Ok(durations
            .iter()
            .map(|&t| self.kind.evaluate(&params, t))
            .collect())
    }

    /// Predicted time to exhaustion in seconds at a constant power.
    ///
    /// Returns `None` at or below CP (theoretically sustainable indefinitely).
    pub fn time_to_exhaustion(&self, power_watts: f64) -> Option<f64> {
        if !power_watts.is_finite() || power_watts <= self.cp {
            return None;
        }

        let hyperbolic = self.w_prime / (power_watts - self.cp);
        match self.p_max {
            Some(p_max) if power_watts >= p_max => Some(0.0),
            Some(p_max) => Some(hyperbolic - self.w_prime / (p_max - self.cp)),
            None => Some(hyperbolic),
        }
    }
}

/// Predict power for each duration from a fitted model
pub fn predict(model: &FittedCpModel, durations: &[f64]) -> Result<Vec<f64>> {
    model.predict(durations)
}

/// Critical power model configuration; fitting produces an immutable [`FittedCpModel`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalPowerModel {
    pub kind: CpModelKind,
    pub optimizer: OptimizerSettings,
}

impl CriticalPowerModel {
    pub fn new(kind: CpModelKind) -> Self {
        Self {
            kind,
            optimizer: OptimizerSettings::default(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerSettings) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Fit the model to an observation set
    pub fn fit(&self, observations: &[Observation]) -> Result<FittedCpModel> {
        let durations: Vec<f64> = observations.iter().map(|o| o.duration_seconds).collect();
        let powers: Vec<f64> = observations.iter().map(|o| o.power_watts).collect();
        self.fit_arrays(&durations, &powers)
    }

    /// Fit the model to parallel duration and power slices
    #[instrument(
        skip(self, durations, powers),
        fields(model = %self.kind, observations = durations.len())
    )]
    pub fn fit_arrays(&self, durations: &[f64], powers: &[f64]) -> Result<FittedCpModel> {
        self.validate(durations, powers)?;

        let initial = self.initial_estimate(durations, powers)?;
        debug!(?initial, "Initial parameter estimate");

        let outcome = levenberg_marquardt(self.kind, durations, powers, initial, &self.optimizer)
            .and_then(|outcome| {
                let r_squared = check_degenerate(self.kind, &outcome.params, durations, powers)?;
                Ok((outcome, r_squared))
            });
        let (outcome, r_squared) = match outcome {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "Critical power model failed to converge");
                return Err(err.into());
            }
        };

        let params = outcome.params;
        let fitted = FittedCpModel {
            kind: self.kind,
            cp: params[0],
            w_prime: params[1],
            p_max: params.get(2).copied(),
            r_squared,
            residual_sum_squares: outcome.cost,
            iterations: outcome.iterations,
        };

        info!(
            cp = fitted.cp,
            w_prime = fitted.w_prime,
            p_max = ?fitted.p_max,
            r_squared = fitted.r_squared,
            iterations = fitted.iterations,
            "Critical power model fitted"
        );

        Ok(fitted)
    }

    fn validate(&self, durations: &[f64], powers: &[f64]) -> Result<()> {
        ensure_same_length("durations", durations.len(), "powers", powers.len())?;

        let required = self.kind.parameter_count();
        if durations.len() < required {
            return Err(ValidationError::InsufficientData {
                model: self.kind.to_string(),
                required,
                got: durations.len(),
            }
            .into());
        }

        ensure_positive_durations(durations)?;
        ensure_finite("power", powers)?;
        if let Some((_, &value)) = powers.iter().enumerate().find(|(_, p)| **p <= 0.0) {
            return Err(ValidationError::InvalidParameter {
                parameter: "power".to_string(),
                value,
                reason: "observed powers must be strictly positive".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Starting point from linear regression of P on 1/t
    fn initial_estimate(&self, durations: &[f64], powers: &[f64]) -> Result<Vec<f64>> {
        let points: Vec<(f64, f64)> = durations
            .iter()
            .zip(powers)
            .map(|(&t, &p)| (1.0 / t, p))
            .collect();

        let (mut w_prime, mut cp) =
            linear_regression(&points).ok_or_else(|| ConvergenceError::Singular {
                reason: "durations are too similar to separate CP from W'".to_string(),
            })?;

        let min_power = powers.iter().copied().fold(f64::INFINITY, f64::min);
        let max_power = powers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        // Non-hyperbolic data: restart from a feasible point below every effort
        if cp <= 0.0 || w_prime <= 0.0 || cp >= min_power {
            cp = 0.9 * min_power;
            w_prime = durations
                .iter()
                .zip(powers)
                .map(|(&t, &p)| (p - cp) * t)
                .sum::<f64>()
                / durations.len() as f64;
        }

        let mut params = vec![cp, w_prime];
        if self.kind == CpModelKind::ThreeParameter {
            params.push((1.5 * max_power).max(1.5 * cp));
        }
        Ok(params)
    }
}

struct LmOutcome {
    params: Vec<f64>,
    cost: f64,
    iterations: usize,
}

fn residual_sum_squares(
    kind: CpModelKind,
    params: &[f64],
    durations: &[f64],
    powers: &[f64],
) -> f64 {
    durations
        .iter()
        .zip(powers)
        .map(|(&t, &p)| (p - kind.evaluate(params, t)).powi(2))
        .sum()
}

fn is_negligible_step(step: &[f64], params: &[f64], tolerance: f64) -> bool {
    step.iter()
        .zip(params)
        .all(|(s, p)| s.abs() <= tolerance * (p.abs() + tolerance))
}

/// Reject optimizer results pinned against the edge of the model's domain.
///
/// Returns the training R² of an acceptable estimate.
fn check_degenerate(
    kind: CpModelKind,
    params: &[f64],
    durations: &[f64],
    powers: &[f64],
) -> std::result::Result<f64, ConvergenceError> {
    let degenerate = |parameter: &str, value: f64| ConvergenceError::Degenerate {
        parameter: parameter.to_string(),
        value,
    };

    for (name, &value) in ["cp", "w_prime", "p_max"].iter().zip(params) {
        if !value.is_finite() || value <= 0.0 {
            return Err(degenerate(*name, value));
        }
    }

    let (cp, w_prime) = (params[0], params[1]);
    let longest = durations.iter().copied().fold(0.0, f64::max);
    // W' too small to bend the curve even at the longest effort
    if w_prime < MIN_CURVATURE_RATIO * cp * longest {
        return Err(degenerate("w_prime", w_prime));
    }

    if let Some(&p_max) = params.get(2) {
        if p_max - cp < MIN_P_MAX_GAP_RATIO * cp {
            return Err(degenerate("p_max", p_max));
        }
    }

    let predicted: Vec<f64> = durations.iter().map(|&t| kind.evaluate(params, t)).collect();
    let r_squared = r_squared(powers, &predicted);
    if r_squared < 0.0 {
        return Err(degenerate("r_squared", r_squared));
    }

    Ok(r_squared)
}

/// Damped Gauss-Newton minimisation of the residual sum of squares.
///
/// The normal equations are scaled by their diagonal before solving, and
/// steps leaving the feasible region are treated like cost increases.
fn levenberg_marquardt(
    kind: CpModelKind,
    durations: &[f64],
    powers: &[f64],
    initial: Vec<f64>,
    settings: &OptimizerSettings,
) -> std::result::Result<LmOutcome, ConvergenceError> {
    let n = initial.len();
    let mut params = initial;
    let mut cost = residual_sum_squares(kind, &params, durations, powers);
    let mut lambda = settings.initial_damping;
    let power_scale = powers.iter().map(|p| p * p).sum::<f64>().sqrt();

    if !cost.is_finite() {
        return Err(ConvergenceError::Degenerate {
            parameter: "initial residual".to_string(),
            value: cost,
        });
    }

    for iteration in 1..=settings.max_iterations {
        let mut jtj = vec![vec![0.0; n]; n];
        let mut jtr = vec![0.0; n];
        for (&t, &p) in durations.iter().zip(powers) {
            let residual = p - kind.evaluate(&params, t);
            let grad = kind.gradient(&params, t);
            for i in 0..n {
                jtr[i] += grad[i] * residual;
                for j in 0..n {
                    jtj[i][j] += grad[i] * grad[j];
                }
            }
        }

        let diag: Vec<f64> = (0..n).map(|i| jtj[i][i]).collect();
        if diag.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(ConvergenceError::Singular {
                reason: format!("zero sensitivity to a parameter at iteration {}", iteration),
            });
        }
        let norm: Vec<f64> = diag.iter().map(|d| d.sqrt()).collect();

        let (candidate, candidate_cost, step) = loop {
            let scaled: Vec<Vec<f64>> = (0..n)
                .map(|i| {
                    (0..n)
                        .map(|j| {
                            let damping = if i == j { 1.0 + lambda } else { 1.0 };
                            jtj[i][j] * damping / (norm[i] * norm[j])
                        })
                        .collect()
                })
                .collect();
            let rhs: Vec<f64> = (0..n).map(|i| jtr[i] / norm[i]).collect();

            let solution =
                solve_linear_system(scaled, rhs).ok_or_else(|| ConvergenceError::Singular {
                    reason: format!(
                        "normal equations are singular at iteration {} \
                         (durations may be nearly identical)",
                        iteration
                    ),
                })?;
            let step: Vec<f64> = solution.iter().zip(&norm).map(|(s, d)| s / d).collect();
            let candidate: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p + s).collect();

            if kind.is_feasible(&candidate) {
                let candidate_cost = residual_sum_squares(kind, &candidate, durations, powers);
                if candidate_cost.is_finite() && candidate_cost <= cost {
                    break (candidate, candidate_cost, step);
                }
            }

            // A negligible step that still cannot be taken is either rounding
            // noise at a stationary point or the edge of the feasible region
            if is_negligible_step(&step, &params, settings.step_tolerance) {
                let gradient = jtr
                    .iter()
                    .zip(&norm)
                    .map(|(g, d)| (g / d).abs())
                    .fold(0.0, f64::max);
                if gradient > STATIONARY_GRADIENT_RATIO * power_scale {
                    return Err(ConvergenceError::Degenerate {
                        parameter: "gradient at feasibility boundary".to_string(),
                        value: gradient,
                    });
                }
                return Ok(LmOutcome {
                    params,
                    cost,
                    iterations: iteration,
                });
            }

            lambda *= 10.0;
            if lambda > MAX_DAMPING {
                return Err(ConvergenceError::Diverged {
                    lambda,
                    iterations: iteration,
                });
            }
        };

        let step_converged = is_negligible_step(&step, &params, settings.step_tolerance);
        let cost_converged = cost - candidate_cost <= settings.cost_tolerance * cost;

        params = candidate;
        cost = candidate_cost;
        lambda = (lambda / 10.0).max(1e-12);

        debug!(iteration, cost, lambda, "Levenberg-Marquardt step accepted");

        if step_converged || cost_converged {
            return Ok(LmOutcome {
                params,
                cost,
                iterations: iteration,
            });
        }
    }

    Err(ConvergenceError::MaxIterations {
        iterations: settings.max_iterations,
        cost,
    })
}

/// Scikit-style stateful regressor wrapping [`CriticalPowerModel`].
///
/// Durations are passed as single-feature rows so the regressor composes
/// with the generic cross-validation and grid-search helpers.
#[derive(Debug, Clone, Default)]
pub struct CriticalPowerRegressor {
    model: CriticalPowerModel,
    fitted: Option<FittedCpModel>,
}

impl CriticalPowerRegressor {
    pub fn new(kind: CpModelKind) -> Self {
        Self::from_model(CriticalPowerModel::new(kind))
    }

    pub fn from_model(model: CriticalPowerModel) -> Self {
        Self {
            model,
            fitted: None,
        }
    }

    pub fn kind(&self) -> CpModelKind {
        self.model.kind
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Fitted parameters, or [`NotFittedError`] before a successful fit
    pub fn fitted(&self) -> Result<&FittedCpModel> {
        self.fitted.as_ref().ok_or_else(|| {
            NotFittedError {
                estimator: "CriticalPowerRegressor".to_string(),
            }
            .into()
        })
    }

    pub fn cp(&self) -> Result<f64> {
        Ok(self.fitted()?.cp)
    }

    pub fn w_prime(&self) -> Result<f64> {
        Ok(self.fitted()?.w_prime)
    }

    /// `None` for the 2-parameter model
    pub fn p_max(&self) -> Result<Option<f64>> {
        Ok(self.fitted()?.p_max)
    }
}

impl Estimator for CriticalPowerRegressor {
    fn fit(&mut self, x: &[[f64; 1]], y: &[f64]) -> Result<()> {
        // A failed re-fit must not leave the previous parameters visible
        self.fitted = None;
        self.fitted = Some(self.model.fit_arrays(&flatten_column(x), y)?);
        Ok(())
    }

    fn predict(&self, x: &[[f64; 1]]) -> Result<Vec<f64>> {
        self.fitted()?.predict(&flatten_column(x))
    }
}

/// Mean maximal power for each window length, from a 1 Hz series.
///
/// Windows longer than the series are skipped. Resample irregular data
/// with [`crate::resample::prepare`] first.
pub fn mean_max_power(series: &PowerSeries, durations: &[u32]) -> Result<Vec<Observation>> {
    let powers = series.powers();
    ensure_finite("power", &powers)?;
    if let Some(index) = durations.iter().position(|&d| d == 0) {
        return Err(ValidationError::NonPositiveDuration { index, value: 0.0 }.into());
    }

    let mut prefix = Vec::with_capacity(powers.len() + 1);
    prefix.push(0.0);
    for p in &powers {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + p);
    }

    Ok(durations
        .iter()
        .filter(|&&d| d as usize <= powers.len())
        .map(|&d| {
            let window = d as usize;
            let best = (window..=powers.len())
                .map(|end| prefix[end] - prefix[end - window])
                .fold(f64::NEG_INFINITY, f64::max);
            Observation::new(d as f64, best / window as f64)
        })
        .collect())
}
