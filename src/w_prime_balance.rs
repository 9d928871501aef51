//! W' balance tracking
//!
//! W' balance represents the remaining anaerobic work capacity at each point
//! in time. It depletes when power is above CP and recovers when power is
//! below CP, at a rate that depends on how far below CP the athlete rides.
//!
//! Three recovery laws are available:
//!
//! - `waterworth` (default): integral model with the power-law time constant
//!   `tau = 2287.2 * D_CP^-0.688`, D_CP taken from the time-weighted mean of
//!   below-CP power.
//! - `skiba`: Skiba (2012) integral model with
//!   `tau = 546 * e^(-0.01 * D_CP) + 316`, D_CP taken from the running mean of
//!   below-CP samples.
//! - `froncioni-skiba-clarke`: differential model,
//!   `dW/dt = D_CP (W' - W) / W'` below CP, integrated exactly over each
//!   interval, D_CP taken from the time-weighted mean of below-CP power.
//!
//! All three deplete by exactly `(P - CP) * dt` above CP and hold the balance
//! constant at CP. The power of each sample is held until the next timestamp.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::error::{Result, SweatError, ValidationError};
use crate::models::PowerSeries;
use crate::numeric::{ensure_finite, ensure_positive};
use crate::power_duration::FittedCpModel;

/// Floor for the below-CP shortfall used by the power-law time constant
const MIN_SHORTFALL_WATTS: f64 = 1.0;

/// W' recovery algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WPrimeBalanceAlgorithm {
    #[default]
    Waterworth,
    Skiba,
    FroncioniSkibaClarke,
}

impl WPrimeBalanceAlgorithm {
    pub const CHOICES: [&'static str; 3] = ["waterworth", "skiba", "froncioni-skiba-clarke"];

    pub const ALL: [WPrimeBalanceAlgorithm; 3] = [
        WPrimeBalanceAlgorithm::Waterworth,
        WPrimeBalanceAlgorithm::Skiba,
        WPrimeBalanceAlgorithm::FroncioniSkibaClarke,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WPrimeBalanceAlgorithm::Waterworth => "waterworth",
            WPrimeBalanceAlgorithm::Skiba => "skiba",
            WPrimeBalanceAlgorithm::FroncioniSkibaClarke => "froncioni-skiba-clarke",
        }
    }

    /// Advance the reserve by one interval of `dt` seconds at constant `power`
    fn advance(&self, state: &mut ReserveState, power: f64, dt: f64, cp: f64, w_prime: f64) {
        if power > cp {
            state.balance -= (power - cp) * dt;
            return;
        }
        if power == cp {
            return;
        }

        let decay = match self {
            WPrimeBalanceAlgorithm::Waterworth => {
                let shortfall = state
                    .time_weighted_shortfall(power, dt, cp)
                    .max(MIN_SHORTFALL_WATTS);
                let tau = 2287.2 * shortfall.powf(-0.688);
                (-dt / tau).exp()
            }
            WPrimeBalanceAlgorithm::Skiba => {
                state.below_cp_power_sum += power;
                state.below_cp_samples += 1;
                let shortfall = cp - state.below_cp_power_sum / state.below_cp_samples as f64;
                let tau = 546.0 * (-0.01 * shortfall).exp() + 316.0;
                (-dt / tau).exp()
            }
            WPrimeBalanceAlgorithm::FroncioniSkibaClarke => {
                let shortfall = state.time_weighted_shortfall(power, dt, cp);
                (-shortfall * dt / w_prime).exp()
            }
        };

        let deficit = w_prime - state.balance;
        if deficit > 0.0 {
            state.balance = w_prime - deficit * decay;
        }
    }
}

impl fmt::Display for WPrimeBalanceAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WPrimeBalanceAlgorithm {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "waterworth" => Ok(WPrimeBalanceAlgorithm::Waterworth),
            "skiba" => Ok(WPrimeBalanceAlgorithm::Skiba),
            "froncioni-skiba-clarke" => Ok(WPrimeBalanceAlgorithm::FroncioniSkibaClarke),
            _ => Err(ValidationError::InvalidChoice {
                parameter: "algorithm".to_string(),
                value: s.to_string(),
                choices: Self::CHOICES.iter().map(|c| c.to_string()).collect(),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ReserveState {
    balance: f64,
    below_cp_power_sum: f64,
    below_cp_samples: usize,
    below_cp_energy: f64,
    below_cp_time: f64,
}

impl ReserveState {
    /// Fold a below-CP interval into the time-weighted mean and return CP minus that mean
    fn time_weighted_shortfall(&mut self, power: f64, dt: f64, cp: f64) -> f64 {
        self.below_cp_energy += power * dt;
        self.below_cp_time += dt;
        cp - self.below_cp_energy / self.below_cp_time
    }
}

/// W' balance series for a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WPrimeBalance {
    /// Recovery law used
    pub algorithm: WPrimeBalanceAlgorithm,
    /// Timestamp for each balance value (same as the input series)
    pub timestamps: Vec<f64>,
    /// W' balance in joules at each timestamp
    pub balance: Vec<f64>,
    /// Minimum W' balance reached (most depleted)
    pub min_balance: f64,
    /// Time spent with W' balance below zero (seconds)
    pub time_below_zero: f64,
}

impl WPrimeBalance {
    pub fn len(&self) -> usize {
        self.balance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balance.is_empty()
    }

    pub fn final_balance(&self) -> Option<f64> {
        self.balance.last().copied()
    }
}

/// Computes W' balance series for a fixed CP / W' pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WPrimeBalanceCalculator {
    cp: f64,
    w_prime: f64,
    algorithm: WPrimeBalanceAlgorithm,
    initial_reserve: Option<f64>,
}

impl WPrimeBalanceCalculator {
    pub fn new(cp: f64, w_prime: f64) -> Result<Self> {
        ensure_positive("cp", cp)?;
        ensure_positive("w_prime", w_prime)?;
        Ok(Self {
            cp,
            w_prime,
            algorithm: WPrimeBalanceAlgorithm::default(),
            initial_reserve: None,
        })
    }

    /// Use CP and W' from a fitted power-duration model
    pub fn from_fitted(model: &FittedCpModel) -> Result<Self> {
        Self::new(model.cp, model.w_prime)
    }

    pub fn with_algorithm(mut self, algorithm: WPrimeBalanceAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Select the algorithm by name
    pub fn with_algorithm_name(self, name: &str) -> Result<Self> {
        Ok(self.with_algorithm(name.parse()?))
    }

    /// Start from a partially depleted reserve instead of full W'
    pub fn with_initial_reserve(mut self, reserve: f64) -> Result<Self> {
        if !reserve.is_finite() || reserve < 0.0 || reserve > self.w_prime {
            return Err(ValidationError::InvalidParameter {
                parameter: "initial_reserve".to_string(),
                value: reserve,
                reason: format!("must be between 0 and W' ({})", self.w_prime),
            }
            .into());
        }
        self.initial_reserve = Some(reserve);
        Ok(self)
    }

    pub fn cp(&self) -> f64 {
        self.cp
    }

    pub fn w_prime(&self) -> f64 {
        self.w_prime
    }

    pub fn algorithm(&self) -> WPrimeBalanceAlgorithm {
        self.algorithm
    }

    pub fn initial_reserve(&self) -> f64 {
        self.initial_reserve.unwrap_or(self.w_prime)
    }

    /// Calculate W' balance throughout a power series
    #[instrument(skip(self, series), fields(algorithm = %self.algorithm, samples = series.len()))]
    pub fn calculate(&self, series: &PowerSeries) -> Result<WPrimeBalance> {
        validate_series(series)?;

        let samples = &series.samples;
        let mut state = ReserveState {
            balance: self.initial_reserve(),
            ..ReserveState::default()
        };

        let mut timestamps = Vec::with_capacity(samples.len());
        let mut balance = Vec::with_capacity(samples.len());
        timestamps.push(samples[0].timestamp);
        balance.push(state.balance);

        let mut min_balance = state.balance;
        let mut time_below_zero = 0.0;

        for window in samples.windows(2) {
            let (previous, current) = (window[0], window[1]);
            let dt = current.timestamp - previous.timestamp;

            self.algorithm
                .advance(&mut state, previous.power, dt, self.cp, self.w_prime);

            timestamps.push(current.timestamp);
            balance.push(state.balance);
            min_balance = min_balance.min(state.balance);

            if state.balance < 0.0 {
                time_below_zero += dt;
            }
        }

        debug!(min_balance, time_below_zero, "W' balance calculated");

        Ok(WPrimeBalance {
            algorithm: self.algorithm,
            timestamps,
            balance,
            min_balance,
            time_below_zero,
        })
    }

    /// Calculate W' balance for many independent series in parallel
    pub fn calculate_batch(&self, series: &[PowerSeries]) -> Vec<Result<WPrimeBalance>> {
        series.par_iter().map(|s| self.calculate(s)).collect()
    }
}

/// Calculate W' balance with the algorithm selected by name
pub fn w_prime_balance(
    series: &PowerSeries,
    cp: f64,
    w_prime: f64,
    algorithm: &str,
) -> Result<WPrimeBalance> {
    WPrimeBalanceCalculator::new(cp, w_prime)?
        .with_algorithm_name(algorithm)?
        .calculate(series)
}

fn validate_series(series: &PowerSeries) -> Result<()> {
    if series.is_empty() {
        return Err(ValidationError::Empty {
            what: "power series".to_string(),
        }
        .into());
    }

    ensure_finite("timestamp", &series.timestamps())?;
    ensure_finite("power", &series.powers())?;

    for (index, window) in series.samples.windows(2).enumerate() {
        if window[1].timestamp <= window[0].timestamp {
            return Err(ValidationError::NonMonotonicTimestamp {
                index: index + 1,
                previous: window[0].timestamp,
                current: window[1].timestamp,
            }
            .into());
        }
    }

    Ok(())
}
