use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// A single (duration, maximal power) pair on the power-duration curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Effort duration in seconds
    pub duration_seconds: f64,

    /// Best mean power sustained over that duration, in watts
    pub power_watts: f64,
}

impl Observation {
    pub fn new(duration_seconds: f64, power_watts: f64) -> Self {
        Self {
            duration_seconds,
            power_watts,
        }
    }
}

/// Individual sample in a power time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Seconds from an arbitrary origin (usually workout start)
    pub timestamp: f64,

    /// Power output in watts
    pub power: f64,
}

/// Ordered power-over-time samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerSeries {
    pub samples: Vec<PowerSample>,
}

impl PowerSeries {
    pub fn new(samples: Vec<PowerSample>) -> Self {
        Self { samples }
    }

    /// Build a series from parallel timestamp and power slices
    pub fn from_parts(timestamps: &[f64], powers: &[f64]) -> Result<Self> {
        if timestamps.len() != powers.len() {
            return Err(ValidationError::LengthMismatch {
                left_name: "timestamps".to_string(),
                left: timestamps.len(),
                right_name: "powers".to_string(),
                right: powers.len(),
            }
            .into());
        }

        Ok(Self::new(
            timestamps
                .iter()
                .zip(powers)
                .map(|(&timestamp, &power)| PowerSample { timestamp, power })
                .collect(),
        ))
    }

    /// Build a series sampled at 1 Hz starting at t = 0
    pub fn from_1hz(powers: &[f64]) -> Self {
        Self::new(
            powers
                .iter()
                .enumerate()
                .map(|(i, &power)| PowerSample {
                    timestamp: i as f64,
                    power,
                })
                .collect(),
        )
    }

    /// Build a series from wall-clock samples; timestamps become seconds since the first sample
    pub fn from_datetimes(samples: &[(DateTime<Utc>, f64)]) -> Self {
        let origin = match samples.first() {
            Some((first, _)) => *first,
            None => return Self::default(),
        };

        Self::new(
            samples
                .iter()
                .map(|(at, power)| PowerSample {
                    timestamp: (*at - origin).num_milliseconds() as f64 / 1000.0,
                    power: *power,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn powers(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.power).collect()
    }

    /// Elapsed time covered by the series
    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}
