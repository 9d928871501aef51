//! Power series preprocessing
//!
//! Recorded power streams often have dropouts, repeated timestamps, or
//! irregular spacing. These helpers bring a series onto a clean 1 Hz grid
//! before mean maximal power or W' balance is computed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::models::{PowerSample, PowerSeries};
use crate::numeric::ensure_finite;

/// Largest 1 Hz grid [`resample_to_1hz`] will build (about 116 days)
pub const MAX_RESAMPLED_POINTS: usize = 10_000_000;

/// Which sample survives when timestamps repeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Drop samples whose timestamp already appeared.
///
/// Samples are not reordered; a repeated timestamp is detected anywhere in
/// the series, not only between neighbours.
pub fn remove_duplicate_timestamps(series: &PowerSeries, keep: Keep) -> PowerSeries {
    let mut seen = HashSet::with_capacity(series.len());
    // Adding 0.0 folds -0.0 into 0.0 so both hash alike
    let mut first_seen = |sample: &PowerSample| seen.insert((sample.timestamp + 0.0).to_bits());

    let kept: Vec<PowerSample> = match keep {
        Keep::First => series.samples.iter().filter(|&s| first_seen(s)).copied().collect(),
        Keep::Last => {
            let mut kept: Vec<PowerSample> = series
                .samples
                .iter()
                .rev()
                .filter(|&s| first_seen(s))
                .copied()
                .collect();
            kept.reverse();
            kept
        }
    };

    debug!(removed = series.len() - kept.len(), "Duplicate timestamps removed");
    PowerSeries::new(kept)
}

/// Forward-fill the series onto whole seconds from the first to the last timestamp.
///
/// Each grid point takes the power of the latest sample at or before it.
pub fn resample_to_1hz(series: &PowerSeries) -> Result<PowerSeries> {
    let samples = &series.samples;
    let (first, last) = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return Ok(PowerSeries::default()),
    };

    ensure_finite("timestamp", &series.timestamps())?;
    for (index, window) in samples.windows(2).enumerate() {
        if window[1].timestamp < window[0].timestamp {
            return Err(ValidationError::NonMonotonicTimestamp {
                index: index + 1,
                previous: window[0].timestamp,
                current: window[1].timestamp,
            }
            .into());
        }
    }

    let start = first.floor();
    let span = (last - start).floor();
    let points = (span < MAX_RESAMPLED_POINTS as f64)
        .then_some(span as usize)
        .and_then(|steps| steps.checked_add(1));
    let Some(points) = points else {
        return Err(ValidationError::InvalidParameter {
            parameter: "timestamp span".to_string(),
            value: last - first,
            reason: format!(
                "resampling is limited to {} one-second grid points",
                MAX_RESAMPLED_POINTS
            ),
        }
        .into());
    };

    let mut cursor = 0;
    let mut resampled = Vec::with_capacity(points);
    for step in 0..points {
        let t = start + step as f64;
        while cursor + 1 < samples.len() && samples[cursor + 1].timestamp <= t {
            cursor += 1;
        }
        // Grid points before the first sample have nothing to carry forward
        let power = if samples[cursor].timestamp <= t {
            samples[cursor].power
        } else {
            f64::NAN
        };
        resampled.push(PowerSample { timestamp: t, power });
    }

    Ok(PowerSeries::new(resampled))
}

/// Fill NaN powers by linear interpolation over sample positions.
///
/// Points are treated as equally spaced regardless of their timestamps, so
/// run this on a resampled series when spacing matters. Trailing gaps take the
/// last valid power; leading gaps stay NaN since nothing precedes them.
pub fn interpolate_gaps(series: &PowerSeries) -> PowerSeries {
    let mut samples = series.samples.clone();
    let mut previous_valid: Option<usize> = None;

    for i in 0..samples.len() {
        if samples[i].power.is_nan() {
            continue;
        }
        if let Some(start) = previous_valid {
            let (p0, p1) = (samples[start].power, samples[i].power);
            let width = (i - start) as f64;
            for (offset, sample) in samples[(start + 1)..i].iter_mut().enumerate() {
                sample.power = p0 + (offset + 1) as f64 / width * (p1 - p0);
            }
        }
        previous_valid = Some(i);
    }

    if let Some(last) = previous_valid {
        let fill = samples[last].power;
        for sample in &mut samples[(last + 1)..] {
            sample.power = fill;
        }
    }

    PowerSeries::new(samples)
}

/// Optionally resample to 1 Hz and then optionally interpolate gaps
pub fn prepare(series: &PowerSeries, resample: bool, interpolate: bool) -> Result<PowerSeries> {
    let series = if resample {
        resample_to_1hz(series)?
    } else {
        series.clone()
    };

    Ok(if interpolate {
        interpolate_gaps(&series)
    } else {
        series
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(f64, f64)]) -> PowerSeries {
        PowerSeries::new(
            points
                .iter()
                .map(|&(timestamp, power)| PowerSample { timestamp, power })
                .collect(),
        )
    }

    #[test]
    fn test_remove_duplicates_keep_first() {
        let input = series(&[(0.0, 100.0), (1.0, 110.0), (1.0, 120.0), (2.0, 130.0)]);
        let output = remove_duplicate_timestamps(&input, Keep::First);
        assert_eq!(output.powers(), vec![100.0, 110.0, 130.0]);
    }

    #[test]
    fn test_remove_duplicates_keep_last() {
        let input = series(&[(0.0, 100.0), (1.0, 110.0), (1.0, 120.0), (2.0, 130.0)]);
        let output = remove_duplicate_timestamps(&input, Keep::Last);
        assert_eq!(output.powers(), vec![100.0, 120.0, 130.0]);
    }

    #[test]
    fn test_resample_forward_fills() {
        let input = series(&[(0.0, 100.0), (2.5, 200.0), (4.0, 300.0)]);
        let output = resample_to_1hz(&input).unwrap();

        assert_eq!(output.timestamps(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(output.powers(), vec![100.0, 100.0, 100.0, 200.0, 300.0]);
    }

    #[test]
    fn test_resample_rejects_unsorted() {
        let input = series(&[(0.0, 100.0), (3.0, 200.0), (2.0, 300.0)]);
        assert!(resample_to_1hz(&input).is_err());
    }

    #[test]
    fn test_interpolate_gaps() {
        let input = series(&[
            (0.0, f64::NAN),
            (1.0, 100.0),
            (2.0, f64::NAN),
            (3.0, f64::NAN),
            (4.0, 160.0),
            (5.0, f64::NAN),
        ]);
        let output = interpolate_gaps(&input).powers();

        assert!(output[0].is_nan());
        for (actual, expected) in output[1..].iter().zip([100.0, 120.0, 140.0, 160.0, 160.0]) {
            assert!((actual - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_interpolate_gaps_ignores_timestamp_spacing() {
        let input = series(&[(0.0, 1.0), (1.0, f64::NAN), (10.0, 3.0), (11.0, f64::NAN)]);
        let output = interpolate_gaps(&input).powers();

        assert_eq!(output, vec![1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_interpolate_all_missing_stays_missing() {
        let input = series(&[(0.0, f64::NAN), (1.0, f64::NAN)]);
        assert!(interpolate_gaps(&input).powers().iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_resample_rejects_huge_span() {
        let input = series(&[(0.0, 100.0), (1e20, 200.0)]);
        assert!(matches!(
            resample_to_1hz(&input),
            Err(crate::error::SweatError::Validation(ValidationError::InvalidParameter { .. }))
        ));

        let limit = series(&[(0.0, 100.0), (MAX_RESAMPLED_POINTS as f64, 200.0)]);
        assert!(resample_to_1hz(&limit).is_err());
    }

    #[test]
    fn test_prepare_combines_steps() {
        let input = series(&[(0.0, 100.0), (1.0, f64::NAN), (3.0, 300.0)]);

        let untouched = prepare(&input, false, false).unwrap();
        assert_eq!(untouched.len(), 3);

        let output = prepare(&input, true, true).unwrap();
        assert_eq!(output.timestamps(), vec![0.0, 1.0, 2.0, 3.0]);
        // Forward fill carries the NaN at t=1 into t=2, interpolation then bridges 0..3
        let powers = output.powers();
        assert_eq!(powers[0], 100.0);
        assert!((powers[1] - 166.666_666_666_666_66).abs() < 1e-9);
        assert!((powers[2] - 233.333_333_333_333_3).abs() < 1e-9);
        assert_eq!(powers[3], 300.0);
    }
}
