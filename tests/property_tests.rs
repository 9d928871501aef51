use proptest::prelude::*;
use sweat::resample::{prepare, remove_duplicate_timestamps, Keep};
use sweat::{
    CpModelKind, CriticalPowerModel, Observation, PowerSample, PowerSeries, WPrimeBalanceAlgorithm,
    WPrimeBalanceCalculator,
};

fn algorithm_strategy() -> impl Strategy<Value = WPrimeBalanceAlgorithm> {
    prop_oneof![
        Just(WPrimeBalanceAlgorithm::Waterworth),
        Just(WPrimeBalanceAlgorithm::Skiba),
        Just(WPrimeBalanceAlgorithm::FroncioniSkibaClarke),
    ]
}

/// Irregularly sampled ride: strictly increasing timestamps with gaps of 0.5-5 s
fn series_strategy(max_len: usize) -> impl Strategy<Value = PowerSeries> {
    prop::collection::vec((0.5f64..5.0, 0.0f64..1200.0), 1..max_len).prop_map(|steps| {
        let mut timestamp = 0.0;
        let samples = steps
            .into_iter()
            .map(|(gap, power)| {
                let sample = PowerSample { timestamp, power };
                timestamp += gap;
                sample
            })
            .collect();
        PowerSeries::new(samples)
    })
}

proptest! {
    #[test]
    fn test_balance_never_exceeds_w_prime(
        series in series_strategy(400),
        cp in 150.0f64..400.0,
        w_prime in 5000.0f64..30000.0,
        reserve_fraction in 0.0f64..=1.0,
        algorithm in algorithm_strategy(),
    ) {
        let calculator = WPrimeBalanceCalculator::new(cp, w_prime)
            .unwrap()
            .with_algorithm(algorithm)
            .with_initial_reserve(reserve_fraction * w_prime)
            .unwrap();

        let result = calculator.calculate(&series).unwrap();

        prop_assert_eq!(result.len(), series.len());
        prop_assert!(result.balance.iter().all(|&b| b <= w_prime));
        prop_assert!(result.balance.iter().all(|b| b.is_finite()));
        prop_assert!(result.balance.iter().all(|&b| b >= result.min_balance));
        prop_assert!(result.time_below_zero >= 0.0);
        prop_assert!(result.time_below_zero <= series.duration() + 1e-9);
    }

    #[test]
    fn test_riding_at_cp_keeps_reserve_constant(
        len in 1usize..300,
        cp in 150.0f64..400.0,
        w_prime in 5000.0f64..30000.0,
        reserve_fraction in 0.0f64..=1.0,
        algorithm in algorithm_strategy(),
    ) {
        let reserve = reserve_fraction * w_prime;
        let series = PowerSeries::from_1hz(&vec![cp; len]);

        let result = WPrimeBalanceCalculator::new(cp, w_prime)
            .unwrap()
            .with_algorithm(algorithm)
            .with_initial_reserve(reserve)
            .unwrap()
            .calculate(&series)
            .unwrap();

        prop_assert!(result.balance.iter().all(|&b| b == reserve));
    }

    #[test]
    fn test_depletion_matches_work_above_cp(
        series in series_strategy(200),
        cp in 100.0f64..200.0,
        w_prime in 5000.0f64..30000.0,
        algorithm in algorithm_strategy(),
    ) {
        // Shift every sample above CP so the reserve only depletes
        let above_cp = PowerSeries::new(
            series
                .samples
                .iter()
                .map(|s| PowerSample { timestamp: s.timestamp, power: cp + 1.0 + s.power })
                .collect(),
        );

        let result = WPrimeBalanceCalculator::new(cp, w_prime)
            .unwrap()
            .with_algorithm(algorithm)
            .calculate(&above_cp)
            .unwrap();

        let work_above_cp: f64 = above_cp
            .samples
            .windows(2)
            .map(|w| (w[0].power - cp) * (w[1].timestamp - w[0].timestamp))
            .sum();
        let expected = w_prime - work_above_cp;
        let actual = result.final_balance().unwrap();

        prop_assert!((actual - expected).abs() <= 1e-9 * (w_prime + work_above_cp));
        prop_assert!(result.balance.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_two_parameter_fit_recovers_parameters(
        cp in 150.0f64..450.0,
        w_prime in 5000.0f64..35000.0,
        durations in prop::collection::btree_set(30u32..3600, 3..10),
    ) {
        let observations: Vec<Observation> = durations
            .iter()
            .map(|&t| Observation::new(t as f64, cp + w_prime / t as f64))
            .collect();

        let fitted = CriticalPowerModel::new(CpModelKind::TwoParameter)
            .fit(&observations)
            .unwrap();

        prop_assert!((fitted.cp - cp).abs() / cp < 1e-6);
        prop_assert!((fitted.w_prime - w_prime).abs() / w_prime < 1e-6);
        prop_assert!(fitted.p_max.is_none());
    }

    #[test]
    fn test_deduplicated_series_has_unique_timestamps(
        timestamps in prop::collection::vec(0u16..500, 1..200),
        keep_last in any::<bool>(),
    ) {
        let mut sorted = timestamps;
        sorted.sort_unstable();
        let series = PowerSeries::new(
            sorted
                .iter()
                .enumerate()
                .map(|(i, &t)| PowerSample { timestamp: t as f64, power: i as f64 })
                .collect(),
        );

        let keep = if keep_last { Keep::Last } else { Keep::First };
        let deduplicated = remove_duplicate_timestamps(&series, keep);

        prop_assert!(deduplicated.timestamps().windows(2).all(|w| w[1] > w[0]));

        let resampled = prepare(&deduplicated, true, true).unwrap();
        let first = deduplicated.timestamps()[0];
        let last = deduplicated.timestamps()[deduplicated.len() - 1];
        prop_assert_eq!(resampled.len(), (last - first) as usize + 1);
    }
}
