use sweat::numeric::reshape_column;
use sweat::{
    mean_max_power, w_prime_balance, CpModelKind, CriticalPowerModel, CriticalPowerRegressor,
    Estimator, Observation, PowerSeries, SweatError, ValidationError, WPrimeBalanceAlgorithm,
    WPrimeBalanceCalculator,
};

/// Integration tests that exercise fitting and W' balance together

#[cfg(test)]
mod integration_tests {
    use super::*;

    const CP: f64 = 300.0;
    const W_PRIME: f64 = 20000.0;

    /// 60s easy, 60s hard, 30s easy, 60s hard, 60s easy at 1 Hz
    fn interval_session() -> PowerSeries {
        let mut powers = Vec::new();
        powers.extend(vec![100.0; 60]);
        powers.extend(vec![400.0; 60]);
        powers.extend(vec![100.0; 30]);
        powers.extend(vec![400.0; 60]);
        powers.extend(vec![100.0; 60]);
        PowerSeries::from_1hz(&powers)
    }

    #[test]
    fn test_interval_session_depletes_and_recovers() {
        let series = interval_session();

        for algorithm in WPrimeBalanceAlgorithm::ALL {
            let result = w_prime_balance(&series, CP, W_PRIME, algorithm.as_str()).unwrap();
            let balance = &result.balance;

            assert_eq!(balance.len(), series.len());
            assert_eq!(result.timestamps, series.timestamps());
            assert_eq!(balance[0], W_PRIME);

            // Nothing happens during the opening easy block when starting full
            assert!(balance[..=60].iter().all(|&b| b == W_PRIME));

            // First hard block: 60 s at 100 W over CP
            assert!(balance[61..=120].windows(2).all(|w| w[1] < w[0]), "{}", algorithm);
            assert!((balance[120] - (W_PRIME - 6000.0)).abs() < 1e-9);

            // Short recovery is partial
            assert!(balance[121..=150].windows(2).all(|w| w[1] > w[0]), "{}", algorithm);
            assert!(balance[150] > balance[120]);
            assert!(balance[150] < W_PRIME);

            // Second hard block starts from a lower reserve than the first
            assert!(balance[210] < balance[120], "{}", algorithm);
            assert!(result.min_balance == balance[210]);

            // Final easy block recovers without overshooting
            assert!(balance[211..].windows(2).all(|w| w[1] > w[0]));
            assert!(balance.iter().all(|&b| b <= W_PRIME));
        }
    }

    #[test]
    fn test_default_algorithm_differs_from_differential_model() {
        let series = interval_session();

        let default = WPrimeBalanceCalculator::new(CP, W_PRIME)
            .unwrap()
            .calculate(&series)
            .unwrap();
        let differential = WPrimeBalanceCalculator::new(CP, W_PRIME)
            .unwrap()
            .with_algorithm(WPrimeBalanceAlgorithm::FroncioniSkibaClarke)
            .calculate(&series)
            .unwrap();

        assert_eq!(default.algorithm, WPrimeBalanceAlgorithm::Waterworth);
        let max_difference = default
            .balance
            .iter()
            .zip(&differential.balance)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_difference > 1.0, "traces should differ, got {}", max_difference);
    }

    #[test]
    fn test_bogus_algorithm_rejected_for_any_series() {
        for series in [interval_session(), PowerSeries::from_1hz(&[250.0])] {
            let result = w_prime_balance(&series, CP, W_PRIME, "bogus");
            assert!(matches!(
                result,
                Err(SweatError::Validation(ValidationError::InvalidChoice { .. }))
            ));
        }
    }

    #[test]
    fn test_fit_then_track_reserve() {
        // Best efforts that follow the 2-parameter curve exactly
        let observations: Vec<Observation> = [120.0, 300.0, 720.0, 1200.0]
            .iter()
            .map(|&t| Observation::new(t, CP + W_PRIME / t))
            .collect();

        let fitted = CriticalPowerModel::new(CpModelKind::TwoParameter)
            .fit(&observations)
            .unwrap();

        let result = WPrimeBalanceCalculator::from_fitted(&fitted)
            .unwrap()
            .calculate(&interval_session())
            .unwrap();

        assert!((result.balance[120] - (W_PRIME - 6000.0)).abs() < 1e-2);
    }

    #[test]
    fn test_mean_max_power_feeds_regressor() {
        // Each block is the athlete's best effort for its own length
        let mut powers = Vec::new();
        for duration in [60u32, 180, 600] {
            powers.extend(vec![CP + W_PRIME / duration as f64; duration as usize]);
            powers.extend(vec![50.0; 600]);
        }
        let series = PowerSeries::from_1hz(&powers);

        let observations = mean_max_power(&series, &[60, 180, 600]).unwrap();
        assert_eq!(observations.len(), 3);

        let x = reshape_column(
            &observations
                .iter()
                .map(|o| o.duration_seconds)
                .collect::<Vec<_>>(),
        );
        let y: Vec<f64> = observations.iter().map(|o| o.power_watts).collect();

        let mut regressor = CriticalPowerRegressor::new(CpModelKind::TwoParameter);
        regressor.fit(&x, &y).unwrap();

        assert!((regressor.cp().unwrap() - CP).abs() / CP < 1e-6);
        assert!((regressor.w_prime().unwrap() - W_PRIME).abs() / W_PRIME < 1e-6);
        assert!(regressor.score(&x, &y).unwrap() > 0.999_999);
    }

    #[test]
    fn test_results_serialize_to_json() {
        let observations: Vec<Observation> = [120.0, 300.0, 720.0]
            .iter()
            .map(|&t| Observation::new(t, CP + W_PRIME / t))
            .collect();
        let fitted = CriticalPowerModel::new(CpModelKind::TwoParameter)
            .fit(&observations)
            .unwrap();

        let json = serde_json::to_value(&fitted).unwrap();
        assert_eq!(json["kind"], "2_param");
        assert!(json["p_max"].is_null());

        let balance = WPrimeBalanceCalculator::from_fitted(&fitted)
            .unwrap()
            .with_algorithm(WPrimeBalanceAlgorithm::FroncioniSkibaClarke)
            .calculate(&interval_session())
            .unwrap();
        let json = serde_json::to_string(&balance).unwrap();
        assert!(json.contains("\"algorithm\":\"froncioni-skiba-clarke\""));

        let restored: sweat::WPrimeBalance = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.balance.len(), balance.balance.len());
        assert_eq!(restored.algorithm, balance.algorithm);
    }
}
