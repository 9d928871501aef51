//! sweat: power-duration modelling and W' balance tracking for workout analysis
//!
//! Fit critical power models to best efforts with [`CriticalPowerModel`], then
//! follow the anaerobic reserve through a ride with [`WPrimeBalanceCalculator`].

pub mod config;
pub mod error;
pub mod logging;
pub mod model_selection;
pub mod models;
pub mod numeric;
pub mod power_duration;
pub mod resample;
pub mod w_prime_balance;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::SweatConfig;
pub use error::{ConvergenceError, NotFittedError, Result, SweatError, ValidationError};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use model_selection::{cross_val_score, grid_search, Estimator, KFold, Scoring};
pub use power_duration::{
    mean_max_power, CpModelKind, CriticalPowerModel, CriticalPowerRegressor, FittedCpModel,
    OptimizerSettings,
};
pub use w_prime_balance::{
    w_prime_balance, WPrimeBalance, WPrimeBalanceAlgorithm, WPrimeBalanceCalculator,
};
