use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::power_duration::{CpModelKind, CriticalPowerModel, OptimizerSettings};
use crate::w_prime_balance::{WPrimeBalanceAlgorithm, WPrimeBalanceCalculator};

/// Main library configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweatConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Power-duration regression settings
    pub regression: RegressionSettings,

    /// W' balance settings
    pub w_prime_balance: WPrimeBalanceSettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Power-duration regression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSettings {
    /// Model variant (2_param, 3_param)
    pub model: CpModelKind,

    /// Optimizer iteration cap
    pub max_iterations: usize,

    /// Relative cost reduction considered converged
    pub cost_tolerance: f64,

    /// Relative parameter step considered converged
    pub step_tolerance: f64,

    /// Starting Levenberg-Marquardt damping
    pub initial_damping: f64,
}

/// W' balance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WPrimeBalanceSettings {
    /// Recovery algorithm
    pub algorithm: WPrimeBalanceAlgorithm,

    /// Starting reserve in joules (None starts from full W')
    pub initial_reserve: Option<f64>,
}

impl Default for SweatConfig {
    fn default() -> Self {
        let now = Utc::now();

        SweatConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            regression: RegressionSettings::default(),
            w_prime_balance: WPrimeBalanceSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for RegressionSettings {
    fn default() -> Self {
        let optimizer = OptimizerSettings::default();
        RegressionSettings {
            model: CpModelKind::TwoParameter,
            max_iterations: optimizer.max_iterations,
            cost_tolerance: optimizer.cost_tolerance,
            step_tolerance: optimizer.step_tolerance,
            initial_damping: optimizer.initial_damping,
        }
    }
}

impl Default for WPrimeBalanceSettings {
    fn default() -> Self {
        WPrimeBalanceSettings {
            algorithm: WPrimeBalanceAlgorithm::Waterworth,
            initial_reserve: None,
        }
    }
}

impl RegressionSettings {
    /// Build the configured critical power model
    pub fn to_model(&self) -> CriticalPowerModel {
        CriticalPowerModel::new(self.model).with_optimizer(OptimizerSettings {
            max_iterations: self.max_iterations,
            cost_tolerance: self.cost_tolerance,
            step_tolerance: self.step_tolerance,
            initial_damping: self.initial_damping,
        })
    }
}

impl WPrimeBalanceSettings {
    /// Build a calculator for the given CP and W'
    pub fn to_calculator(&self, cp: f64, w_prime: f64) -> crate::Result<WPrimeBalanceCalculator> {
        let calculator = WPrimeBalanceCalculator::new(cp, w_prime)?.with_algorithm(self.algorithm);
        match self.initial_reserve {
            Some(reserve) => calculator.with_initial_reserve(reserve),
            None => Ok(calculator),
        }
    }
}

/// Configuration management implementation
impl SweatConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: SweatConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sweat")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "Config file not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to_file(config_path)
    }
}
