use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::FitPolicy;
use crate::Result;

/// Session policy, usually read from a `bench_assay.toml`
///
/// ```toml
/// default_dilution = "10^-3"
/// result_precision = 2
///
/// [fit_policy]
/// min_r_squared = 0.995
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dilution pre-filled on a fresh CFU form
    pub default_dilution: String,
    /// Decimals shown when a colony density is printed in scientific notation
    pub result_precision: usize,
    pub fit_policy: FitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_dilution: "10^-3".to_owned(),
            result_precision: 2,
            fit_policy: FitPolicy::default(),
        }
    }
}

impl Config {
    /// Read a configuration file from disk
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(format!("config file {} not found", path.display()).into());
        }
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// # Errors
    /// Returns an error if `contents` is not valid TOML, or fails validation.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if the configuration cannot be represented as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        crate::dilution::evaluate(&self.default_dilution)?;
        if let Some(threshold) = self.fit_policy.min_r_squared {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(format!("min_r_squared must lie in [0, 1], got {threshold}").into());
            }
        }
        Ok(())
    }
}
