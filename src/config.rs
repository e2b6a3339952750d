//! Simulation-wide settings.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::{DEFAULT_DT, MIN_UNITS_PAR};

/// Settings shared by all clocks and populations of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// The time step (in seconds) of the default clock.
    pub default_dt: f64,
    /// The seed of the random number generators; population `k` uses `seed + k`.
    pub seed: u64,
    /// Whether to check that every state variable stays finite after integration.
    pub check_finite: bool,
    /// The fraction of a run between two progress log messages.
    pub progress_interval: f64,
    /// Minimum number of units in a population to integrate it with parallel computation.
    pub min_units_par: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            default_dt: DEFAULT_DT,
            seed: 0,
            check_finite: true,
            progress_interval: 0.1,
            min_units_par: MIN_UNITS_PAR,
        }
    }
}

impl SimConfig {
    /// Parse a configuration from a JSON string. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)
            .map_err(|e| SimError::InvalidParameters(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let json = fs::read_to_string(path).map_err(|e| SimError::IOError(e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Save the configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SimError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| SimError::IOError(e.to_string()))?;
        fs::write(path, json).map_err(|e| SimError::IOError(e.to_string()))
    }

    /// Check that the configuration describes a runnable simulation.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.default_dt.is_finite() && self.default_dt > 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "The time step must be positive and finite, got {}",
                self.default_dt
            )));
        }
        if !(self.progress_interval > 0.0 && self.progress_interval <= 1.0) {
            return Err(SimError::InvalidParameters(format!(
                "The progress interval must be in (0, 1], got {}",
                self.progress_interval
            )));
        }
        Ok(())
    }
}
