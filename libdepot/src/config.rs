use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distance::Strategy;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Largest number of points accepted in one request.
    pub max_points: usize,
    /// Largest `driversCount` accepted in one request.
    pub max_drivers: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub n_init: usize,
    pub tolerance: f64,
    pub outliers: OutlierConfig,
    pub distance: DistanceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_points: 500,
            max_drivers: 50,
            seed: 42,
            max_iterations: 300,
            n_init: 10,
            tolerance: 1e-4,
            outliers: OutlierConfig::default(),
            distance: DistanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub enabled: bool,
    /// Local outlier factor above which a point leaves its group.
    pub threshold: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    pub strategy: Strategy,
    /// Origins (and destinations) per provider call.
    pub chunk_size: usize,
    pub timeout_ms: u64,
    pub threads: usize,
    /// Fraction of unresolvable pairs above which the external matrix is
    /// given up on.
    pub max_unresolved_fraction: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::GreatCircle,
            chunk_size: 10,
            timeout_ms: 10_000,
            threads: 4,
            max_unresolved_fraction: 0.5,
        }
    }
}

impl DistanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServiceConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::trace!("loading configuration from {path:?}");
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {path:?}: {e}")))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 || self.max_drivers == 0 {
            return Err(Error::config("max_points and max_drivers must be positive"));
        }
        if self.max_iterations == 0 || self.n_init == 0 {
            return Err(Error::config("max_iterations and n_init must be positive"));
        }
        if !(self.tolerance >= 0.0) {
            return Err(Error::config("tolerance must be non-negative"));
        }
        if !(self.outliers.threshold >= 1.0) {
            return Err(Error::config("outliers.threshold must be at least 1"));
        }
        if self.distance.chunk_size == 0 || self.distance.threads == 0 {
            return Err(Error::config("distance.chunk_size and distance.threads must be positive"));
        }
        if !(0.0..=1.0).contains(&self.distance.max_unresolved_fraction) {
            return Err(Error::config("distance.max_unresolved_fraction must lie in [0, 1]"));
        }
        Ok(())
    }
}
