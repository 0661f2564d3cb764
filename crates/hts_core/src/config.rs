//! # Pipeline Configuration
//!
//! Tuning constants for statistics, Gaussian-process fitting and run
//! execution, grouped in one serializable struct.
//!
//! ## Usage
//! ```rust
//! use hts_core::config::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let fast = PipelineConfig::fast();
//! assert!(fast.gp.max_iterations < config.gp.max_iterations);
//! ```
//!
//! ## Environment Variables
//!
//! - `HTS_CONFIG_PROFILE`: Select preset (fast, thorough, default)

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::Result;
use crate::run::MergeMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub gp: GpConfig,
    pub stats: StatsConfig,
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Coarse GP search, for interactive use and tests
    pub fn fast() -> Self {
        Self {
            gp: GpConfig {
                max_iterations: 40,
                lengthscale_steps: 6,
                noise_steps: 5,
                ..GpConfig::default()
            },
            ..Self::default()
        }
    }

    /// Dense GP search
    pub fn thorough() -> Self {
        Self {
            gp: GpConfig {
                max_iterations: 2000,
                lengthscale_steps: 24,
                noise_steps: 16,
                ..GpConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_env_or_default() -> Self {
        match env::var("HTS_CONFIG_PROFILE").unwrap_or_default().to_lowercase().as_str() {
            "fast" => Self::fast(),
            "thorough" => Self::thorough(),
            _ => Self::default(),
        }
    }
}

/// Gaussian-process fitting limits and hyperparameter search grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpConfig {
    /// Cap on log-likelihood evaluations per fit
    pub max_iterations: usize,
    /// Minimum non-missing observations required to fit
    pub min_observations: usize,
    /// Lengthscale search range, in normalized plate units
    pub lengthscale_min: f64,
    pub lengthscale_max: f64,
    pub lengthscale_steps: usize,
    /// Noise variance search range, relative to unit signal variance
    pub noise_min: f64,
    pub noise_max: f64,
    pub noise_steps: usize,
    /// Initial diagonal jitter added when a Cholesky factorization fails
    pub jitter: f64,
    pub max_jitter_attempts: usize,
}

impl Default for GpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            min_observations: 5,
            lengthscale_min: 0.05,
            lengthscale_max: 2.0,
            lengthscale_steps: 12,
            noise_min: 1e-4,
            noise_max: 1.0,
            noise_steps: 9,
            jitter: 1e-10,
            max_jitter_attempts: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Minimum null distribution size for significance tests
    pub min_null_size: usize,
    /// Consistency constant turning MAD into a normal-scale sd estimate
    pub robust_mad_scale: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { min_null_size: 3, robust_mad_scale: 1.4826 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Execute per-plate task stages on the rayon pool
    pub parallel_plates: bool,
    /// Combination used by merge tasks that do not name one
    pub default_merge: MergeMethod,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { parallel_plates: true, default_merge: MergeMethod::Mean }
    }
}
