//! Engine configuration structures.

use serde::{Deserialize, Serialize};

use crate::core::simulator::DEFAULT_MAX_FRAME_SLICE_SECS;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for threaded processes. `0` requests the default
    /// (half the logical CPUs); the pool always runs at least one thread.
    #[serde(default)]
    pub worker_threads: usize,
    /// Fixed simulation timestep, in seconds.
    #[serde(default = "default_fixed_step")]
    pub fixed_step_secs: f64,
    /// Maximum simulated seconds a single frame may contribute to the
    /// accumulator.
    #[serde(default = "default_max_frame_slice")]
    pub max_frame_slice_secs: f64,
}

fn default_fixed_step() -> f64 {
    0.01
}

const fn default_max_frame_slice() -> f64 {
    DEFAULT_MAX_FRAME_SLICE_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get() / 2,
            fixed_step_secs: default_fixed_step(),
            max_frame_slice_secs: default_max_frame_slice(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.fixed_step_secs.is_finite() && self.fixed_step_secs > 0.0) {
            return Err("fixed_step_secs must be a positive number".into());
        }
        if !(self.max_frame_slice_secs.is_finite() && self.max_frame_slice_secs > 0.0) {
            return Err("max_frame_slice_secs must be a positive number".into());
        }
        if self.max_frame_slice_secs < self.fixed_step_secs {
            return Err("max_frame_slice_secs must be at least fixed_step_secs".into());
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// A parse or validation error message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_step() {
        let cfg = EngineConfig {
            fixed_step_secs: 0.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_frame_slice_below_step() {
        let cfg = EngineConfig {
            fixed_step_secs: 0.5,
            max_frame_slice_secs: 0.25,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_json_with_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{ "worker_threads": 4 }"#).unwrap();
        assert_eq!(cfg.worker_threads, 4);
        assert!((cfg.fixed_step_secs - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_invalid_json_values() {
        assert!(EngineConfig::from_json_str(r#"{ "fixed_step_secs": -1.0 }"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
