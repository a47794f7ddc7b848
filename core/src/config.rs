//! Job system configuration.
//!
//! Loaded once by the composition root and handed to `JobRegistry::build`.
//! Nothing here may change after the registry is built.

use crate::error::JobResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    /// Multiplier applied to every simulation step delta.
    pub time_scale:  f64,
    pub visibility:  VisibilityConfig,
    pub self_update: SelfUpdateConfig,
    pub physics:     PhysicsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Re-evaluations per second of host time.
    pub refresh_hz:       f64,
    /// Threshold multiplier for a currently invisible subscriber.
    pub enter_multiplier: f32,
    /// Threshold multiplier for a currently visible subscriber.
    pub exit_multiplier:  f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelfUpdateConfig {
    /// Cap on passes per frame when subscribers keep requesting a repeat.
    /// `None` leaves the loop unbounded.
    pub max_repeat_passes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhysicsConfig {
    pub enable_2d: bool,
    pub enable_3d: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            time_scale:  1.0,
            visibility:  VisibilityConfig::default(),
            self_update: SelfUpdateConfig::default(),
            physics:     PhysicsConfig::default(),
        }
    }
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            refresh_hz:       15.0,
            enter_multiplier: 1.1,
            exit_multiplier:  1.2,
        }
    }
}

impl Default for SelfUpdateConfig {
    fn default() -> Self {
        Self { max_repeat_passes: Some(16) }
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { enable_2d: true, enable_3d: true }
    }
}

impl JobConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    /// An unreadable file is `JobError::Config`, malformed JSON is
    /// `JobError::Serialization`, and a failed `validate` is `JobError::Other`.
    /// In tests, use JobConfig::default_test().
    pub fn load(path: &str) -> JobResult<Self> {
        let content = std::fs::read_to_string(path).inspect_err(|e| {
            log::error!("cannot read job config {path}: {e}");
        })?;
        let config: JobConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with an unscaled clock and both backends active.
    pub fn default_test() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let vis = &self.visibility;
        if !(vis.refresh_hz > 0.0) {
            anyhow::bail!("visibility.refresh_hz must be positive, got {}", vis.refresh_hz);
        }
        if vis.exit_multiplier < vis.enter_multiplier {
            anyhow::bail!(
                "visibility.exit_multiplier ({}) must not be below enter_multiplier ({})",
                vis.exit_multiplier,
                vis.enter_multiplier
            );
        }
        if self.time_scale < 0.0 {
            anyhow::bail!("time_scale must not be negative, got {}", self.time_scale);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: JobConfig =
            serde_json::from_str(r#"{ "visibility": { "refresh_hz": 30.0 } }"#).unwrap();
        assert_eq!(config.visibility.refresh_hz, 30.0);
        assert_eq!(config.visibility.exit_multiplier, 1.2);
        assert_eq!(config.self_update.max_repeat_passes, Some(16));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_hysteresis_is_rejected() {
        let mut config = JobConfig::default_test();
        config.visibility.exit_multiplier = 1.0;
        assert!(config.validate().is_err());
    }

    fn write_temp(name: &str, content: &str) -> String {
        let path = std::env::temp_dir().join(format!("framejob-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn load_reports_typed_errors() {
        let missing = JobConfig::load("/nonexistent/framejob/jobs.json").unwrap_err();
        assert!(matches!(missing, JobError::Config(_)), "unexpected error: {missing}");

        let garbled = write_temp("garbled.json", "{ not json");
        let err = JobConfig::load(&garbled).unwrap_err();
        assert!(matches!(err, JobError::Serialization(_)), "unexpected error: {err}");

        let inverted = write_temp(
            "inverted.json",
            r#"{ "visibility": { "enter_multiplier": 1.5, "exit_multiplier": 1.0 } }"#,
        );
        let err = JobConfig::load(&inverted).unwrap_err();
        assert!(matches!(err, JobError::Other(_)), "unexpected error: {err}");
    }

    #[test]
    fn load_reads_partial_file() {
        let path = write_temp("partial.json", r#"{ "time_scale": 0.5 }"#);
        let config = JobConfig::load(&path).unwrap();
        assert_eq!(config.time_scale, 0.5);
        assert_eq!(config.visibility, VisibilityConfig::default());
    }

    #[test]
    fn null_repeat_cap_means_unbounded() {
        let config: JobConfig =
            serde_json::from_str(r#"{ "self_update": { "max_repeat_passes": null } }"#).unwrap();
        assert_eq!(config.self_update.max_repeat_passes, None);
    }
}
