//! Finalizer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::retry::ConflictBackoff;
use crate::types::REGISTRY_FINALIZER;

/// Conflict backoff as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub steps: u32,
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self::from(&ConflictBackoff::default())
    }
}

impl From<&ConflictBackoff> for BackoffSettings {
    fn from(backoff: &ConflictBackoff) -> Self {
        Self {
            steps: backoff.steps,
            initial_delay_ms: u64::try_from(backoff.initial_delay.as_millis()).unwrap_or(u64::MAX),
            factor: backoff.factor,
            jitter: backoff.jitter,
        }
    }
}

impl From<&BackoffSettings> for ConflictBackoff {
    fn from(settings: &BackoffSettings) -> Self {
        Self::default()
            .with_steps(settings.steps)
            .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_factor(settings.factor)
            .with_jitter(settings.jitter)
    }
}

/// Configuration for the finalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizerConfig {
    /// Finalizer this controller owns.
    pub finalizer: String,
    /// Seconds between fetches while waiting for deletion.
    pub poll_interval_secs: u64,
    /// Backoff between conflicting finalizer writes.
    pub conflict_backoff: BackoffSettings,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            finalizer: REGISTRY_FINALIZER.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            conflict_backoff: BackoffSettings::default(),
        }
    }
}

impl FinalizerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the document does not parse or fails validation.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| Error::invalid_config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&input)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_config(format!("TOML encode error: {e}")))
    }

    /// Check the configuration for values the finalizer cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("finalizer must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::invalid_config("poll_interval_secs must be positive"));
        }
        let backoff = &self.conflict_backoff;
        if backoff.steps == 0 {
            return Err(Error::invalid_config("conflict_backoff.steps must be positive"));
        }
        if !backoff.factor.is_finite() || backoff.factor < 1.0 {
            return Err(Error::invalid_config(
                "conflict_backoff.factor must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(Error::invalid_config(
                "conflict_backoff.jitter must be within [0, 1]",
            ));
        }
        Ok(())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> ConflictBackoff {
        ConflictBackoff::from(&self.conflict_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FinalizerConfig::default();
        assert_eq!(config.finalizer, REGISTRY_FINALIZER);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.backoff(), ConflictBackoff::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = FinalizerConfig::from_toml_str(
            r#"
            poll_interval_secs = 5

            [conflict_backoff]
            steps = 6
            "#,
        )?;
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.conflict_backoff.steps, 6);
        assert_eq!(config.conflict_backoff.initial_delay_ms, 10);
        assert_eq!(config.finalizer, REGISTRY_FINALIZER);
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            "finalizer = \"  \"",
            "poll_interval_secs = 0",
            "[conflict_backoff]\nsteps = 0",
            "[conflict_backoff]\nfactor = 0.5",
            "[conflict_backoff]\njitter = 2.0",
            "poll_interval_secs = \"three\"",
        ];
        for case in cases {
            let result = FinalizerConfig::from_toml_str(case);
            assert!(
                matches!(result, Err(Error::InvalidConfig { .. })),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_toml_round_trip() -> Result<()> {
        let config = FinalizerConfig {
            finalizer: "example.com/cleanup".into(),
            ..FinalizerConfig::default()
        };
        let parsed = FinalizerConfig::from_toml_str(&config.to_toml_string()?)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn test_from_file() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("finalizer.toml");
        std::fs::write(&path, "poll_interval_secs = 1\n")?;

        let config = FinalizerConfig::from_file(&path)?;
        assert_eq!(config.poll_interval_secs, 1);

        let missing = FinalizerConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::InvalidConfig { .. })));
        Ok(())
    }
}
