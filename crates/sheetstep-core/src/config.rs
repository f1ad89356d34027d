//! Engine configuration
//!
//! Loaded from TOML, then optionally overridden from the environment:
//! - `SHEETSTEP_DEBOUNCE_MS` sets the default debounce window
//! - `SHEETSTEP_CHANNEL_TIMEOUT_MS` sets the kernel round-trip timeout

use crate::error::ConfigError;
use crate::types::StepType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Env var overriding [`EngineConfig::default_debounce_ms`]
pub const DEBOUNCE_ENV: &str = "SHEETSTEP_DEBOUNCE_MS";
/// Env var overriding [`EngineConfig::channel_timeout_ms`]
pub const CHANNEL_TIMEOUT_ENV: &str = "SHEETSTEP_CHANNEL_TIMEOUT_MS";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period before a live edit is sent
    pub default_debounce_ms: u64,
    /// Per step type debounce, keyed by wire name
    pub debounce_overrides: BTreeMap<String, u64>,
    /// Kernel round-trip timeout
    pub channel_timeout_ms: u64,
    /// Outbound request queue capacity
    pub channel_buffer: usize,
    /// Step id used when testing a single candidate import
    pub test_import_step_id: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default debounce window
    #[inline]
    #[must_use]
    pub fn with_default_debounce(mut self, debounce: Duration) -> Self {
        self.default_debounce_ms = duration_millis(debounce);
        self
    }

    /// With debounce window for one step type
    #[must_use]
    pub fn with_debounce_for(mut self, step_type: StepType, debounce: Duration) -> Self {
        self.debounce_overrides
            .insert(step_type.as_str().to_string(), duration_millis(debounce));
        self
    }

    /// With kernel round-trip timeout
    #[inline]
    #[must_use]
    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout_ms = duration_millis(timeout);
        self
    }

    /// Debounce window for a step type
    #[must_use]
    pub fn debounce_for(&self, step_type: StepType) -> Duration {
        let millis = self
            .debounce_overrides
            .get(step_type.as_str())
            .copied()
            .unwrap_or(self.default_debounce_ms);
        Duration::from_millis(millis)
    }

    #[inline]
    #[must_use]
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    /// Longest a due edit of `step_type` can take to settle: one debounce
    /// window plus one round trip
    #[must_use]
    pub fn settle_time(&self, step_type: StepType) -> Duration {
        self.debounce_for(step_type)
            .saturating_add(self.channel_timeout())
    }

    /// Parse and validate TOML
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(DEBOUNCE_ENV) {
            self.default_debounce_ms = parse_millis(DEBOUNCE_ENV, &value)?;
        }
        if let Some(value) = lookup(CHANNEL_TIMEOUT_ENV) {
            self.channel_timeout_ms = parse_millis(CHANNEL_TIMEOUT_ENV, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_timeout_ms == 0 {
            return Err(invalid("channel_timeout_ms", "0"));
        }
        if self.channel_buffer == 0 {
            return Err(invalid("channel_buffer", "0"));
        }
        if self.test_import_step_id.trim().is_empty() {
            return Err(invalid("test_import_step_id", &self.test_import_step_id));
        }
        for key in self.debounce_overrides.keys() {
            let known = serde_json::from_value::<StepType>(serde_json::Value::String(key.clone()));
            if known.is_err() {
                return Err(invalid("debounce_overrides", key));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_debounce_ms: 500,
            debounce_overrides: BTreeMap::from([(StepType::Graph.as_str().to_string(), 1_000)]),
            channel_timeout_ms: 30_000,
            channel_buffer: 64,
            test_import_step_id: "fake_id".to_string(),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_millis(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce_for(StepType::Pivot), Duration::from_millis(500));
        assert_eq!(config.debounce_for(StepType::Graph), Duration::from_millis(1_000));
        assert_eq!(config.channel_timeout(), Duration::from_secs(30));
        assert_eq!(config.test_import_step_id, "fake_id");
        config.validate().unwrap();
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            default_debounce_ms = 250

            [debounce_overrides]
            graph = 800
            melt = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.debounce_for(StepType::Pivot), Duration::from_millis(250));
        assert_eq!(config.debounce_for(StepType::Melt), Duration::from_millis(50));
        assert_eq!(config.channel_buffer, 64);
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let err = EngineConfig::from_toml_str("[debounce_overrides]\nsparkline = 10").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "debounce_overrides"
        ));
    }

    #[test]
    fn env_overrides() {
        let env = HashMap::from([
            (DEBOUNCE_ENV, "120".to_string()),
            (CHANNEL_TIMEOUT_ENV, "900".to_string()),
        ]);
        let config = EngineConfig::new()
            .with_overrides_from(|key| env.get(key).cloned())
            .unwrap();
        assert_eq!(config.default_debounce_ms, 120);
        assert_eq!(config.channel_timeout_ms, 900);

        let err = EngineConfig::new()
            .with_overrides_from(|key| (key == CHANNEL_TIMEOUT_ENV).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn settle_time_accepts_largest_env_values() {
        let config = EngineConfig::new()
            .with_overrides_from(|_| Some(u64::MAX.to_string()))
            .unwrap();
        let largest = Duration::from_millis(u64::MAX);
        assert_eq!(config.settle_time(StepType::Pivot), largest + largest);
        assert_eq!(
            EngineConfig::default().settle_time(StepType::Graph),
            Duration::from_millis(31_000)
        );
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = EngineConfig::new()
            .with_channel_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("channel_timeout_ms"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "channel_timeout_ms = 1500").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.channel_timeout_ms, 1_500);

        let missing = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
