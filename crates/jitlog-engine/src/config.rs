//! Engine configuration (jitlog.toml)
//!
//! Every field is optional; a missing file means defaults throughout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builder::BuilderOptions;
use crate::history::DEFAULT_PENDING_CAPACITY;
use crate::schema::{SchemaError, SchemaOverrides, SchemaTable};

/// File looked up in the working directory when no path is given.
pub const CONFIG_FILE: &str = "jitlog.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Invalid schema override: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Runtime events held while waiting for their task.
    pub deopt_buffer_capacity: usize,

    /// Keep parsed assembly listings on nmethods.
    pub retain_assembly: bool,

    pub follow: FollowConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            deopt_buffer_capacity: DEFAULT_PENDING_CAPACITY,
            retain_assembly: true,
            follow: FollowConfig::default(),
            schema: None,
        }
    }
}

/// Settings for tailing a log that is still being written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    pub poll_interval_ms: u64,
    /// Give up after this long without new data. Unset waits until cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for FollowConfig {
    fn default() -> Self {
        FollowConfig {
            poll_interval_ms: 200,
            idle_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given, else `jitlog.toml` in `dir` if present, else defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading config");
            return Self::from_file(&candidate);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.follow.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "follow.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        // Surface bad overrides at load time rather than on first parse.
        self.schema_table()?;
        Ok(())
    }

    /// Built-in decoding table with any `[schema]` overrides applied.
    pub fn schema_table(&self) -> Result<SchemaTable, ConfigError> {
        match self.schema {
            Some(ref overrides) => Ok(SchemaTable::builtin().with_overrides(overrides)?),
            None => Ok(SchemaTable::builtin().clone()),
        }
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            retain_assembly: self.retain_assembly,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.follow.poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.follow.idle_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EventKind, Role};

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(EngineConfig::parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = EngineConfig::parse(
            r#"
deopt_buffer_capacity = 16
retain_assembly = false

[follow]
poll_interval_ms = 50
idle_timeout_ms = 2000

[schema]
version = "hotspot-1+local"

[schema.tags.inline_fail_v2]
kind = "inline_fail"
attributes = { why = "reason" }
"#,
        )
        .unwrap();
        assert_eq!(config.deopt_buffer_capacity, 16);
        assert!(!config.builder_options().retain_assembly);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(2)));

        let table = config.schema_table().unwrap();
        assert_eq!(table.version(), "hotspot-1+local");
        assert_eq!(table.kind_of("inline_fail_v2"), Some(EventKind::InlineFail));
        assert_eq!(table.role("inline_fail_v2", "why"), Some(Role::Reason));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let err = EngineConfig::parse(
            r#"
[schema.tags.brand_new]
attributes = { x = "reason" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Schema(SchemaError::MissingKind(_))));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = EngineConfig::parse("[follow]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_prefers_file_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(EngineConfig::load(None, dir.path()).unwrap(), EngineConfig::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "deopt_buffer_capacity = 3\n").unwrap();
        assert_eq!(EngineConfig::load(None, dir.path()).unwrap().deopt_buffer_capacity, 3);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            EngineConfig::load(Some(&missing), dir.path()),
            Err(ConfigError::IoError { .. })
        ));
    }
}
