// config.rs - Engine Configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::observability::{TracingConfig, TracingFormat};

/// Environment variable prefix, e.g. `RPC_CONFORMANCE__CLOSED_RETENTION=64`
pub const ENV_PREFIX: &str = "RPC_CONFORMANCE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Closed sessions kept for late observers (0 = none)
    pub closed_retention: usize,

    /// Abort sessions that are still open after this many seconds
    pub session_timeout_secs: Option<u64>,

    /// How often the reaper looks for expired sessions
    pub reaper_interval_secs: u64,

    /// Log filter (e.g., "info", "rpc_conformance=debug")
    pub log_filter: String,

    /// Log output format
    pub log_format: TracingFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            closed_retention: 1024,
            session_timeout_secs: None,
            reaper_interval_secs: 5,
            log_filter: "warn".into(),
            log_format: TracingFormat::Pretty,
        }
    }
}

impl EngineConfig {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: EngineConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reaper_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Tracing settings derived from the log fields
    pub fn tracing(&self) -> TracingConfig {
        TracingConfig {
            filter: self.log_filter.clone(),
            with_ansi: !matches!(self.log_format, TracingFormat::Json),
            format: self.log_format.clone(),
            ..Default::default()
        }
    }

    /// Tracing settings with command-line overrides applied
    ///
    /// A level replaces `log_filter`; a format replaces `log_format`.
    pub fn tracing_with(
        &self,
        level: Option<&str>,
        format: Option<TracingFormat>,
    ) -> TracingConfig {
        let format = format.unwrap_or_else(|| self.log_format.clone());
        match level {
            Some(level) => TracingConfig::for_level(level, format),
            None => TracingConfig {
                with_ansi: format != TracingFormat::Json,
                format,
                ..self.tracing()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.closed_retention, 1024);
        assert_eq!(config.session_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "closed_retention = 16\nsession_timeout_secs = 30\nlog_format = \"json\""
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.closed_retention, 16);
        assert_eq!(config.session_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.log_format, TracingFormat::Json);
        assert_eq!(config.reaper_interval_secs, 5);
        assert!(!config.tracing().with_ansi);
    }

    #[test]
    fn test_rejects_zero_reaper_interval() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"reaper_interval_secs": 0}}"#).unwrap();

        let err = EngineConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            EngineConfig::load(Some(&missing)),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_file_log_settings_reach_tracing() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "log_filter = \"rpc_conformance=trace\"\nlog_format = \"compact\""
        )
        .unwrap();
        let config = EngineConfig::load(Some(file.path())).unwrap();

        let tracing = config.tracing_with(None, None);
        assert_eq!(tracing.filter, "rpc_conformance=trace");
        assert_eq!(tracing.format, TracingFormat::Compact);

        let tracing = config.tracing_with(None, Some(TracingFormat::Json));
        assert_eq!(tracing.filter, "rpc_conformance=trace");
        assert!(!tracing.with_ansi);

        let tracing = config.tracing_with(Some("debug"), None);
        assert_eq!(tracing.filter, "debug,rpc_conformance=debug");
        assert_eq!(tracing.format, TracingFormat::Compact);
    }
}
