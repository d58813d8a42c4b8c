use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file. `None` keeps the ledger in memory.
    pub database_path: Option<PathBuf>,
    /// How long a writer waits for the database lock before failing.
    pub busy_timeout_ms: u64,
    /// Number of reports kept in the report cache. 0 disables caching.
    pub report_cache_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5_000,
            report_cache_capacity: 256,
        }
    }
}

impl LedgerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.busy_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "busy_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(LedgerError::Config("database_path must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = LedgerConfig::from_json_str(r#"{ "report_cache_capacity": 8 }"#).unwrap();
        assert_eq!(config.report_cache_capacity, 8);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_zero_busy_timeout_rejected() {
        let err = LedgerConfig::from_json_str(r#"{ "busy_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = LedgerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, LedgerError::SerializationError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{ "database_path": "/var/lib/meters/ledger.db", "busy_timeout_ms": 250 }}"#
        )
        .unwrap();

        let config = LedgerConfig::from_json_file(&path).unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/meters/ledger.db"))
        );
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.report_cache_capacity, 256);
    }
}
