//! Layered configuration
//!
//! Settings come from built-in defaults, an optional TOML file, and
//! `REPOSE__<SECTION>__<KEY>` environment variables, in that order of
//! precedence (last wins).

use crate::errors::{ReposeError, Result};
use crate::logging_facility::Profile;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub foreign_keys: bool,
    /// SQLite journal mode (`wal`, `delete`, `memory`, ...)
    pub journal_mode: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repose.db"),
            foreign_keys: true,
            journal_mode: "wal".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSettings {
    pub profile: Profile,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Keep database snapshots in the persistence context until the next flush
    pub cache_database_snapshots: bool,
    /// Optimistic retries of the table-based identifier generator
    pub table_generator_max_retries: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cache_database_snapshots: true,
            table_generator_max_retries: 5,
        }
    }
}

impl Settings {
    /// Load settings, optionally from a TOML file that must exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("REPOSE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Settings>())
            .map_err(|e| ReposeError::Configuration {
                message: e.to_string(),
            })
    }

    /// Render the effective settings as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReposeError::Configuration {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.database.foreign_keys);
        assert!(settings.session.cache_database_snapshots);
        assert_eq!(settings.session.table_generator_max_retries, 5);
        assert_eq!(settings.logging.profile, Profile::Development);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[session]\ntable_generator_max_retries = 9").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.session.table_generator_max_retries, 9);
        assert!(settings.session.cache_database_snapshots);
        assert_eq!(settings.database.journal_mode, "wal");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut settings = Settings::default();
        settings.logging.profile = Profile::Production;
        settings.database.path = PathBuf::from("/tmp/x.db");

        let text = settings.to_toml().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let loaded = Settings::load(Some(file.path())).unwrap();
        assert_eq!(loaded.logging.profile, Profile::Production);
        assert_eq!(loaded.database.path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_missing_required_file_is_configuration_error() {
        let err = Settings::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ReposeError::Configuration { .. }));
    }
}
