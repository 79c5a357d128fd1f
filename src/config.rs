//! Configuration module for pulsewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::db::Target;
use crate::recorder::RecorderConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read seed file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse seed file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "pulsewatch.db")
    pub db_path: String,
    /// Hour offset for timestamps shown to users (default: 0)
    pub timezone: f32,
    /// Whether alert hooks fire (default: true)
    pub notifications: bool,
    /// JSON file of targets imported into an empty store
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "pulsewatch.db".to_string(),
            timezone: 0.0,
            notifications: true,
            seed_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEWATCH_DB_PATH`: Database file path (default: "pulsewatch.db")
    /// - `PULSEWATCH_TIMEZONE`: Hour offset, e.g. `-5` or `5.5` (default: 0)
    /// - `PULSEWATCH_NOTIFICATIONS`: `true`, `false`, `1` or `0` (default: true)
    /// - `PULSEWATCH_SEED`: Path to a JSON array of targets
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(db_path) = lookup("PULSEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(tz) = lookup("PULSEWATCH_TIMEZONE") {
            match tz.trim().parse() {
                Ok(tz) => cfg.timezone = tz,
                Err(_) => tracing::warn!("Ignoring invalid PULSEWATCH_TIMEZONE '{}'", tz),
            }
        }

        if let Some(flag) = lookup("PULSEWATCH_NOTIFICATIONS") {
            match parse_flag(&flag) {
                Some(enabled) => cfg.notifications = enabled,
                None => tracing::warn!("Ignoring invalid PULSEWATCH_NOTIFICATIONS '{}'", flag),
            }
        }

        if let Some(seed) = lookup("PULSEWATCH_SEED") {
            if !seed.trim().is_empty() {
                cfg.seed_path = Some(PathBuf::from(seed));
            }
        }

        cfg
    }

    pub fn recorder(&self) -> RecorderConfig {
        RecorderConfig {
            timezone: self.timezone,
            notifications: self.notifications,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Read a JSON array of targets.
pub fn load_seed(path: &Path) -> Result<Vec<Target>, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProtocolKind;
    use std::collections::HashMap;
    use std::io::Write;

    fn from_vars(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.db_path, "pulsewatch.db");
        assert_eq!(cfg.timezone, 0.0);
        assert!(cfg.notifications);
        assert!(cfg.seed_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = from_vars(&[
            ("PULSEWATCH_DB_PATH", "/var/lib/pulsewatch/data.db"),
            ("PULSEWATCH_TIMEZONE", "-3.5"),
            ("PULSEWATCH_NOTIFICATIONS", "0"),
            ("PULSEWATCH_SEED", "targets.json"),
        ]);
        assert_eq!(cfg.db_path, "/var/lib/pulsewatch/data.db");
        assert_eq!(cfg.timezone, -3.5);
        assert!(!cfg.notifications);
        assert_eq!(cfg.seed_path, Some(PathBuf::from("targets.json")));

        let recorder = cfg.recorder();
        assert_eq!(recorder.timezone, -3.5);
        assert!(!recorder.notifications);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = from_vars(&[
            ("PULSEWATCH_TIMEZONE", "CET"),
            ("PULSEWATCH_NOTIFICATIONS", "maybe"),
            ("PULSEWATCH_SEED", "  "),
        ]);
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("off"), None);
    }

    #[test]
    fn test_load_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"name": "site", "kind": "http", "address": "https://example.com", "expected": "Example"}},
                {{"name": "dns", "kind": "udp", "address": "1.1.1.1", "port": 53, "interval": 30}}
            ]"#
        )
        .unwrap();

        let targets = load_seed(file.path()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].kind, ProtocolKind::Http);
        assert_eq!(targets[0].expected.as_deref(), Some("Example"));
        assert_eq!(targets[1].port, Some(53));
        assert_eq!(targets[1].interval, 30);
    }

    #[test]
    fn test_load_seed_errors() {
        let missing = load_seed(Path::new("/nonexistent/pulsewatch-seed.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let bad = load_seed(file.path()).unwrap_err();
        assert!(matches!(bad, ConfigError::Parse { .. }));
    }
}
