//! Connection settings.
//!
//! [`ConnectionConfig`] is a flat record handed to [`Connection::connect`](crate::Connection::connect).
//! Applications can build it directly or load it from `config/database.toml`
//! and `QUARRY__*` environment variables with [`ConnectionConfig::load`].

use std::collections::BTreeMap;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{QuarryError, Result};

const SUPPORTED_DRIVERS: &[&str] = &["pgsql", "postgres", "postgresql"];

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Extra server settings, passed through as `-c key=value`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_driver() -> String {
    "pgsql".to_string()
}

fn default_charset() -> String {
    "utf8".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: String::new(),
            port: None,
            database: String::new(),
            charset: default_charset(),
            username: String::new(),
            password: String::new(),
            options: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Load the `database` section from `config/database.toml` (optional),
    /// overridden by `QUARRY__DATABASE__*` environment variables.
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("config/database.toml").required(false))
            .add_source(Environment::with_prefix("QUARRY").separator("__"))
            .build()
            .map_err(|e| QuarryError::Configuration(e.to_string()))?;

        let loaded: ConnectionConfig = settings
            .get("database")
            .map_err(|e| QuarryError::Configuration(format!("database section: {}", e)))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects records that cannot produce a connection.
    pub fn validate(&self) -> Result<()> {
        let driver = self.driver.to_ascii_lowercase();
        if !SUPPORTED_DRIVERS.contains(&driver.as_str()) {
            return Err(QuarryError::Configuration(format!(
                "unsupported driver `{}`",
                self.driver
            )));
        }
        let required = [
            ("host", &self.host),
            ("database", &self.database),
            ("username", &self.username),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(QuarryError::Configuration(format!("missing `{}`", field)));
            }
        }
        Ok(())
    }

    /// Server options in `-c key=value` form, charset first.
    pub fn server_options(&self) -> String {
        let mut parts = Vec::with_capacity(self.options.len() + 1);
        if !self.charset.is_empty() {
            parts.push(format!("-c client_encoding={}", self.charset));
        }
        for (key, value) in &self.options {
            parts.push(format!("-c {}={}", key, value));
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".to_string(),
            database: "shop".to_string(),
            username: "app".to_string(),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_validate_accepts_complete_record() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_host() {
        let config = ConnectionConfig {
            host: String::new(),
            ..valid()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, QuarryError::Configuration(msg) if msg.contains("host")));
    }

    #[test]
    fn test_validate_rejects_unknown_driver() {
        let config = ConnectionConfig {
            driver: "oracle".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(QuarryError::Configuration(_))
        ));
    }

    #[test]
    fn test_server_options() {
        let mut config = valid();
        config
            .options
            .insert("statement_timeout".to_string(), "5000".to_string());
        assert_eq!(
            config.server_options(),
            "-c client_encoding=utf8 -c statement_timeout=5000"
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"host": "db", "database": "shop", "username": "app"}"#,
        )
        .unwrap();
        assert_eq!(config.driver, "pgsql");
        assert_eq!(config.charset, "utf8");
        assert!(config.options.is_empty());
    }
}
