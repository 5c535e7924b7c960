//! Runtime configuration from the environment (and an optional `.env`).

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{Error, Result};

const DEV_JWT_SECRET: &str = "rowkeeper-dev-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub log_format: LogFormat,
    /// Directory for a daily-rolling log file, in addition to stdout.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("rowkeeper_data"),
            bind: SocketAddr::from(([0, 0, 0, 0], 11111)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl_secs: 3600,
            log_format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// Load `.env` if present, then read `ROWKEEPER_*` variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(dir) = lookup("ROWKEEPER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = lookup("ROWKEEPER_BIND") {
            config.bind = bind
                .parse()
                .map_err(|e| Error::Config(format!("ROWKEEPER_BIND '{}': {}", bind, e)))?;
        }
        match lookup("ROWKEEPER_JWT_SECRET") {
            Some(secret) if secret.len() >= 16 => config.jwt_secret = secret,
            Some(_) => {
                return Err(Error::Config(
                    "ROWKEEPER_JWT_SECRET must be at least 16 characters".to_string(),
                ))
            }
            None => {}
        }
        if let Some(ttl) = lookup("ROWKEEPER_TOKEN_TTL_SECS") {
            config.token_ttl_secs = ttl
                .parse()
                .map_err(|e| Error::Config(format!("ROWKEEPER_TOKEN_TTL_SECS '{}': {}", ttl, e)))?;
        }
        if let Some(format) = lookup("ROWKEEPER_LOG_FORMAT") {
            config.log_format = match format.as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                other => {
                    return Err(Error::Config(format!(
                        "ROWKEEPER_LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                        other
                    )))
                }
            };
        }
        config.log_dir = lookup("ROWKEEPER_LOG_DIR").map(PathBuf::from);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind.port(), 11111);
        assert_eq!(config.token_ttl_secs, 3600);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ROWKEEPER_DATA_DIR", "/var/lib/rowkeeper"),
            ("ROWKEEPER_BIND", "127.0.0.1:8080"),
            ("ROWKEEPER_JWT_SECRET", "0123456789abcdef-secret"),
            ("ROWKEEPER_TOKEN_TTL_SECS", "60"),
            ("ROWKEEPER_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/rowkeeper"));
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.token_ttl_secs, 60);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("ROWKEEPER_BIND", "nowhere")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROWKEEPER_JWT_SECRET", "short")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROWKEEPER_LOG_FORMAT", "xml")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROWKEEPER_TOKEN_TTL_SECS", "-1")])).is_err());
    }
}
