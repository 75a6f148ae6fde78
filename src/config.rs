//! Runtime configuration read from the environment (and `.env` via dotenvy).

use serde::Serialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database: DatabaseConfig,
    /// Reference lookups (names for conflict reports) are cached this long
    pub lookup_cache_ttl: Duration,
    pub lookup_cache_capacity: u64,
    /// Suspended contracts still block overlapping claims
    pub conflicts_include_suspended: bool,
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database: DatabaseConfig {
                url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
                run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", true)?,
            },
            lookup_cache_ttl: Duration::from_secs(parse_or(&lookup, "LOOKUP_CACHE_TTL_SECS", 300)?),
            lookup_cache_capacity: parse_or(&lookup, "LOOKUP_CACHE_CAPACITY", 10_000)?,
            conflicts_include_suspended: parse_or(&lookup, "CONFLICTS_INCLUDE_SUSPENDED", false)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let vars = env(&[("DATABASE_URL", "postgres://localhost/contracts")]);
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.database.run_migrations);
        assert_eq!(config.lookup_cache_ttl, Duration::from_secs(300));
        assert!(!config.conflicts_include_suspended);
    }

    #[test]
    fn test_overrides_and_errors() {
        let vars = env(&[
            ("DATABASE_URL", "postgres://db/contracts"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("CONFLICTS_INCLUDE_SUSPENDED", "true"),
            ("LOOKUP_CACHE_TTL_SECS", "30"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(config.conflicts_include_suspended);
        assert_eq!(config.lookup_cache_ttl, Duration::from_secs(30));

        let missing = Config::from_lookup(|_| None).unwrap_err();
        assert!(matches!(missing, ConfigError::Missing("DATABASE_URL")));

        let vars = env(&[("DATABASE_URL", "x"), ("DATABASE_MAX_CONNECTIONS", "many")]);
        let invalid = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert_eq!(
            invalid.to_string(),
            "DATABASE_MAX_CONNECTIONS has invalid value 'many'"
        );
    }
}
