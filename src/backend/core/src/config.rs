//! Configuration management.

use serde::Deserialize;

use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Tenancy configuration
    #[serde(default)]
    pub tenancy: TenancyConfig,
}

impl Config {
    /// Load configuration from `config.toml` (optional) layered with
    /// `UPKEEP__`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("UPKEEP").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

/// Tenant resolution settings for the enforcement middleware.
#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    /// Base domain that organization subdomains hang off
    /// (e.g. `upkeep.app` for `acme.upkeep.app`).
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logging() -> bool {
    true
}

fn default_base_domain() -> String {
    "upkeep.app".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenancy_defaults() {
        let tenancy = TenancyConfig::default();
        assert_eq!(tenancy.base_domain, "upkeep.app");
    }

    #[test]
    fn test_observability_defaults() {
        let obs = ObservabilityConfig::default();
        assert_eq!(obs.log_level, "info");
        assert!(obs.json_logging);
    }
}
