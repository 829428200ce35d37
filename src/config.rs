//! Configuration management.
//!
//! Loads a base [`RuntimeConfig`] from an optional TOML file, then applies
//! environment-variable overrides (SPEC_FULL.md §6). Fields are validated
//! eagerly so a misconfigured deployment fails at startup, not mid-request.

use crate::types::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub bind_address: String,
    pub port: u16,
    pub concurrency_cap: usize,
    pub ring_capacity: usize,
    pub working_memory_capacity: usize,
    pub pattern_cache_ttl_secs: u64,
    pub quality_threshold: f32,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub admin_user: Option<String>,
    #[serde(skip_serializing)]
    pub admin_password: Option<String>,
    pub guest_user: Option<String>,
    #[serde(skip_serializing)]
    pub guest_password: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            concurrency_cap: 5,
            ring_capacity: 2000,
            working_memory_capacity: 20,
            pattern_cache_ttl_secs: 300,
            quality_threshold: 0.6,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            log_level: "info".to_string(),
            auth: AuthConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file if present, then layer environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| ConfigError::ParseError(e.to_string()))?;
                toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RUNTIME_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Ok(v) = std::env::var("RUNTIME_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("RUNTIME_CORS_ORIGINS") {
            self.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("RUNTIME_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("RUNTIME_CONCURRENCY_CAP") {
            if let Ok(n) = v.parse() {
                self.concurrency_cap = n;
            }
        }
        if let Ok(v) = std::env::var("RUNTIME_RING_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.ring_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("RUNTIME_QUALITY_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.quality_threshold = n;
            }
        }
        self.auth.admin_user = std::env::var("AUTH_ADMIN_USER").ok();
        self.auth.admin_password = std::env::var("AUTH_ADMIN_PASSWORD").ok();
        self.auth.guest_user = std::env::var("AUTH_GUEST_USER").ok();
        self.auth.guest_password = std::env::var("AUTH_GUEST_PASSWORD").ok();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_cap == 0 {
            return Err(ConfigError::InvalidValue {
                key: "concurrency_cap".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "quality_threshold".into(),
                reason: "must be within [0, 1]".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.concurrency_cap, 5);
        assert_eq!(cfg.ring_capacity, 2000);
        assert_eq!(cfg.working_memory_capacity, 20);
        assert!((cfg.quality_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_zero_concurrency_cap() {
        let mut cfg = RuntimeConfig::default();
        cfg.concurrency_cap = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_quality_threshold() {
        let mut cfg = RuntimeConfig::default();
        cfg.quality_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
