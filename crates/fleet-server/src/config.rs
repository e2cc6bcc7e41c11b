//! Config loading: YAML file into [`fleet_core::FleetConfig`], then
//! environment-variable overrides, then explicit validation producing
//! every failure rather than stopping at the first.

use fleet_core::config_types::DroneMode;
use fleet_core::FleetConfig;
use std::env;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config validation failed with {} error(s):\n  - {}", .0.len(), .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Authentication/runtime settings sourced purely from the environment,
/// kept separate from the YAML-backed [`FleetConfig`] (auth material
/// never belongs in a checked-in config file).
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub jwt_secret: Option<String>,
    pub admin_username: String,
    pub admin_password: Option<String>,
    pub log_level: String,
    pub max_worker_threads: Option<usize>,
    pub cache_ttl_secs: Option<u64>,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            admin_username: env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_worker_threads: env::var("MAX_WORKER_THREADS").ok().and_then(|s| s.parse().ok()),
            cache_ttl_secs: env::var("CACHE_TTL").ok().and_then(|s| s.parse().ok()),
        }
    }

    /// `JWT_SECRET` must be at least 32 characters and has no built-in
    /// default; callers that need auth must set it explicitly.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(secret) = &self.jwt_secret {
            if secret.len() < 32 {
                errors.push("JWT_SECRET must be at least 32 characters".to_string());
            }
        }
        errors
    }
}

/// Loads the YAML schema, applies env overrides, and validates. The single
/// entry point used by both `main.rs` and `--validate-config`.
pub struct ConfigService;

impl ConfigService {
    pub fn load(path: &Path) -> Result<(FleetConfig, EnvSettings), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: FleetConfig = serde_yaml::from_str(&raw)?;
        apply_env_overrides(&mut config);

        let env_settings = EnvSettings::from_env();

        let mut errors = config.validate();
        errors.extend(env_settings.validate());
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        Ok((config, env_settings))
    }

    /// Same as [`Self::load`] but tolerates a missing file, falling back
    /// to `FleetConfig::default()` — used for quick local runs and by
    /// tests that only care about env overrides.
    pub fn load_or_default(path: &Path) -> Result<(FleetConfig, EnvSettings), ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let mut config = FleetConfig::default();
        apply_env_overrides(&mut config);
        let env_settings = EnvSettings::from_env();
        let mut errors = config.validate();
        errors.extend(env_settings.validate());
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        Ok((config, env_settings))
    }
}

fn apply_env_overrides(config: &mut FleetConfig) {
    if let Ok(mode) = env::var("DRONE_MODE") {
        if let Some(parsed) = parse_drone_mode(&mode) {
            config.global.default_mode = parsed;
        }
    }
    if let Ok(raw) = env::var("TELLO_AUTO_DETECT") {
        if let Some(b) = parse_bool(&raw) {
            config.global.auto_detection.enabled = b;
        }
    }
    if let Ok(raw) = env::var("TELLO_CONNECTION_TIMEOUT") {
        if let Ok(secs) = raw.parse() {
            config.network.connection_timeout_secs = secs;
        }
    }
    if let Ok(raw) = env::var("NETWORK_SCAN_INTERVAL") {
        if let Ok(secs) = raw.parse() {
            config.global.auto_detection.scan_interval_secs = secs;
        }
    }
    if let Ok(raw) = env::var("MAX_WORKER_THREADS") {
        if let Ok(n) = raw.parse() {
            config.performance.threading.max_worker_threads = n;
        }
    }
    if let Ok(raw) = env::var("CACHE_TTL") {
        if let Ok(secs) = raw.parse() {
            config.network.scan_ttl_secs = secs;
            config.performance.cache.ttl_secs = secs;
        }
    }
}

fn parse_drone_mode(raw: &str) -> Option<DroneMode> {
    match raw.to_ascii_lowercase().as_str() {
        "simulation" | "sim" => Some(DroneMode::Simulation),
        "real" => Some(DroneMode::Real),
        "auto" => Some(DroneMode::Auto),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_jwt_secret_is_rejected() {
        let settings = EnvSettings {
            jwt_secret: Some("too-short".to_string()),
            admin_username: "admin".to_string(),
            admin_password: None,
            log_level: "info".to_string(),
            max_worker_threads: None,
            cache_ttl_secs: None,
        };
        assert!(!settings.validate().is_empty());
    }

    #[test]
    fn missing_jwt_secret_is_fine() {
        let settings = EnvSettings {
            jwt_secret: None,
            admin_username: "admin".to_string(),
            admin_password: None,
            log_level: "info".to_string(),
            max_worker_threads: None,
            cache_ttl_secs: None,
        };
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn load_or_default_works_without_a_file() {
        let (config, _) = ConfigService::load_or_default(Path::new("/nonexistent/path.yaml")).unwrap();
        assert!(config.drones.is_empty());
    }
}
