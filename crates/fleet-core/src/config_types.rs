//! Plain data structures for the YAML config schema.
//!
//! Parsing and env-var overrides are I/O concerns that live in
//! `fleet-server::config::ConfigService`; this module only defines the
//! shape and the pure validation rules.

use crate::geometry::{FlightBounds, Pose};
use crate::ids::DroneId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneMode {
    Real,
    Simulation,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    3
}
fn default_scan_interval_secs() -> u64 {
    60
}

impl Default for AutoDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_timeout_secs(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub simulation_on_failure: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            simulation_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_mode")]
    pub default_mode: DroneMode,
    #[serde(default)]
    pub bounds: FlightBounds,
    #[serde(default)]
    pub auto_detection: AutoDetectionConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

fn default_mode() -> DroneMode {
    DroneMode::Simulation
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode(),
            bounds: FlightBounds::default(),
            auto_detection: AutoDetectionConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneSettings {
    #[serde(default = "default_max_altitude_cm")]
    pub max_altitude_cm: f64,
    #[serde(default = "default_speed_limit_cmps")]
    pub speed_limit_cmps: f64,
    #[serde(default = "default_battery_warning_pct")]
    pub battery_warning_pct: u8,
}

fn default_max_altitude_cm() -> f64 {
    500.0
}
fn default_speed_limit_cmps() -> f64 {
    100.0
}
fn default_battery_warning_pct() -> u8 {
    30
}

impl Default for DroneSettings {
    fn default() -> Self {
        Self {
            max_altitude_cm: default_max_altitude_cm(),
            speed_limit_cmps: default_speed_limit_cmps(),
            battery_warning_pct: default_battery_warning_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneConfigEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub mode: DroneMode,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub auto_detect: bool,
    #[serde(default)]
    pub initial_position: Pose,
    #[serde(default = "default_true")]
    pub fallback_to_simulation: bool,
    #[serde(default)]
    pub settings: DroneSettings,
}

impl DroneConfigEntry {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(e) = DroneId::parse(&self.id) {
            errors.push(format!("drones[]: {e}"));
        }
        if self.mode == DroneMode::Real && self.ip.is_none() && !self.auto_detect {
            errors.push(format!(
                "drones[{}]: mode=real requires either `ip` or `auto_detect=true`",
                self.id
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDiscoveryConfig {
    #[serde(default)]
    pub default_ips: Vec<String>,
    #[serde(default)]
    pub scan_ranges: Vec<String>,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_scan_hosts")]
    pub max_scan_hosts: usize,
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,
    #[serde(default = "default_scan_ttl_secs")]
    pub scan_ttl_secs: u64,
}

fn default_connection_timeout_secs() -> u64 {
    7
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    250
}
fn default_max_scan_hosts() -> usize {
    1024
}
fn default_scan_workers() -> usize {
    32
}
fn default_scan_ttl_secs() -> u64 {
    120
}

impl Default for NetworkDiscoveryConfig {
    fn default() -> Self {
        Self {
            default_ips: Vec::new(),
            scan_ranges: Vec::new(),
            connection_timeout_secs: default_connection_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_scan_hosts: default_max_scan_hosts(),
            scan_workers: default_scan_workers(),
            scan_ttl_secs: default_scan_ttl_secs(),
        }
    }
}

impl NetworkDiscoveryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.connection_timeout_secs == 0 {
            errors.push("network.connection_timeout_secs must be > 0".to_string());
        }
        if self.scan_workers == 0 {
            errors.push("network.scan_workers must be > 0".to_string());
        }
        if self.max_scan_hosts == 0 {
            errors.push("network.max_scan_hosts must be > 0".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIntervals {
    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_secs: f64,
}

fn default_telemetry_interval_secs() -> f64 {
    1.0
}

impl Default for UpdateIntervals {
    fn default() -> Self {
        Self {
            telemetry_secs: default_telemetry_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_battery_warning_pct")]
    pub battery_warning_pct: u8,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            battery_warning_pct: default_battery_warning_pct(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub update_intervals: UpdateIntervals,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl MonitoringConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.update_intervals.telemetry_secs <= 0.0 {
            errors.push("monitoring.update_intervals.telemetry_secs must be > 0".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadingConfig {
    #[serde(default = "default_worker_threads")]
    pub max_worker_threads: usize,
}

fn default_worker_threads() -> usize {
    4
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            max_worker_threads: default_worker_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfCacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    120
}

impl Default for PerfCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    #[serde(default = "default_overload_cooldown_secs")]
    pub overload_cooldown_secs: u64,
}

fn default_rate_limit_rps() -> u32 {
    10
}
fn default_overload_cooldown_secs() -> u64 {
    5
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: default_rate_limit_rps(),
            rate_limit_enabled: true,
            overload_cooldown_secs: default_overload_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub threading: ThreadingConfig,
    #[serde(default)]
    pub cache: PerfCacheConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub drones: Vec<DroneConfigEntry>,
    #[serde(default)]
    pub network: NetworkDiscoveryConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            drones: Vec::new(),
            network: NetworkDiscoveryConfig::default(),
            monitoring: MonitoringConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Run every validation rule, collecting *all* failures rather than
    /// stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.global.bounds.validate();
        errors.extend(self.network.validate());
        errors.extend(self.monitoring.validate());

        let mut seen = std::collections::HashSet::new();
        for drone in &self.drones {
            errors.extend(drone.validate());
            if !seen.insert(drone.id.clone()) {
                errors.push(format!("drones[]: duplicate drone id {:?}", drone.id));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FleetConfig::default().validate().is_empty());
    }

    #[test]
    fn rejects_duplicate_drone_ids() {
        let mut config = FleetConfig::default();
        let entry = DroneConfigEntry {
            id: "D1".to_string(),
            name: None,
            mode: DroneMode::Simulation,
            ip: None,
            auto_detect: false,
            initial_position: Pose::default(),
            fallback_to_simulation: true,
            settings: DroneSettings::default(),
        };
        config.drones.push(entry.clone());
        config.drones.push(entry);
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn real_mode_without_ip_or_autodetect_is_rejected() {
        let entry = DroneConfigEntry {
            id: "D2".to_string(),
            name: None,
            mode: DroneMode::Real,
            ip: None,
            auto_detect: false,
            initial_position: Pose::default(),
            fallback_to_simulation: true,
            settings: DroneSettings::default(),
        };
        assert!(!entry.validate().is_empty());
    }
}
