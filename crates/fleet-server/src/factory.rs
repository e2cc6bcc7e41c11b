//! Resolves a drone's configured mode into a concrete
//! [`fleet_core::DroneCapability`] backend.
//!
//! The factory never caches or owns the backend past construction —
//! `DroneSupervisor` owns its lifetime from here on. Every call either
//! returns a working capability or a [`FleetError`]; silent failure is
//! never an option; a configured fallback is always recorded in the
//! result so callers/logs can tell a real connection from a
//! degraded one.

use crate::backend::{RealDroneAdapter, RealDroneAdapterConfig, SimulatedDroneAdapter, SimulatedDroneAdapterConfig};
use crate::discovery::NetworkDiscovery;
use fleet_core::config_types::{DroneConfigEntry, DroneMode};
use fleet_core::{DroneCapability, ErrorCode, FleetError, FlightBounds};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct FactoryResult {
    pub capability: Box<dyn DroneCapability>,
    pub fallback_applied: bool,
}

pub struct DroneFactory {
    discovery: Arc<NetworkDiscovery>,
    connection_timeout: Duration,
}

impl DroneFactory {
    pub fn new(discovery: Arc<NetworkDiscovery>, connection_timeout: Duration) -> Self {
        Self {
            discovery,
            connection_timeout,
        }
    }

    pub async fn create(
        &self,
        entry: &DroneConfigEntry,
        bounds: FlightBounds,
    ) -> Result<FactoryResult, FleetError> {
        match entry.mode {
            DroneMode::Simulation => Ok(FactoryResult {
                capability: Box::new(self.build_simulated(entry, bounds)),
                fallback_applied: false,
            }),
            DroneMode::Real => self.create_real(entry, bounds).await,
            DroneMode::Auto => self.create_auto(entry, bounds).await,
        }
    }

    fn build_simulated(&self, entry: &DroneConfigEntry, bounds: FlightBounds) -> SimulatedDroneAdapter {
        SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig {
            initial_pose: entry.initial_position,
            bounds,
            max_velocity_cmps: entry.settings.speed_limit_cmps,
            ..SimulatedDroneAdapterConfig::default()
        })
    }

    async fn resolve_ip(&self, entry: &DroneConfigEntry) -> Option<String> {
        if let Some(ip) = &entry.ip {
            return Some(ip.clone());
        }
        if entry.auto_detect {
            if let Some(detected) = self.discovery.first_available() {
                return Some(detected.ip);
            }
            let scanned = self.discovery.scan(false).await;
            return scanned.into_iter().next().map(|d| d.ip);
        }
        None
    }

    async fn try_connect_real(&self, ip: String) -> Result<RealDroneAdapter, FleetError> {
        let mut adapter = RealDroneAdapter::new(RealDroneAdapterConfig {
            ip,
            command_timeout: self.connection_timeout,
            ..RealDroneAdapterConfig::default()
        })?;
        adapter.connect().await?;
        Ok(adapter)
    }

    async fn create_real(
        &self,
        entry: &DroneConfigEntry,
        bounds: FlightBounds,
    ) -> Result<FactoryResult, FleetError> {
        let Some(ip) = self.resolve_ip(entry).await else {
            return self.fallback_or_error(entry, bounds, "no IP configured and auto-detect found nothing");
        };

        match self.try_connect_real(ip.clone()).await {
            Ok(adapter) => {
                info!(drone_id = %entry.id, %ip, "connected to real drone");
                Ok(FactoryResult {
                    capability: Box::new(adapter),
                    fallback_applied: false,
                })
            }
            Err(err) => {
                warn!(drone_id = %entry.id, %ip, error = %err, "failed to reach real drone");
                self.fallback_or_error(entry, bounds, "real drone unreachable")
            }
        }
    }

    /// `auto` never hard-fails: an unreachable or absent real drone always
    /// falls back to simulation, regardless of `fallback_to_simulation`.
    async fn create_auto(
        &self,
        entry: &DroneConfigEntry,
        bounds: FlightBounds,
    ) -> Result<FactoryResult, FleetError> {
        if let Some(ip) = self.resolve_ip(entry).await {
            if let Ok(adapter) = self.try_connect_real(ip.clone()).await {
                info!(drone_id = %entry.id, %ip, "auto mode resolved to real drone");
                return Ok(FactoryResult {
                    capability: Box::new(adapter),
                    fallback_applied: false,
                });
            }
            warn!(drone_id = %entry.id, %ip, "auto mode could not reach real drone, falling back to simulation");
        } else {
            info!(drone_id = %entry.id, "auto mode found no real drone, falling back to simulation");
        }
        Ok(FactoryResult {
            capability: Box::new(self.build_simulated(entry, bounds)),
            fallback_applied: true,
        })
    }

    fn fallback_or_error(
        &self,
        entry: &DroneConfigEntry,
        bounds: FlightBounds,
        reason: &str,
    ) -> Result<FactoryResult, FleetError> {
        if entry.fallback_to_simulation {
            warn!(drone_id = %entry.id, reason, "falling back to simulation");
            Ok(FactoryResult {
                capability: Box::new(self.build_simulated(entry, bounds)),
                fallback_applied: true,
            })
        } else {
            Err(FleetError::new(
                ErrorCode::Unreachable,
                format!("drone {}: {reason}, and fallback_to_simulation is disabled", entry.id),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::config_types::{DroneSettings, NetworkDiscoveryConfig};
    use fleet_core::Pose;

    fn entry(mode: DroneMode, ip: Option<&str>, fallback: bool) -> DroneConfigEntry {
        DroneConfigEntry {
            id: "D1".to_string(),
            name: None,
            mode,
            ip: ip.map(String::from),
            auto_detect: false,
            initial_position: Pose::default(),
            fallback_to_simulation: fallback,
            settings: DroneSettings::default(),
        }
    }

    #[tokio::test]
    async fn simulation_mode_never_touches_the_network() {
        let discovery = Arc::new(NetworkDiscovery::new(NetworkDiscoveryConfig::default()));
        let factory = DroneFactory::new(discovery, Duration::from_millis(50));
        let result = factory
            .create(&entry(DroneMode::Simulation, None, false), FlightBounds::default())
            .await
            .unwrap();
        assert!(!result.capability.is_real());
        assert!(!result.fallback_applied);
    }

    #[tokio::test]
    async fn real_mode_without_ip_and_without_fallback_errors() {
        let discovery = Arc::new(NetworkDiscovery::new(NetworkDiscoveryConfig::default()));
        let factory = DroneFactory::new(discovery, Duration::from_millis(50));
        let result = factory
            .create(&entry(DroneMode::Real, None, false), FlightBounds::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn real_mode_without_ip_falls_back_when_allowed() {
        let discovery = Arc::new(NetworkDiscovery::new(NetworkDiscoveryConfig::default()));
        let factory = DroneFactory::new(discovery, Duration::from_millis(50));
        let result = factory
            .create(&entry(DroneMode::Real, None, true), FlightBounds::default())
            .await
            .unwrap();
        assert!(!result.capability.is_real());
        assert!(result.fallback_applied);
    }

    #[tokio::test]
    async fn auto_mode_with_unreachable_ip_falls_back_to_simulation() {
        let discovery = Arc::new(NetworkDiscovery::new(NetworkDiscoveryConfig::default()));
        let factory = DroneFactory::new(discovery, Duration::from_millis(50));
        let result = factory
            .create(
                &entry(DroneMode::Auto, Some("203.0.113.1"), false),
                FlightBounds::default(),
            )
            .await
            .unwrap();
        assert!(!result.capability.is_real());
        assert!(result.fallback_applied);
    }
}
