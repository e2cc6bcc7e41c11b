//! Root composition point: builds every collaborator once at startup
//! from the loaded config and hands out `Arc` handles, rather than
//! letting each module reach for its own process-wide global.

use crate::auth::{JwtAuthService, SharedAuthService};
use crate::config::EnvSettings;
use crate::discovery::NetworkDiscovery;
use crate::factory::DroneFactory;
use crate::router::CommandRouter;
use crate::supervisor::DroneSupervisor;
use crate::telemetry::TelemetryBroadcaster;
use crate::vision::{NoopVisionService, VisionService};
use dashmap::DashMap;
use fleet_core::config_types::DroneConfigEntry;
use fleet_core::{DroneId, FleetConfig, FleetError, SafetyConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything the HTTP, WebSocket, and MCP surfaces share. Constructed
/// once in `main` and passed around as `Arc<Services>`.
pub struct Services {
    pub config: FleetConfig,
    pub drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>>,
    pub router: Arc<CommandRouter>,
    pub discovery: Arc<NetworkDiscovery>,
    pub factory: Arc<DroneFactory>,
    pub telemetry: Arc<TelemetryBroadcaster>,
    pub auth: SharedAuthService,
    pub vision: Arc<dyn VisionService>,
    pub shutdown_tx: watch::Sender<bool>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Operator-triggered scan loop started via the REST
    /// `/api/system/auto-scan/*` routes, independent of the
    /// config-driven startup loop spawned by `spawn_background_loops`.
    auto_scan_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Services {
    /// Builds every collaborator and connects/creates every configured
    /// drone. A drone whose factory resolution hard-fails (real mode,
    /// unreachable, fallback disabled) aborts startup entirely — there is
    /// no "start with half a fleet" mode.
    pub async fn bootstrap(config: FleetConfig, env: EnvSettings) -> Result<Arc<Self>, FleetError> {
        let discovery = Arc::new(NetworkDiscovery::new(config.network.clone()));
        let factory = Arc::new(DroneFactory::new(
            Arc::clone(&discovery),
            Duration::from_secs(config.network.connection_timeout_secs),
        ));

        let drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>> = Arc::new(DashMap::new());
        for entry in &config.drones {
            let supervisor = build_supervisor(&factory, entry, &config).await?;
            drones.insert(supervisor.id.clone(), supervisor);
        }

        let vision: Arc<dyn VisionService> = Arc::new(NoopVisionService);
        let router = Arc::new(CommandRouter::new(Arc::clone(&drones), Arc::clone(&vision)));

        let telemetry_interval = Duration::from_secs_f64(config.monitoring.update_intervals.telemetry_secs);
        let telemetry = TelemetryBroadcaster::new(Arc::clone(&drones), telemetry_interval);

        let auth: SharedAuthService = Arc::new(JwtAuthService::new(
            env.jwt_secret.as_deref(),
            env.admin_username.clone(),
            env.admin_password.clone(),
        ));

        let (shutdown_tx, _rx) = watch::channel(false);

        info!(drones = drones.len(), "fleet services bootstrapped");

        Ok(Arc::new(Self {
            config,
            drones,
            router,
            discovery,
            factory,
            telemetry,
            auth,
            vision,
            shutdown_tx,
            started_at: chrono::Utc::now(),
            auto_scan_handle: tokio::sync::Mutex::new(None),
        }))
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Starts (or restarts, at a new interval) an operator-triggered
    /// discovery loop distinct from the config-driven one. Replacing a
    /// running handle aborts the previous loop.
    pub async fn start_auto_scan(self: &Arc<Self>, interval_secs: u64) {
        let discovery = Arc::clone(&self.discovery);
        let interval = Duration::from_secs(interval_secs.max(1));
        let shutdown = self.shutdown_receiver();
        let handle = tokio::spawn(async move {
            discovery.run_auto_scan_loop(interval, shutdown).await;
        });
        let mut guard = self.auto_scan_handle.lock().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_auto_scan(&self) -> bool {
        let mut guard = self.auto_scan_handle.lock().await;
        match guard.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Spawns the background loops (auto-scan, telemetry) that run for the
    /// life of the process.
    pub fn spawn_background_loops(self: &Arc<Self>) {
        if self.config.global.auto_detection.enabled {
            let discovery = Arc::clone(&self.discovery);
            let interval = Duration::from_secs(self.config.global.auto_detection.scan_interval_secs);
            let shutdown = self.shutdown_receiver();
            spawn_supervised_loop("discovery-auto-scan", move || {
                let discovery = Arc::clone(&discovery);
                let shutdown = shutdown.clone();
                async move { discovery.run_auto_scan_loop(interval, shutdown).await }
            });
        }

        let telemetry = Arc::clone(&self.telemetry);
        let shutdown = self.shutdown_receiver();
        spawn_supervised_loop("telemetry-broadcast", move || {
            let telemetry = Arc::clone(&telemetry);
            let shutdown = shutdown.clone();
            async move { telemetry.run(shutdown).await }
        });
    }

    /// Graceful shutdown sequence: stop accepting new work, cancel any
    /// in-flight discovery scan, land every flying drone within a fixed
    /// budget, then let adapters drop.
    pub async fn shutdown(&self) {
        info!("fleet services shutting down");
        let _ = self.shutdown_tx.send(true);

        let landings = self.drones.iter().map(|entry| {
            let supervisor = Arc::clone(entry.value());
            async move {
                let status = supervisor.status().await;
                if status.flight != fleet_core::state_machine::FlightState::Landed {
                    if let Err(err) = supervisor.land().await {
                        warn!(drone_id = %supervisor.id, error = %err, "failed to land during shutdown");
                    }
                }
            }
        });
        let budget = Duration::from_secs(10);
        if tokio::time::timeout(budget, futures::future::join_all(landings)).await.is_err() {
            warn!("shutdown landing sequence exceeded its 10s budget; proceeding anyway");
        }

        for entry in self.drones.iter() {
            let _ = entry.value().disconnect().await;
        }
        info!("fleet services shutdown complete");
    }
}

fn build_safety_config(entry: &DroneConfigEntry, global_bounds: fleet_core::FlightBounds) -> SafetyConfig {
    let mut safety = SafetyConfig {
        bounds: global_bounds,
        max_velocity_cmps: entry.settings.speed_limit_cmps,
        min_battery: entry.settings.battery_warning_pct,
        ..SafetyConfig::default()
    };
    if safety.emergency_battery >= safety.min_battery {
        safety.emergency_battery = safety.min_battery.saturating_sub(5);
    }
    safety
}

async fn build_supervisor(
    factory: &DroneFactory,
    entry: &DroneConfigEntry,
    config: &FleetConfig,
) -> Result<Arc<DroneSupervisor>, FleetError> {
    let id = DroneId::parse(entry.id.clone())
        .map_err(|e| FleetError::new(fleet_core::ErrorCode::MalformedId, e.to_string()))?;
    let result = factory.create(entry, config.global.bounds).await?;
    let safety = build_safety_config(entry, config.global.bounds);
    let is_real = result.capability.is_real();
    Ok(DroneSupervisor::new(
        id,
        result.capability,
        is_real,
        result.fallback_applied,
        safety,
        entry.settings.clone(),
        entry.initial_position,
    ))
}

/// Runs `make()` to completion, restarting it after a brief backoff if it
/// ends via a panic. A clean return (the loop observed `shutdown`) ends
/// the supervision entirely rather than restarting.
fn spawn_supervised_loop<F, Fut>(name: &'static str, mut make: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(make()).await {
                Ok(()) => return,
                Err(join_err) => {
                    warn!(loop_name = name, error = %join_err, "background loop panicked, restarting in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });
}
