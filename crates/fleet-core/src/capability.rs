//! The uniform contract satisfied by real and simulated drone backends
//! This trait replaces duck-typed polymorphism between backend kinds with
//! an explicit contract: composition, not inheritance — a `DroneSupervisor` *has a* `Box<dyn DroneCapability>`.

use crate::errors::FleetError;
use crate::geometry::{Direction, Pose, RotateDirection, Velocity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeMode {
    /// Ascend/descend at a fixed vertical speed until the target is reached.
    Absolute,
    /// Move by a relative offset from the current altitude.
    Relative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub pose: Pose,
    pub velocity: Velocity,
    pub battery_pct: u8,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// The capability set every backend (real or simulated) implements. Every
/// operation is idempotent on terminal states where meaningful: `Connect`
/// on an already-connected backend is a no-op success, `Land` on a landed
/// backend is a no-op success.
#[async_trait]
pub trait DroneCapability: Send + Sync {
    async fn connect(&mut self) -> Result<(), FleetError>;
    async fn disconnect(&mut self) -> Result<(), FleetError>;
    async fn takeoff(&mut self) -> Result<(), FleetError>;
    async fn land(&mut self) -> Result<(), FleetError>;
    async fn emergency_stop(&mut self) -> Result<(), FleetError>;

    async fn move_direction(
        &mut self,
        direction: Direction,
        distance_cm: f64,
        speed_cmps: f64,
    ) -> Result<(), FleetError>;

    async fn rotate(
        &mut self,
        direction: RotateDirection,
        angle_deg: f64,
    ) -> Result<(), FleetError>;

    async fn set_altitude(
        &mut self,
        target_cm: f64,
        mode: AltitudeMode,
    ) -> Result<(), FleetError>;

    async fn get_telemetry(&mut self) -> Result<TelemetrySample, FleetError>;

    async fn capture_frame(&mut self) -> Result<Frame, FleetError>;
    async fn start_stream(&mut self) -> Result<(), FleetError>;
    async fn stop_stream(&mut self) -> Result<(), FleetError>;

    /// `true` for a `RealDrone`, `false` for a `SimulatedDrone` — used by
    /// status payloads (`mode_effective`) and logging, never for branching
    /// logic in the supervisor.
    fn is_real(&self) -> bool;
}
