//! Per-drone supervisor: owns the capability backend, runs the safety
//! pipeline in front of every operation, drives the connection/flight
//! state machine, and hosts long-running tasks (altitude hold, waypoint
//! plans, tracking holds).
//!
//! Every public method follows the same pipeline: pre-check (state +
//! parameter bounds) -> path check (flight-bounds containment along the
//! segment) -> dispatch with a per-operation timeout -> post-update
//! (refresh telemetry, advance the state machine, emit an event). A
//! rejection at any stage is recorded in the bounded violation ring
//! buffer and never reaches the backend.

use crate::vision::VisionService;
use fleet_core::config_types::DroneSettings;
use fleet_core::state_machine::{next_state, ConnectionState, FlightState, Operation, StateSnapshot};
use fleet_core::{
    AltitudeMode, Direction, DroneCapability, DroneId, ErrorCode, FleetError, Pose, RotateDirection,
    SafetyConfig, SafetyViolation, Severity, TaskKind, TaskRecord, TaskStatus, Velocity, Waypoint,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const TAKEOFF_TIMEOUT: Duration = Duration::from_secs(15);
pub const LAND_TIMEOUT: Duration = Duration::from_secs(15);
pub const MOVE_TIMEOUT: Duration = Duration::from_secs(30);
pub const ROTATE_TIMEOUT: Duration = Duration::from_secs(10);
pub const EMERGENCY_DEADLINE: Duration = Duration::from_millis(500);

const MIN_MOVE_CM: f64 = 1.0;
const MAX_MOVE_CM: f64 = 500.0;
const MIN_ROTATE_DEG: f64 = 1.0;
const MAX_ROTATE_DEG: f64 = 360.0;
const MIN_ALTITUDE_CM: f64 = 20.0;
const MAX_ALTITUDE_CM: f64 = 500.0;
const PATH_CHECK_STEP_CM: f64 = 10.0;
const ALTITUDE_HOLD_TOLERANCE_CM: f64 = 5.0;
const ALTITUDE_HOLD_TIMEOUT: Duration = Duration::from_secs(30);
const TRACKING_POLL_INTERVAL: Duration = Duration::from_millis(100);
const TRACKING_MAX_EMPTY_FRAMES: u32 = 30;
const TRACKING_STEP_CM: f64 = 20.0;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DroneStatus {
    pub id: DroneId,
    pub is_real: bool,
    pub fallback_applied: bool,
    pub connection: ConnectionState,
    pub flight: FlightState,
    pub pose: Pose,
    pub velocity: Velocity,
    pub battery_pct: u8,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub active_task: Option<TaskRecord>,
    pub recent_violations: Vec<SafetyViolation>,
    /// Seconds since the current continuous flight began, or `None` when
    /// landed. Tello's own `flight_time` query works the same way.
    pub flight_time_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum DroneEvent {
    StateChanged {
        drone_id: DroneId,
        connection: ConnectionState,
        flight: FlightState,
    },
    SafetyViolation {
        drone_id: DroneId,
        violation: SafetyViolation,
    },
    TaskCompleted {
        drone_id: DroneId,
        task_id: String,
        status: TaskStatus,
    },
}

struct Inner {
    state: StateSnapshot,
    pose: Pose,
    velocity: Velocity,
    battery_pct: u8,
    last_seen: chrono::DateTime<chrono::Utc>,
    active_task: Option<TaskRecord>,
    violations: fleet_core::safety::ViolationRingBuffer,
    flight_started_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Owns one drone end-to-end. Cheap to clone (`Arc`-wrapped by callers);
/// the capability mutex is the single serialization point for commands
/// against the backend.
pub struct DroneSupervisor {
    pub id: DroneId,
    pub is_real: bool,
    pub fallback_applied: bool,
    capability: Mutex<Box<dyn DroneCapability>>,
    inner: RwLock<Inner>,
    safety: SafetyConfig,
    settings: DroneSettings,
    events: broadcast::Sender<DroneEvent>,
    task_cancel: AtomicBool,
}

impl DroneSupervisor {
    pub fn new(
        id: DroneId,
        capability: Box<dyn DroneCapability>,
        is_real: bool,
        fallback_applied: bool,
        safety: SafetyConfig,
        settings: DroneSettings,
        initial_pose: Pose,
    ) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(128);
        Arc::new(Self {
            id,
            is_real,
            fallback_applied,
            capability: Mutex::new(capability),
            inner: RwLock::new(Inner {
                state: StateSnapshot::landed_disconnected(),
                pose: initial_pose,
                velocity: Velocity::default(),
                battery_pct: 100,
                last_seen: chrono::Utc::now(),
                active_task: None,
                violations: fleet_core::safety::ViolationRingBuffer::new(50),
                flight_started_at: None,
            }),
            safety,
            settings,
            events: tx,
            task_cancel: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DroneEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> DroneStatus {
        let inner = self.inner.read().await;
        DroneStatus {
            id: self.id.clone(),
            is_real: self.is_real,
            fallback_applied: self.fallback_applied,
            connection: inner.state.connection,
            flight: inner.state.flight,
            pose: inner.pose,
            velocity: inner.velocity,
            battery_pct: inner.battery_pct,
            last_seen: inner.last_seen,
            active_task: inner.active_task.clone(),
            recent_violations: inner.violations.as_vec(),
            flight_time_secs: inner
                .flight_started_at
                .map(|started| (chrono::Utc::now() - started).num_milliseconds() as f64 / 1000.0),
        }
    }

    async fn record_violation(&self, code: ErrorCode, severity: Severity, detail: impl Into<String>) {
        let violation = SafetyViolation::new(code, severity, detail);
        {
            let mut inner = self.inner.write().await;
            inner.violations.push(violation.clone());
        }
        let _ = self.events.send(DroneEvent::SafetyViolation {
            drone_id: self.id.clone(),
            violation,
        });
    }

    async fn transition(&self, op: Operation) -> Result<(), FleetError> {
        let mut inner = self.inner.write().await;
        match next_state(inner.state, op) {
            Some(next) => {
                let previous_flight = inner.state.flight;
                inner.state = next;
                match (previous_flight, next.flight) {
                    (prev, FlightState::Flying) if prev != FlightState::Flying => {
                        inner.flight_started_at = Some(chrono::Utc::now());
                    }
                    (FlightState::Flying, FlightState::Landed) => {
                        inner.flight_started_at = None;
                    }
                    _ => {}
                }
                let (connection, flight) = (next.connection, next.flight);
                drop(inner);
                let _ = self.events.send(DroneEvent::StateChanged {
                    drone_id: self.id.clone(),
                    connection,
                    flight,
                });
                Ok(())
            }
            None => {
                let snapshot = inner.state;
                drop(inner);
                Err(FleetError::new(
                    ErrorCode::InvalidTransition,
                    format!("{op:?} is not valid from {snapshot:?}"),
                ))
            }
        }
    }

    async fn check_battery_floor(&self) -> Result<(), FleetError> {
        let battery = self.inner.read().await.battery_pct;
        if battery < self.safety.min_battery {
            return Err(FleetError::new(
                ErrorCode::BatteryLow,
                format!("battery at {battery}%, below minimum takeoff floor {}%", self.safety.min_battery),
            ));
        }
        Ok(())
    }

    async fn check_path(&self, target: (f64, f64, f64)) -> Result<(), FleetError> {
        let from = self.inner.read().await.pose.position();
        self.safety
            .bounds
            .check_segment(from, target, PATH_CHECK_STEP_CM)
            .map_err(|point| {
                FleetError::new(
                    ErrorCode::BoundsViolation,
                    format!("path would leave flight bounds at {point:?}"),
                )
            })
    }

    async fn post_update(&self, op: Operation) -> Result<(), FleetError> {
        let telemetry = {
            let mut cap = self.capability.lock().await;
            cap.get_telemetry().await?
        };
        {
            let mut inner = self.inner.write().await;
            inner.pose = telemetry.pose;
            inner.velocity = telemetry.velocity;
            inner.battery_pct = telemetry.battery_pct;
            inner.last_seen = chrono::Utc::now();
        }
        self.transition(Operation::GetTelemetry).await.ok();
        let _ = op;
        Ok(())
    }

    async fn reject(&self, err: FleetError) -> FleetError {
        let severity = match err.kind {
            fleet_core::ErrorKind::Safety => Severity::High,
            fleet_core::ErrorKind::State => Severity::Low,
            _ => Severity::Medium,
        };
        self.record_violation(err.code, severity, err.technical_message.clone()).await;
        err
    }

    pub async fn connect(&self) -> Result<(), FleetError> {
        if self.inner.read().await.state.connection == ConnectionState::Connected {
            return Ok(());
        }
        if let Err(e) = self.transition(Operation::Connect).await {
            return Err(self.reject(e).await);
        }
        let result = timeout(CONNECT_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.connect().await
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.post_update(Operation::Connect).await?;
                Ok(())
            }
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self
                .reject(FleetError::new(ErrorCode::Timeout, "connect timed out after 10s"))
                .await),
        }
    }

    pub async fn disconnect(&self) -> Result<(), FleetError> {
        self.cancel_task().await;
        let mut cap = self.capability.lock().await;
        cap.disconnect().await?;
        drop(cap);
        let mut inner = self.inner.write().await;
        inner.state = StateSnapshot::landed_disconnected();
        Ok(())
    }

    pub async fn takeoff(&self) -> Result<(), FleetError> {
        if self.inner.read().await.state.flight == FlightState::Flying {
            return Ok(());
        }
        if let Err(e) = self.check_battery_floor().await {
            return Err(self.reject(e).await);
        }
        let z = self.inner.read().await.pose.z;
        if z < self.safety.bounds.min_z || z > self.safety.bounds.max_z {
            return Err(self
                .reject(FleetError::new(
                    ErrorCode::BoundsViolation,
                    format!("takeoff position z={z}cm outside vertical bounds"),
                ))
                .await);
        }
        if let Err(e) = self.transition(Operation::Takeoff).await {
            return Err(self.reject(e).await);
        }
        let result = timeout(TAKEOFF_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.takeoff().await
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.post_update(Operation::Takeoff).await?;
                Ok(())
            }
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self
                .reject(FleetError::new(ErrorCode::Timeout, "takeoff timed out after 15s"))
                .await),
        }
    }

    pub async fn land(&self) -> Result<(), FleetError> {
        if self.inner.read().await.state.flight == FlightState::Landed {
            return Ok(());
        }
        if let Err(e) = self.transition(Operation::Land).await {
            return Err(self.reject(e).await);
        }
        let result = timeout(LAND_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.land().await
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.post_update(Operation::Land).await?;
                Ok(())
            }
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self
                .reject(FleetError::new(ErrorCode::Timeout, "land timed out after 15s"))
                .await),
        }
    }

    /// Bypasses the normal per-operation timeout: tries to acquire the
    /// command channel for up to 500ms, draining whatever op currently
    /// holds it. On success the active task is cancelled and the state
    /// machine moves to `Emergency`.
    pub async fn emergency_stop(&self) -> Result<(), FleetError> {
        let deadline = tokio::time::Instant::now() + EMERGENCY_DEADLINE;
        loop {
            match self.capability.try_lock() {
                Ok(mut cap) => {
                    let result = cap.emergency_stop().await;
                    drop(cap);
                    self.cancel_task().await;
                    self.transition(Operation::EmergencyStop).await.ok();
                    return result;
                }
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(_) => {
                    return Err(FleetError::new(
                        ErrorCode::Timeout,
                        "emergency stop could not acquire the command channel within 500ms",
                    ));
                }
            }
        }
    }

    pub async fn move_direction(
        &self,
        direction: Direction,
        distance_cm: f64,
        speed_cmps: f64,
    ) -> Result<(), FleetError> {
        if !(MIN_MOVE_CM..=MAX_MOVE_CM).contains(&distance_cm) {
            return Err(self
                .reject(FleetError::new(
                    ErrorCode::OutOfRange,
                    format!("move distance {distance_cm}cm outside [{MIN_MOVE_CM}, {MAX_MOVE_CM}]"),
                ))
                .await);
        }
        if self.inner.read().await.state.flight != FlightState::Flying {
            return Err(self
                .reject(FleetError::new(ErrorCode::NotFlying, "move requires the drone to be flying"))
                .await);
        }
        let target = {
            let pose = self.inner.read().await.pose;
            fleet_core::geometry::project_move(&pose, direction, distance_cm)
        };
        if let Err(e) = self.check_path(target).await {
            return Err(self.reject(e).await);
        }
        let speed = speed_cmps.min(self.settings.speed_limit_cmps).max(1.0);
        let result = timeout(MOVE_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.move_direction(direction, distance_cm, speed).await
        })
        .await;
        match result {
            Ok(Ok(())) => self.post_update(Operation::Move).await,
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self.reject(FleetError::new(ErrorCode::Timeout, "move timed out after 30s")).await),
        }
    }

    pub async fn rotate(&self, direction: RotateDirection, angle_deg: f64) -> Result<(), FleetError> {
        if !(MIN_ROTATE_DEG..=MAX_ROTATE_DEG).contains(&angle_deg) {
            return Err(self
                .reject(FleetError::new(
                    ErrorCode::OutOfRange,
                    format!("rotate angle {angle_deg} outside [{MIN_ROTATE_DEG}, {MAX_ROTATE_DEG}]"),
                ))
                .await);
        }
        if self.inner.read().await.state.flight != FlightState::Flying {
            return Err(self
                .reject(FleetError::new(ErrorCode::NotFlying, "rotate requires the drone to be flying"))
                .await);
        }
        let result = timeout(ROTATE_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.rotate(direction, angle_deg).await
        })
        .await;
        match result {
            Ok(Ok(())) => self.post_update(Operation::Rotate).await,
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self.reject(FleetError::new(ErrorCode::Timeout, "rotate timed out after 10s")).await),
        }
    }

    pub async fn set_altitude(&self, target_cm: f64, mode: AltitudeMode) -> Result<(), FleetError> {
        if mode == AltitudeMode::Absolute && !(MIN_ALTITUDE_CM..=MAX_ALTITUDE_CM).contains(&target_cm) {
            return Err(self
                .reject(FleetError::new(
                    ErrorCode::OutOfRange,
                    format!("altitude {target_cm}cm outside [{MIN_ALTITUDE_CM}, {MAX_ALTITUDE_CM}]"),
                ))
                .await);
        }
        if self.inner.read().await.state.flight != FlightState::Flying {
            return Err(self
                .reject(FleetError::new(ErrorCode::NotFlying, "altitude change requires the drone to be flying"))
                .await);
        }
        let target = {
            let pose = self.inner.read().await.pose;
            let z = match mode {
                AltitudeMode::Absolute => target_cm,
                AltitudeMode::Relative => pose.z + target_cm,
            };
            (pose.x, pose.y, z)
        };
        if let Err(e) = self.check_path(target).await {
            return Err(self.reject(e).await);
        }
        let result = timeout(MOVE_TIMEOUT, async {
            let mut cap = self.capability.lock().await;
            cap.set_altitude(target_cm, mode).await
        })
        .await;
        match result {
            Ok(Ok(())) => self.post_update(Operation::SetAltitude).await,
            Ok(Err(e)) => Err(self.reject(e).await),
            Err(_) => Err(self.reject(FleetError::new(ErrorCode::Timeout, "set_altitude timed out")).await),
        }
    }

    pub async fn capture_frame(&self) -> Result<fleet_core::Frame, FleetError> {
        let mut cap = self.capability.lock().await;
        cap.capture_frame().await
    }

    pub async fn start_stream(&self) -> Result<(), FleetError> {
        let mut cap = self.capability.lock().await;
        cap.start_stream().await
    }

    pub async fn stop_stream(&self) -> Result<(), FleetError> {
        let mut cap = self.capability.lock().await;
        cap.stop_stream().await
    }

    // --- Long-running tasks -------------------------------------------

    async fn begin_task(self: &Arc<Self>, kind: TaskKind) -> Result<String, FleetError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = &inner.active_task {
            if !kind.may_preempt(existing.status) {
                return Err(FleetError::new(ErrorCode::Busy, "a task is already running for this drone"));
            }
        }
        let task_id = uuid::Uuid::new_v4().to_string();
        let mut record = TaskRecord::new(task_id.clone(), kind);
        record.status = TaskStatus::Running;
        inner.active_task = Some(record);
        self.task_cancel.store(false, Ordering::SeqCst);
        Ok(task_id)
    }

    async fn finish_task(&self, task_id: &str, status: TaskStatus) {
        let mut inner = self.inner.write().await;
        if let Some(task) = &mut inner.active_task {
            if task.id == task_id {
                task.finish(status);
            }
        }
        drop(inner);
        let _ = self.events.send(DroneEvent::TaskCompleted {
            drone_id: self.id.clone(),
            task_id: task_id.to_string(),
            status,
        });
    }

    pub async fn cancel_task(&self) {
        self.task_cancel.store(true, Ordering::SeqCst);
        let task_id = self.inner.read().await.active_task.as_ref().map(|t| t.id.clone());
        if let Some(task_id) = task_id {
            self.finish_task(&task_id, TaskStatus::Cancelled).await;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.task_cancel.load(Ordering::SeqCst)
    }

    /// Spawns the altitude-hold task: polls telemetry every 100ms, finishes
    /// once within `ALTITUDE_HOLD_TOLERANCE_CM` of the target or after
    /// `timeout_secs` (default 30s).
    pub async fn start_altitude_hold(
        self: &Arc<Self>,
        target_cm: f64,
        mode: AltitudeMode,
        timeout_secs: u64,
    ) -> Result<String, FleetError> {
        let task_id = self
            .begin_task(TaskKind::AltitudeHold {
                target_cm,
                mode,
                timeout_secs,
            })
            .await?;
        self.set_altitude(target_cm, mode).await?;

        let supervisor = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs.max(1));
            loop {
                if supervisor.is_cancelled() {
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    supervisor.finish_task(&id, TaskStatus::Failed).await;
                    return;
                }
                let z = supervisor.inner.read().await.pose.z;
                let absolute_target = match mode {
                    AltitudeMode::Absolute => target_cm,
                    AltitudeMode::Relative => z,
                };
                if (z - absolute_target).abs() <= ALTITUDE_HOLD_TOLERANCE_CM {
                    supervisor.finish_task(&id, TaskStatus::Completed).await;
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = supervisor.post_update(Operation::GetTelemetry).await;
            }
        });
        Ok(task_id)
    }

    /// Spawns a sequential waypoint plan: each leg is safety-checked before
    /// being dispatched, aborting the whole plan on the first rejected leg.
    pub async fn start_waypoint_plan(
        self: &Arc<Self>,
        waypoints: Vec<Waypoint>,
        timeout_secs: Option<u64>,
    ) -> Result<String, FleetError> {
        if waypoints.is_empty() {
            return Err(FleetError::new(ErrorCode::InvalidParameter, "waypoint plan must have at least one point"));
        }
        let task_id = self
            .begin_task(TaskKind::WaypointPlan {
                waypoints: waypoints.clone(),
                timeout_secs,
            })
            .await?;

        let supervisor = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            let deadline = timeout_secs.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
            let total = waypoints.len();
            for (i, wp) in waypoints.into_iter().enumerate() {
                if supervisor.is_cancelled() {
                    return;
                }
                if let Some(deadline) = deadline {
                    if tokio::time::Instant::now() >= deadline {
                        supervisor.finish_task(&id, TaskStatus::Failed).await;
                        return;
                    }
                }
                let from = supervisor.inner.read().await.pose.position();
                let target = (wp.x, wp.y, wp.z);
                if supervisor.safety.bounds.check_segment(from, target, PATH_CHECK_STEP_CM).is_err() {
                    warn!(drone_id = %supervisor.id, leg = i, "waypoint leg rejected, aborting plan");
                    supervisor.finish_task(&id, TaskStatus::Failed).await;
                    return;
                }
                let dx = target.0 - from.0;
                let dy = target.1 - from.1;
                let dz = target.2 - from.2;
                let distance = (dx * dx + dy * dy + dz * dz).sqrt();
                let direction = if dx.abs() >= dy.abs() && dx.abs() >= dz.abs() {
                    if dx >= 0.0 { Direction::Right } else { Direction::Left }
                } else if dy.abs() >= dz.abs() {
                    if dy >= 0.0 { Direction::Forward } else { Direction::Back }
                } else if dz >= 0.0 {
                    Direction::Up
                } else {
                    Direction::Down
                };
                if distance >= MIN_MOVE_CM {
                    if let Err(e) = supervisor
                        .move_direction(direction, distance.min(MAX_MOVE_CM), supervisor.settings.speed_limit_cmps)
                        .await
                    {
                        warn!(drone_id = %supervisor.id, leg = i, error = %e, "waypoint leg failed");
                        supervisor.finish_task(&id, TaskStatus::Failed).await;
                        return;
                    }
                }
                let mut inner = supervisor.inner.write().await;
                if let Some(task) = &mut inner.active_task {
                    task.touch((i + 1) as f64 / total as f64);
                }
            }
            supervisor.finish_task(&id, TaskStatus::Completed).await;
        });
        Ok(task_id)
    }

    /// Spawns a tracking hold: polls `vision` at ~10Hz, nudging the drone
    /// toward the detected target's frame-center offset. Loses the target
    /// after `max_empty_frames` consecutive empty polls.
    pub async fn start_tracking_hold(
        self: &Arc<Self>,
        vision: Arc<dyn VisionService>,
        model_id: String,
        max_empty_frames: u32,
    ) -> Result<String, FleetError> {
        let task_id = self
            .begin_task(TaskKind::TrackingHold {
                model_id: model_id.clone(),
                max_empty_frames,
            })
            .await?;

        vision.start_tracking(self.id.as_str(), &model_id).await;
        let supervisor = Arc::clone(self);
        let id = task_id.clone();
        let limit = max_empty_frames.clamp(1, TRACKING_MAX_EMPTY_FRAMES);
        tokio::spawn(async move {
            let mut empty_frames = 0u32;
            loop {
                if supervisor.is_cancelled() {
                    vision.stop_tracking(supervisor.id.as_str()).await;
                    return;
                }
                match vision.poll_tracking(supervisor.id.as_str()).await {
                    Some(detection) => {
                        empty_frames = 0;
                        let horizontal = if detection.offset_x > 0.1 {
                            Some(Direction::Right)
                        } else if detection.offset_x < -0.1 {
                            Some(Direction::Left)
                        } else {
                            None
                        };
                        if let Some(direction) = horizontal {
                            let _ = supervisor.move_direction(direction, TRACKING_STEP_CM, 30.0).await;
                        }
                    }
                    None => {
                        empty_frames += 1;
                        if empty_frames >= limit {
                            vision.stop_tracking(supervisor.id.as_str()).await;
                            supervisor.finish_task(&id, TaskStatus::Failed).await;
                            return;
                        }
                    }
                }
                tokio::time::sleep(TRACKING_POLL_INTERVAL).await;
            }
        });
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedDroneAdapter, SimulatedDroneAdapterConfig};

    fn make_supervisor() -> Arc<DroneSupervisor> {
        let capability = SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig::default());
        DroneSupervisor::new(
            DroneId::parse("D1").unwrap(),
            Box::new(capability),
            false,
            false,
            SafetyConfig::default(),
            DroneSettings::default(),
            Pose::default(),
        )
    }

    #[tokio::test]
    async fn takeoff_requires_connect_first() {
        let supervisor = make_supervisor();
        let result = supervisor.takeoff().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn happy_path_connect_takeoff_land() {
        let supervisor = make_supervisor();
        supervisor.connect().await.unwrap();
        supervisor.takeoff().await.unwrap();
        assert_eq!(supervisor.status().await.flight, FlightState::Flying);
        supervisor.land().await.unwrap();
        assert_eq!(supervisor.status().await.flight, FlightState::Landed);
    }

    #[tokio::test]
    async fn move_out_of_range_distance_is_rejected_before_dispatch() {
        let supervisor = make_supervisor();
        supervisor.connect().await.unwrap();
        supervisor.takeoff().await.unwrap();
        let result = supervisor.move_direction(Direction::Forward, 0.1, 50.0).await;
        assert!(result.is_err());
        assert_eq!(supervisor.status().await.recent_violations.len(), 1);
    }

    #[tokio::test]
    async fn emergency_stop_cancels_running_task() {
        let supervisor = make_supervisor();
        supervisor.connect().await.unwrap();
        supervisor.takeoff().await.unwrap();
        supervisor
            .start_altitude_hold(300.0, AltitudeMode::Absolute, 30)
            .await
            .unwrap();
        supervisor.emergency_stop().await.unwrap();
        let status = supervisor.status().await;
        assert_eq!(status.active_task.unwrap().status, TaskStatus::Cancelled);
    }
}
