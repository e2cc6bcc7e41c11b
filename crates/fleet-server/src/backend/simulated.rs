//! In-process 6-DOF kinematic simulation satisfying the same
//! [`DroneCapability`] contract as [`super::real::RealDroneAdapter`].
//!
//! Operations only ever mutate a *target* pose/yaw; a background task
//! ticking at 100 Hz integrates the current pose toward the target at a
//! configured max velocity/acceleration, and drains battery while motors
//! are active. There is no network and essentially no failure mode
//! besides a bounds violation when a target would leave the configured
//! flight volume — matching the adapter's role as a stand-in for
//! hardware that, within this process, cannot actually misbehave.

use async_trait::async_trait;
use fleet_core::{
    AltitudeMode, Direction, DroneCapability, ErrorCode, FleetError, FlightBounds, Frame, Pose,
    RotateDirection, TelemetrySample, Velocity,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const TICK_HZ: u64 = 100;
const TICK_PERIOD: Duration = Duration::from_millis(1000 / TICK_HZ);
/// Full-battery-to-empty time while motors are active, a per-second drain
/// model constant.
const BATTERY_SECONDS_AT_FULL_THROTTLE: f64 = 15.0 * 60.0;
const DEFAULT_TAKEOFF_HEIGHT_CM: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct SimulatedDroneAdapterConfig {
    pub initial_pose: Pose,
    pub bounds: FlightBounds,
    pub max_velocity_cmps: f64,
    pub max_accel_cmps2: f64,
    pub initial_battery_pct: f64,
}

impl Default for SimulatedDroneAdapterConfig {
    fn default() -> Self {
        Self {
            initial_pose: Pose::default(),
            bounds: FlightBounds::default(),
            max_velocity_cmps: 100.0,
            max_accel_cmps2: 200.0,
            initial_battery_pct: 100.0,
        }
    }
}

struct SimState {
    pose: Pose,
    velocity: Velocity,
    target_pose: Pose,
    target_yaw_deg: f64,
    motors_active: bool,
    battery_pct: f64,
    bounds: FlightBounds,
    max_velocity_cmps: f64,
    max_accel_cmps2: f64,
}

impl SimState {
    fn tick(&mut self, dt_secs: f64) {
        let dx = self.target_pose.x - self.pose.x;
        let dy = self.target_pose.y - self.pose.y;
        let dz = self.target_pose.z - self.pose.z;
        let distance = (dx * dx + dy * dy + dz * dz).sqrt();

        if distance > 1e-6 {
            let direction = (dx / distance, dy / distance, dz / distance);
            let current_speed = self.velocity.magnitude();
            let max_accel_step = self.max_accel_cmps2 * dt_secs;
            // Brake early enough to stop exactly at the target rather than
            // overshoot: v^2 = 2 * a * remaining_distance.
            let braking_speed = (2.0 * self.max_accel_cmps2 * distance).sqrt();
            let target_speed = self.max_velocity_cmps.min(braking_speed);
            let next_speed = if current_speed < target_speed {
                (current_speed + max_accel_step).min(target_speed)
            } else {
                (current_speed - max_accel_step).max(target_speed)
            };
            let step = (next_speed * dt_secs).min(distance);

            self.pose.x += direction.0 * step;
            self.pose.y += direction.1 * step;
            self.pose.z += direction.2 * step;
            self.velocity = Velocity {
                vx: direction.0 * next_speed,
                vy: direction.1 * next_speed,
                vz: direction.2 * next_speed,
            };
        } else {
            self.velocity = Velocity::default();
        }

        let dyaw = normalize_angle(self.target_yaw_deg - self.pose.yaw_deg);
        if dyaw.abs() > 1e-6 {
            let max_yaw_step = 180.0 * dt_secs;
            self.pose.yaw_deg += dyaw.clamp(-max_yaw_step, max_yaw_step);
        }

        if self.motors_active {
            let drain = 100.0 / BATTERY_SECONDS_AT_FULL_THROTTLE * dt_secs;
            self.battery_pct = (self.battery_pct - drain).max(0.0);
        }
    }
}

fn normalize_angle(mut deg: f64) -> f64 {
    while deg > 180.0 {
        deg -= 360.0;
    }
    while deg < -180.0 {
        deg += 360.0;
    }
    deg
}

pub struct SimulatedDroneAdapter {
    state: Arc<Mutex<SimState>>,
    tick_handle: Option<JoinHandle<()>>,
    frame_counter: Arc<AtomicU64>,
    streaming: bool,
}

impl SimulatedDroneAdapter {
    pub fn new(config: SimulatedDroneAdapterConfig) -> Self {
        let state = Arc::new(Mutex::new(SimState {
            pose: config.initial_pose,
            velocity: Velocity::default(),
            target_pose: config.initial_pose,
            target_yaw_deg: config.initial_pose.yaw_deg,
            motors_active: false,
            battery_pct: config.initial_battery_pct,
            bounds: config.bounds,
            max_velocity_cmps: config.max_velocity_cmps,
            max_accel_cmps2: config.max_accel_cmps2,
        }));

        let tick_state = Arc::clone(&state);
        let tick_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            loop {
                interval.tick().await;
                let mut guard = tick_state.lock().await;
                guard.tick(TICK_PERIOD.as_secs_f64());
            }
        });

        Self {
            state,
            tick_handle: Some(tick_handle),
            frame_counter: Arc::new(AtomicU64::new(0)),
            streaming: false,
        }
    }

    async fn check_target_in_bounds(&self, target: (f64, f64, f64)) -> Result<(), FleetError> {
        let guard = self.state.lock().await;
        if guard.bounds.contains(target) {
            Ok(())
        } else {
            Err(FleetError::new(
                ErrorCode::BoundsViolation,
                format!("simulated target {target:?} is outside configured flight bounds"),
            ))
        }
    }
}

impl Drop for SimulatedDroneAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.tick_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl DroneCapability for SimulatedDroneAdapter {
    async fn connect(&mut self) -> Result<(), FleetError> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), FleetError> {
        let mut guard = self.state.lock().await;
        guard.motors_active = false;
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<(), FleetError> {
        let mut guard = self.state.lock().await;
        let target = (guard.target_pose.x, guard.target_pose.y, DEFAULT_TAKEOFF_HEIGHT_CM);
        if !guard.bounds.contains(target) {
            return Err(FleetError::new(ErrorCode::BoundsViolation, "takeoff altitude outside bounds"));
        }
        guard.target_pose.z = DEFAULT_TAKEOFF_HEIGHT_CM;
        guard.motors_active = true;
        Ok(())
    }

    async fn land(&mut self) -> Result<(), FleetError> {
        let mut guard = self.state.lock().await;
        guard.target_pose.z = 0.0;
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), FleetError> {
        let mut guard = self.state.lock().await;
        guard.target_pose = guard.pose;
        guard.target_yaw_deg = guard.pose.yaw_deg;
        guard.motors_active = false;
        guard.velocity = Velocity::default();
        Ok(())
    }

    async fn move_direction(
        &mut self,
        direction: Direction,
        distance_cm: f64,
        speed_cmps: f64,
    ) -> Result<(), FleetError> {
        let target = {
            let guard = self.state.lock().await;
            fleet_core::geometry::project_move(&guard.pose, direction, distance_cm)
        };
        self.check_target_in_bounds(target).await?;
        let mut guard = self.state.lock().await;
        guard.target_pose.x = target.0;
        guard.target_pose.y = target.1;
        guard.target_pose.z = target.2;
        guard.max_velocity_cmps = speed_cmps.max(1.0);
        Ok(())
    }

    async fn rotate(&mut self, direction: RotateDirection, angle_deg: f64) -> Result<(), FleetError> {
        let mut guard = self.state.lock().await;
        let delta = direction.signed_angle(angle_deg);
        guard.target_yaw_deg = normalize_angle(guard.target_yaw_deg + delta);
        Ok(())
    }

    async fn set_altitude(&mut self, target_cm: f64, mode: AltitudeMode) -> Result<(), FleetError> {
        let target_z = match mode {
            AltitudeMode::Absolute => target_cm,
            AltitudeMode::Relative => {
                let guard = self.state.lock().await;
                guard.pose.z + target_cm
            }
        };
        let target = {
            let guard = self.state.lock().await;
            (guard.pose.x, guard.pose.y, target_z)
        };
        self.check_target_in_bounds(target).await?;
        let mut guard = self.state.lock().await;
        guard.target_pose.z = target_z;
        Ok(())
    }

    async fn get_telemetry(&mut self) -> Result<TelemetrySample, FleetError> {
        let guard = self.state.lock().await;
        Ok(TelemetrySample {
            pose: guard.pose,
            velocity: guard.velocity,
            battery_pct: guard.battery_pct.round() as u8,
        })
    }

    async fn capture_frame(&mut self) -> Result<Frame, FleetError> {
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        const WIDTH: u32 = 960;
        const HEIGHT: u32 = 720;
        // Synthetic solid-color frame; a real pluggable frame source is
        // outside this crate's concern.
        let data = vec![32u8; (WIDTH * HEIGHT * 3) as usize];
        Ok(Frame {
            frame_id,
            width: WIDTH,
            height: HEIGHT,
            data,
        })
    }

    async fn start_stream(&mut self) -> Result<(), FleetError> {
        self.streaming = true;
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<(), FleetError> {
        self.streaming = false;
        Ok(())
    }

    fn is_real(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn takeoff_then_land_returns_to_ground_within_tolerance() {
        let mut drone = SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig::default());
        drone.connect().await.unwrap();
        drone.takeoff().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let telemetry = drone.get_telemetry().await.unwrap();
        assert!((telemetry.pose.z - DEFAULT_TAKEOFF_HEIGHT_CM).abs() <= 5.0);

        drone.land().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let telemetry = drone.get_telemetry().await.unwrap();
        assert!(telemetry.pose.z.abs() <= 5.0);
    }

    #[tokio::test]
    async fn move_outside_bounds_is_rejected() {
        let config = SimulatedDroneAdapterConfig {
            bounds: FlightBounds {
                min_x: -50.0,
                max_x: 50.0,
                min_y: -50.0,
                max_y: 50.0,
                min_z: 0.0,
                max_z: 200.0,
            },
            ..Default::default()
        };
        let mut drone = SimulatedDroneAdapter::new(config);
        drone.connect().await.unwrap();
        drone.takeoff().await.unwrap();
        let result = drone.move_direction(Direction::Forward, 500.0, 50.0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn emergency_stop_freezes_target_at_current_pose() {
        let mut drone = SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig::default());
        drone.connect().await.unwrap();
        drone.takeoff().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drone.emergency_stop().await.unwrap();
        let before = drone.get_telemetry().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = drone.get_telemetry().await.unwrap();
        assert!((before.pose.z - after.pose.z).abs() < 1.0);
    }
}
