//! Translates a resolved [`Intent`] into calls against the right
//! [`DroneSupervisor`], with retry-on-transport-failure, low-confidence
//! alternative fallback, and batch execution across multiple intents.

use crate::backoff::Backoff;
use crate::supervisor::DroneSupervisor;
use crate::vision::VisionService;
use dashmap::DashMap;
use fleet_core::{Action, AltitudeMode, Direction, DroneId, ErrorCode, FleetError, Intent, RotateDirection};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

const DEFAULT_MAX_RETRIES: u32 = 2;
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_MAX: Duration = Duration::from_secs(4);
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;
const STATS_WINDOW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Optimized,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRecovery {
    FailFast,
    Continue,
    SmartRecovery,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentOutcome {
    pub action: Action,
    pub drone_id: Option<DroneId>,
    pub success: bool,
    pub error: Option<FleetError>,
    pub skipped: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct RouterStatsSnapshot {
    pub total_calls: u64,
    pub total_retries: u64,
    pub avg_latency_ms: f64,
}

struct RouterStats {
    total_calls: AtomicU64,
    total_retries: AtomicU64,
    recent_latencies_ms: Mutex<VecDeque<u64>>,
}

impl RouterStats {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            recent_latencies_ms: Mutex::new(VecDeque::with_capacity(STATS_WINDOW)),
        }
    }

    async fn record(&self, latency_ms: u64, retries: u32) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(retries as u64, Ordering::Relaxed);
        let mut window = self.recent_latencies_ms.lock().await;
        if window.len() >= STATS_WINDOW {
            window.pop_front();
        }
        window.push_back(latency_ms);
    }

    async fn snapshot(&self) -> RouterStatsSnapshot {
        let window = self.recent_latencies_ms.lock().await;
        let avg = if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<u64>() as f64 / window.len() as f64
        };
        RouterStatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            avg_latency_ms: avg,
        }
    }
}

/// Routes [`Intent`]s to [`DroneSupervisor`]s. Holds no drone state of its
/// own beyond the registry handle; authorization is enforced one layer up
/// (REST middleware / MCP tool dispatch), not duplicated here.
pub struct CommandRouter {
    drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>>,
    vision: Arc<dyn VisionService>,
    max_retries: u32,
    stats: RouterStats,
}

impl CommandRouter {
    pub fn new(drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>>, vision: Arc<dyn VisionService>) -> Self {
        Self {
            drones,
            vision,
            max_retries: DEFAULT_MAX_RETRIES,
            stats: RouterStats::new(),
        }
    }

    pub async fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot().await
    }

    fn resolve_target(&self, intent: &Intent) -> Result<Arc<DroneSupervisor>, FleetError> {
        if let Some(id) = &intent.target_drone {
            return self
                .drones
                .get(id)
                .map(|e| Arc::clone(e.value()))
                .ok_or_else(|| FleetError::new(ErrorCode::MalformedId, format!("unknown drone id {id}")));
        }
        if self.drones.len() == 1 {
            return Ok(Arc::clone(self.drones.iter().next().unwrap().value()));
        }
        if self.drones.is_empty() {
            return Err(FleetError::new(ErrorCode::NotConnected, "no drones are registered"));
        }
        Err(FleetError::new(
            ErrorCode::InvalidParameter,
            "multiple drones connected; command must name a target drone",
        ))
    }

    /// Execute a single intent, retrying transport failures and falling
    /// back to the next alternative when the primary interpretation is
    /// both unrecognized and low-confidence.
    pub async fn execute(&self, intent: Intent) -> Result<serde_json::Value, FleetError> {
        let started = tokio::time::Instant::now();
        let mut retries = 0u32;
        let mut backoff = Backoff::new(RETRY_BASE, RETRY_MAX);
        let result = loop {
            match self.dispatch(&intent).await {
                Ok(value) => break Ok(value),
                Err(err) if err.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    warn!(action = ?intent.action, attempt = retries, error = %err, "retrying after transport error");
                    tokio::time::sleep(backoff.fail()).await;
                    continue;
                }
                Err(err) => break Err(err),
            }
        };

        let result = match result {
            Err(err) if err.code == ErrorCode::InvalidParameter && intent.confidence < LOW_CONFIDENCE_THRESHOLD => {
                self.try_alternatives(&intent).await.unwrap_or(Err(err))
            }
            other => other,
        };

        self.stats.record(started.elapsed().as_millis() as u64, retries).await;
        result
    }

    async fn try_alternatives(&self, intent: &Intent) -> Option<Result<serde_json::Value, FleetError>> {
        for alt in &intent.alternatives {
            let candidate = Intent {
                action: alt.action,
                parameters: alt.parameters.clone(),
                confidence: alt.confidence,
                alternatives: Vec::new(),
                missing_slots: Vec::new(),
                target_drone: intent.target_drone.clone(),
            };
            if let Ok(value) = self.dispatch(&candidate).await {
                return Some(Ok(value));
            }
        }
        None
    }

    async fn dispatch(&self, intent: &Intent) -> Result<serde_json::Value, FleetError> {
        match intent.action {
            Action::Connect => {
                let supervisor = self.resolve_target(intent)?;
                supervisor.connect().await?;
                Ok(serde_json::json!({"connected": true}))
            }
            Action::Disconnect => {
                let supervisor = self.resolve_target(intent)?;
                supervisor.disconnect().await?;
                Ok(serde_json::json!({"disconnected": true}))
            }
            Action::Takeoff => {
                let supervisor = self.resolve_target(intent)?;
                supervisor.takeoff().await?;
                Ok(serde_json::json!({"airborne": true}))
            }
            Action::Land => {
                let supervisor = self.resolve_target(intent)?;
                supervisor.land().await?;
                Ok(serde_json::json!({"landed": true}))
            }
            Action::Emergency => {
                let supervisor = self.resolve_target(intent)?;
                supervisor.emergency_stop().await?;
                Ok(serde_json::json!({"stopped": true}))
            }
            Action::Move => {
                let supervisor = self.resolve_target(intent)?;
                let direction = parse_direction(intent)?;
                let distance = intent
                    .number("distance")
                    .ok_or_else(|| FleetError::new(ErrorCode::InvalidParameter, "missing `distance` slot"))?;
                let speed = intent.number("speed").unwrap_or(50.0);
                supervisor.move_direction(direction, distance, speed).await?;
                Ok(serde_json::json!({"moved": true}))
            }
            Action::Rotate => {
                let supervisor = self.resolve_target(intent)?;
                let direction = parse_rotate_direction(intent)?;
                let angle = intent
                    .number("angle")
                    .ok_or_else(|| FleetError::new(ErrorCode::InvalidParameter, "missing `angle` slot"))?;
                supervisor.rotate(direction, angle).await?;
                Ok(serde_json::json!({"rotated": true}))
            }
            Action::Altitude => {
                let supervisor = self.resolve_target(intent)?;
                let target = intent
                    .number("target")
                    .ok_or_else(|| FleetError::new(ErrorCode::InvalidParameter, "missing `target` slot"))?;
                supervisor.set_altitude(target, AltitudeMode::Absolute).await?;
                Ok(serde_json::json!({"altitude_set": true}))
            }
            Action::Photo => {
                let supervisor = self.resolve_target(intent)?;
                let frame = supervisor.capture_frame().await?;
                Ok(serde_json::json!({
                    "frame_id": frame.frame_id,
                    "width": frame.width,
                    "height": frame.height,
                    "bytes": frame.data.len(),
                }))
            }
            Action::Streaming => {
                let supervisor = self.resolve_target(intent)?;
                if intent.text("state") == Some("stop") {
                    supervisor.stop_stream().await?;
                    Ok(serde_json::json!({"streaming": false}))
                } else {
                    supervisor.start_stream().await?;
                    Ok(serde_json::json!({"streaming": true}))
                }
            }
            Action::Detection => {
                let frame = {
                    let supervisor = self.resolve_target(intent)?;
                    supervisor.capture_frame().await?
                };
                let model_id = intent.text("model_id").unwrap_or("default");
                let detections = self.vision.detect(&frame.data, model_id, 0.5).await;
                Ok(serde_json::json!({"detections": detections.len()}))
            }
            Action::Tracking => {
                let supervisor = self.resolve_target(intent)?;
                let model_id = intent
                    .text("model_id")
                    .ok_or_else(|| FleetError::new(ErrorCode::InvalidParameter, "missing `model_id` slot"))?
                    .to_string();
                let task_id = supervisor
                    .start_tracking_hold(Arc::clone(&self.vision), model_id, 30)
                    .await?;
                Ok(serde_json::json!({"task_id": task_id}))
            }
            Action::Status => {
                let supervisor = self.resolve_target(intent)?;
                Ok(serde_json::to_value(supervisor.status().await).unwrap_or_default())
            }
            Action::LearningData => Err(FleetError::new(
                ErrorCode::SchemaMismatch,
                "learning-data collection is not supported by this control plane",
            )),
        }
    }

    /// Execute many intents as a batch. `Emergency` actions always run
    /// first, synchronously, as a barrier ahead of everything else.
    pub async fn execute_batch(
        &self,
        mut intents: Vec<Intent>,
        mode: ExecutionMode,
        recovery: ErrorRecovery,
    ) -> Vec<IntentOutcome> {
        let mut outcomes = Vec::with_capacity(intents.len());

        let emergencies: Vec<Intent> = extract_matching(&mut intents, |i| i.action == Action::Emergency);
        for intent in emergencies {
            outcomes.push(self.execute_and_record(intent).await);
        }

        if mode == ExecutionMode::Priority {
            intents.sort_by_key(|i| priority_rank(i.action));
        }

        match mode {
            ExecutionMode::Sequential | ExecutionMode::Priority => {
                let mut failed = false;
                for intent in intents {
                    if failed && recovery == ErrorRecovery::FailFast {
                        outcomes.push(IntentOutcome {
                            action: intent.action,
                            drone_id: intent.target_drone,
                            success: false,
                            error: None,
                            skipped: true,
                        });
                        continue;
                    }
                    let outcome = self.execute_and_record(intent).await;
                    if !outcome.success {
                        failed = true;
                    }
                    outcomes.push(outcome);
                }
            }
            ExecutionMode::Parallel | ExecutionMode::Optimized => {
                let groups = group_by_drone(intents);
                let mut handles = Vec::with_capacity(groups.len());
                for group in groups {
                    let router = self;
                    handles.push(async move {
                        let mut group_outcomes = Vec::with_capacity(group.len());
                        let mut failed = false;
                        for intent in group {
                            if failed && recovery == ErrorRecovery::FailFast {
                                group_outcomes.push(IntentOutcome {
                                    action: intent.action,
                                    drone_id: intent.target_drone,
                                    success: false,
                                    error: None,
                                    skipped: true,
                                });
                                continue;
                            }
                            let outcome = router.execute_and_record(intent).await;
                            if !outcome.success {
                                failed = true;
                            }
                            group_outcomes.push(outcome);
                        }
                        group_outcomes
                    });
                }
                let results = futures::future::join_all(handles).await;
                for group_outcomes in results {
                    outcomes.extend(group_outcomes);
                }
            }
        }

        outcomes
    }

    async fn execute_and_record(&self, intent: Intent) -> IntentOutcome {
        let action = intent.action;
        let drone_id = intent.target_drone.clone();
        match self.execute(intent).await {
            Ok(_) => IntentOutcome {
                action,
                drone_id,
                success: true,
                error: None,
                skipped: false,
            },
            Err(err) => IntentOutcome {
                action,
                drone_id,
                success: false,
                error: Some(err),
                skipped: false,
            },
        }
    }
}

fn extract_matching(intents: &mut Vec<Intent>, predicate: impl Fn(&Intent) -> bool) -> Vec<Intent> {
    let mut matched = Vec::new();
    let mut remaining = Vec::with_capacity(intents.len());
    for intent in intents.drain(..) {
        if predicate(&intent) {
            matched.push(intent);
        } else {
            remaining.push(intent);
        }
    }
    *intents = remaining;
    matched
}

fn group_by_drone(intents: Vec<Intent>) -> Vec<Vec<Intent>> {
    let mut groups: Vec<(Option<DroneId>, Vec<Intent>)> = Vec::new();
    for intent in intents {
        match groups.iter_mut().find(|(id, _)| *id == intent.target_drone) {
            Some((_, group)) => group.push(intent),
            None => groups.push((intent.target_drone.clone(), vec![intent])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Connect before takeoff, everything else, disconnect last.
fn priority_rank(action: Action) -> u8 {
    match action {
        Action::Emergency => 0,
        Action::Connect => 1,
        Action::Takeoff => 2,
        Action::Move | Action::Rotate | Action::Altitude | Action::Photo | Action::Streaming => 3,
        Action::Detection | Action::Tracking | Action::Status | Action::LearningData => 4,
        Action::Land => 5,
        Action::Disconnect => 6,
    }
}

fn parse_direction(intent: &Intent) -> Result<Direction, FleetError> {
    match intent.text("direction") {
        Some("forward") => Ok(Direction::Forward),
        Some("back") => Ok(Direction::Back),
        Some("left") => Ok(Direction::Left),
        Some("right") => Ok(Direction::Right),
        Some("up") => Ok(Direction::Up),
        Some("down") => Ok(Direction::Down),
        other => Err(FleetError::new(
            ErrorCode::InvalidParameter,
            format!("unrecognized move direction: {other:?}"),
        )),
    }
}

fn parse_rotate_direction(intent: &Intent) -> Result<RotateDirection, FleetError> {
    match intent.text("direction") {
        Some("clockwise") => Ok(RotateDirection::Clockwise),
        Some("counter_clockwise") => Ok(RotateDirection::CounterClockwise),
        other => Err(FleetError::new(
            ErrorCode::InvalidParameter,
            format!("unrecognized rotate direction: {other:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimulatedDroneAdapter, SimulatedDroneAdapterConfig};
    use crate::vision::NoopVisionService;
    use fleet_core::config_types::DroneSettings;
    use fleet_core::{Pose, SafetyConfig};

    fn router_with_one_drone() -> (CommandRouter, DroneId) {
        let drones: Arc<DashMap<DroneId, Arc<DroneSupervisor>>> = Arc::new(DashMap::new());
        let id = DroneId::parse("D1").unwrap();
        let supervisor = DroneSupervisor::new(
            id.clone(),
            Box::new(SimulatedDroneAdapter::new(SimulatedDroneAdapterConfig::default())),
            false,
            false,
            SafetyConfig::default(),
            DroneSettings::default(),
            Pose::default(),
        );
        drones.insert(id.clone(), supervisor);
        (CommandRouter::new(drones, Arc::new(NoopVisionService)), id)
    }

    #[tokio::test]
    async fn auto_binds_to_the_only_connected_drone() {
        let (router, _id) = router_with_one_drone();
        let intent = Intent::new(Action::Connect);
        let result = router.execute(intent).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_explicit_target_is_rejected() {
        let (router, _id) = router_with_one_drone();
        let intent = Intent::new(Action::Connect).with_target(DroneId::parse("ghost").unwrap());
        let result = router.execute(intent).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn learning_data_action_is_unsupported() {
        let (router, _id) = router_with_one_drone();
        let result = router.execute(Intent::new(Action::LearningData)).await;
        assert_eq!(result.unwrap_err().code, ErrorCode::SchemaMismatch);
    }

    #[tokio::test]
    async fn batch_sequential_fail_fast_skips_remaining() {
        let (router, id) = router_with_one_drone();
        let intents = vec![
            Intent::new(Action::Takeoff).with_target(id.clone()), // fails: not connected
            Intent::new(Action::Connect).with_target(id),
        ];
        let outcomes = router
            .execute_batch(intents, ExecutionMode::Sequential, ErrorRecovery::FailFast)
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[1].skipped);
    }
}
