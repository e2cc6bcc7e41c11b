//! REST handlers. Most handlers build an [`Intent`] and hand it to the
//! same [`crate::router::CommandRouter`] the MCP adapter uses; a few
//! routes with no `Action` equivalent (`go_xyz`, `rc_control`, raw sensor
//! getters, camera settings/streaming) call the supervisor directly or
//! are rejected as unsupported — see `DESIGN.md` for the reasoning.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use fleet_core::{
    Action, Direction, DroneId, ErrorCode, ErrorKind, FleetError, Intent, RotateDirection, SlotValue, Waypoint,
};
use futures::stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::services::Services;
use crate::supervisor::DroneSupervisor;

/// Wraps a [`FleetError`] as an axum response, mapping the error taxonomy
/// onto HTTP status per the kind -> status table (bounds/state rejections
/// both read as `409 Conflict`, following the worked safety-rejection
/// example rather than inventing a fourth bucket for `Safety`).
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match err.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::State | ErrorKind::Safety => StatusCode::CONFLICT,
            ErrorKind::Security => StatusCode::FORBIDDEN,
            ErrorKind::Transport if err.code == ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Hardware => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::System => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(json!({
                "error": true,
                "code": err.code,
                "kind": err.kind,
                "message": err.user_message,
                "technical_message": err.technical_message,
                "suggestions": err.suggestions,
                "recovery_actions": err.recovery_actions,
            })),
        )
            .into_response()
    }
}

fn parse_target(raw: Option<&str>) -> Result<Option<DroneId>, ApiError> {
    match raw {
        Some(raw) => DroneId::parse(raw)
            .map(Some)
            .map_err(|e| FleetError::new(ErrorCode::MalformedId, e.to_string()).into()),
        None => Ok(None),
    }
}

/// Picks the first registered drone matching `drone_type` (`real` /
/// `simulation`); `None`/unrecognized matches whatever is registered
/// first, mirroring the MCP adapter's `connect_drone` resolution.
fn resolve_by_type(services: &Arc<Services>, drone_type: &str) -> Option<DroneId> {
    let want_real = match drone_type {
        "real" => Some(true),
        "simulation" => Some(false),
        _ => None,
    };
    services
        .drones
        .iter()
        .find(|entry| match want_real {
            Some(want) => entry.value().is_real == want,
            None => true,
        })
        .map(|entry| entry.key().clone())
}

/// Resolves a target supervisor directly, bypassing the router, for
/// routes with no `Action` equivalent. Same auto-bind-to-the-only-drone
/// behavior as `CommandRouter::resolve_target`.
fn resolve_supervisor(services: &Arc<Services>, drone_id: Option<&str>) -> Result<Arc<DroneSupervisor>, ApiError> {
    if let Some(raw) = drone_id {
        let id = DroneId::parse(raw).map_err(|e| FleetError::new(ErrorCode::MalformedId, e.to_string()))?;
        return services
            .drones
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| FleetError::new(ErrorCode::MalformedId, format!("unknown drone id {raw:?}")).into());
    }
    if services.drones.len() == 1 {
        return Ok(Arc::clone(services.drones.iter().next().unwrap().value()));
    }
    if services.drones.is_empty() {
        return Err(FleetError::new(ErrorCode::NotConnected, "no drones are registered").into());
    }
    Err(FleetError::new(
        ErrorCode::InvalidParameter,
        "multiple drones connected; request must name a target drone",
    )
    .into())
}

fn sensor_not_modeled(name: &str) -> ApiError {
    FleetError::new(
        ErrorCode::SchemaMismatch,
        format!("{name} is not modeled by this control plane (no backing capability field)"),
    )
    .into()
}

fn success(message: impl Into<String>) -> Json<Value> {
    Json(json!({"success": true, "message": message.into()}))
}

// === Request bodies ===

#[derive(Debug, Deserialize, Default)]
pub struct ConnectRequest {
    pub drone_id: Option<String>,
    pub drone_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SimpleTargetRequest {
    pub drone_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub drone_id: Option<String>,
    pub direction: String,
    pub distance: f64,
    pub speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RotateRequest {
    pub drone_id: Option<String>,
    pub direction: String,
    pub angle: f64,
}

#[derive(Debug, Deserialize)]
pub struct GoXyzRequest {
    pub drone_id: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[allow(dead_code)]
    pub speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RcControlRequest {
    pub drone_id: Option<String>,
    pub left_right_velocity: f64,
    pub forward_backward_velocity: f64,
    pub up_down_velocity: f64,
    pub yaw_velocity: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct DroneQuery {
    pub drone_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AutoScanQuery {
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CameraSettingsRequest {
    #[allow(dead_code)]
    pub resolution: Option<String>,
    #[allow(dead_code)]
    pub fps: Option<u32>,
    #[allow(dead_code)]
    pub bitrate: Option<u32>,
}

// === Lifecycle handlers: {success, message} envelope ===

async fn connect(State(services): State<Arc<Services>>, Json(req): Json<ConnectRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Connect);
    let mut target = parse_target(req.drone_id.as_deref())?;
    if target.is_none() {
        if let Some(drone_type) = req.drone_type.as_deref() {
            target = resolve_by_type(&services, drone_type);
        }
    }
    if let Some(id) = target.clone() {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;

    let id_str = target.as_ref().map(|id| id.as_str().to_string());
    let supervisor = resolve_supervisor(&services, id_str.as_deref())?;
    let status = supervisor.status().await;
    let mode_effective = if status.is_real { "real" } else { "simulation" };
    Ok(Json(json!({
        "success": true,
        "message": "ドローンに接続しました",
        "drone_info": {"id": status.id, "mode": mode_effective},
        "mode_effective": mode_effective,
        "fallback_applied": status.fallback_applied,
    })))
}

async fn disconnect(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Disconnect);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("disconnected"))
}

async fn takeoff(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Takeoff);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("airborne"))
}

async fn land(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Land);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("landed"))
}

/// `/drone/emergency` and `/drone/stop` are the same kill switch, both
/// returning the same status payload.
async fn emergency(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Emergency);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("stopped"))
}

async fn stop(state: State<Arc<Services>>, body: Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    emergency(state, body).await
}

async fn move_drone(State(services): State<Arc<Services>>, Json(req): Json<MoveRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Move)
        .with_param("direction", SlotValue::Text(req.direction))
        .with_param("distance", SlotValue::Number(req.distance))
        .with_param("speed", SlotValue::Number(req.speed.unwrap_or(50.0)));
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("move complete"))
}

async fn rotate(State(services): State<Arc<Services>>, Json(req): Json<RotateRequest>) -> Result<Json<Value>, ApiError> {
    let normalized = match req.direction.as_str() {
        "counterclockwise" => "counter_clockwise".to_string(),
        other => other.to_string(),
    };
    let mut intent = Intent::new(Action::Rotate)
        .with_param("direction", SlotValue::Text(normalized))
        .with_param("angle", SlotValue::Number(req.angle));
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("rotated"))
}

const GO_XYZ_AXIS_LIMIT: f64 = 500.0;

/// No `Action::Goto` exists in the command taxonomy; a `go_xyz` is
/// exactly the waypoint-plan primitive the supervisor already hosts for
/// multi-leg NL sequences, reused here for a single leg.
async fn go_xyz(State(services): State<Arc<Services>>, Json(req): Json<GoXyzRequest>) -> Result<Json<Value>, ApiError> {
    for (name, value) in [("x", req.x), ("y", req.y), ("z", req.z)] {
        if !(-GO_XYZ_AXIS_LIMIT..=GO_XYZ_AXIS_LIMIT).contains(&value) {
            return Err(FleetError::new(
                ErrorCode::OutOfRange,
                format!("go_xyz axis `{name}` = {value} outside [-{GO_XYZ_AXIS_LIMIT}, {GO_XYZ_AXIS_LIMIT}]"),
            )
            .into());
        }
    }
    let supervisor = resolve_supervisor(&services, req.drone_id.as_deref())?;
    let task_id = supervisor
        .start_waypoint_plan(vec![Waypoint { x: req.x, y: req.y, z: req.z }], Some(30))
        .await?;
    Ok(Json(json!({"success": true, "message": "waypoint plan started", "task_id": task_id})))
}

const RC_VELOCITY_LIMIT: f64 = 100.0;
const RC_DEADZONE: f64 = 5.0;
const RC_STEP_CM: f64 = 20.0;
const RC_YAW_STEP_DEG: f64 = 15.0;

/// There is no continuous-velocity stick primitive on `DroneSupervisor`,
/// only discrete moves. Each nonzero axis above a deadzone is translated
/// into one fixed-size nudge in the commanded direction, run sequentially
/// (the capability mutex serializes them against the backend anyway).
async fn rc_control(State(services): State<Arc<Services>>, Json(req): Json<RcControlRequest>) -> Result<Json<Value>, ApiError> {
    for (name, value) in [
        ("left_right_velocity", req.left_right_velocity),
        ("forward_backward_velocity", req.forward_backward_velocity),
        ("up_down_velocity", req.up_down_velocity),
        ("yaw_velocity", req.yaw_velocity),
    ] {
        if !(-RC_VELOCITY_LIMIT..=RC_VELOCITY_LIMIT).contains(&value) {
            return Err(FleetError::new(
                ErrorCode::OutOfRange,
                format!("rc_control `{name}` = {value} outside [-{RC_VELOCITY_LIMIT}, {RC_VELOCITY_LIMIT}]"),
            )
            .into());
        }
    }
    let supervisor = resolve_supervisor(&services, req.drone_id.as_deref())?;

    if req.forward_backward_velocity.abs() > RC_DEADZONE {
        let direction = if req.forward_backward_velocity > 0.0 { Direction::Forward } else { Direction::Back };
        supervisor.move_direction(direction, RC_STEP_CM, req.forward_backward_velocity.abs()).await?;
    }
    if req.left_right_velocity.abs() > RC_DEADZONE {
        let direction = if req.left_right_velocity > 0.0 { Direction::Right } else { Direction::Left };
        supervisor.move_direction(direction, RC_STEP_CM, req.left_right_velocity.abs()).await?;
    }
    if req.up_down_velocity.abs() > RC_DEADZONE {
        let direction = if req.up_down_velocity > 0.0 { Direction::Up } else { Direction::Down };
        supervisor.move_direction(direction, RC_STEP_CM, req.up_down_velocity.abs()).await?;
    }
    if req.yaw_velocity.abs() > RC_DEADZONE {
        let direction = if req.yaw_velocity > 0.0 { RotateDirection::Clockwise } else { RotateDirection::CounterClockwise };
        supervisor.rotate(direction, RC_YAW_STEP_DEG).await?;
    }

    Ok(success("rc_control nudge applied"))
}

// === Status / sensor getters ===

async fn status(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    Ok(Json(serde_json::to_value(supervisor.status().await).unwrap_or_default()))
}

async fn battery(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    Ok(Json(json!({"battery_pct": supervisor.status().await.battery_pct})))
}

async fn height(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    Ok(Json(json!({"height_cm": supervisor.status().await.pose.z})))
}

async fn flight_time(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    Ok(Json(json!({"flight_time_secs": supervisor.status().await.flight_time_secs})))
}

async fn velocity(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    Ok(Json(serde_json::to_value(supervisor.status().await.velocity).unwrap_or_default()))
}

async fn attitude(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Json<Value>, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;
    let pose = supervisor.status().await.pose;
    Ok(Json(json!({"pitch_deg": pose.pitch_deg, "roll_deg": pose.roll_deg, "yaw_deg": pose.yaw_deg})))
}

async fn temperature() -> Result<Json<Value>, ApiError> {
    Err(sensor_not_modeled("temperature"))
}

async fn barometer() -> Result<Json<Value>, ApiError> {
    Err(sensor_not_modeled("barometer"))
}

async fn distance_tof() -> Result<Json<Value>, ApiError> {
    Err(sensor_not_modeled("distance_tof"))
}

async fn acceleration() -> Result<Json<Value>, ApiError> {
    Err(sensor_not_modeled("acceleration"))
}

// === Camera ===

async fn camera_stream_start(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Streaming);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("streaming started"))
}

async fn camera_stream_stop(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Streaming).with_param("state", SlotValue::Text("stop".to_string()));
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    services.router.execute(intent).await?;
    Ok(success("streaming stopped"))
}

async fn camera_photo(State(services): State<Arc<Services>>, Json(req): Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    let mut intent = Intent::new(Action::Photo);
    if let Some(id) = parse_target(req.drone_id.as_deref())? {
        intent = intent.with_target(id);
    }
    let frame = services.router.execute(intent).await?;
    Ok(Json(frame))
}

/// The capability set has no distinct "record video" operation, only
/// stream start/stop; video start/stop alias the same stream toggle.
async fn camera_video_start(state: State<Arc<Services>>, body: Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    camera_stream_start(state, body).await
}

async fn camera_video_stop(state: State<Arc<Services>>, body: Json<SimpleTargetRequest>) -> Result<Json<Value>, ApiError> {
    camera_stream_stop(state, body).await
}

async fn camera_settings(Json(_req): Json<CameraSettingsRequest>) -> Result<Json<Value>, ApiError> {
    Err(FleetError::new(
        ErrorCode::SchemaMismatch,
        "camera resolution/fps/bitrate configuration is not exposed by DroneCapability",
    )
    .into())
}

const MJPEG_BOUNDARY: &str = "fleetframe";
const MJPEG_FRAME_INTERVAL: Duration = Duration::from_millis(100);

async fn camera_stream_mjpeg(State(services): State<Arc<Services>>, Query(q): Query<DroneQuery>) -> Result<Response, ApiError> {
    let supervisor = resolve_supervisor(&services, q.drone_id.as_deref())?;

    let frames = stream::unfold(supervisor, |supervisor| async move {
        tokio::time::sleep(MJPEG_FRAME_INTERVAL).await;
        match supervisor.capture_frame().await {
            Ok(frame) => {
                let mut chunk = format!(
                    "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    frame.data.len()
                )
                .into_bytes();
                chunk.extend_from_slice(&frame.data);
                chunk.extend_from_slice(b"\r\n");
                Some((Ok::<_, std::io::Error>(axum::body::Bytes::from(chunk)), supervisor))
            }
            Err(_) => None,
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"))
        .body(Body::from_stream(frames))
        .map_err(|e| FleetError::new(ErrorCode::Internal, e.to_string()).into())
}

// === Discovery / fleet admin ===

async fn detect_drones(State(services): State<Arc<Services>>, Query(q): Query<DetectQuery>) -> Json<Value> {
    let timeout_secs = q.timeout.unwrap_or(5).max(1);
    let detected = match tokio::time::timeout(Duration::from_secs(timeout_secs), services.discovery.scan(true)).await {
        Ok(found) => found,
        Err(_) => services.discovery.cached(),
    };
    Json(json!(detected
        .into_iter()
        .map(|d| json!({"ip": d.ip, "battery_pct": d.battery_pct}))
        .collect::<Vec<_>>()))
}

async fn auto_scan_start(State(services): State<Arc<Services>>, Query(q): Query<AutoScanQuery>) -> Json<Value> {
    let interval = q.interval_seconds.unwrap_or(30).max(1);
    services.start_auto_scan(interval).await;
    Json(json!({"success": true, "message": format!("auto-scan started at {interval}s interval")}))
}

async fn auto_scan_stop(State(services): State<Arc<Services>>) -> Json<Value> {
    let stopped = services.stop_auto_scan().await;
    let message = if stopped { "auto-scan stopped" } else { "auto-scan was not running" };
    Json(json!({"success": true, "message": message}))
}

// === Health / readiness ===

pub async fn health(State(services): State<Arc<Services>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "checks": {
            "drones_registered": services.drones.len(),
            "discovery_scanning": services.discovery.is_scanning(),
        },
    }))
}

pub async fn ready(State(services): State<Arc<Services>>) -> StatusCode {
    if *services.shutdown_tx.borrow() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

// === Router groups, gated individually by `api::mod` ===

pub fn public_router() -> Router<Arc<Services>> {
    Router::new().route("/health", get(health)).route("/ready", get(ready))
}

pub fn read_router() -> Router<Arc<Services>> {
    Router::new()
        .route("/drone/status", get(status))
        .route("/drone/battery", get(battery))
        .route("/drone/height", get(height))
        .route("/drone/flight_time", get(flight_time))
        .route("/drone/velocity", get(velocity))
        .route("/drone/attitude", get(attitude))
        .route("/drone/temperature", get(temperature))
        .route("/drone/barometer", get(barometer))
        .route("/drone/distance_tof", get(distance_tof))
        .route("/drone/acceleration", get(acceleration))
        .route("/camera/stream", get(camera_stream_mjpeg))
        .route("/api/drones/detect", get(detect_drones))
}

pub fn flight_router() -> Router<Arc<Services>> {
    Router::new()
        .route("/drone/connect", post(connect))
        .route("/drone/disconnect", post(disconnect))
        .route("/drone/takeoff", post(takeoff))
        .route("/drone/land", post(land))
        .route("/drone/emergency", post(emergency))
        .route("/drone/stop", post(stop))
        .route("/drone/move", post(move_drone))
        .route("/drone/rotate", post(rotate))
        .route("/drone/go_xyz", post(go_xyz))
        .route("/drone/rc_control", post(rc_control))
        .route("/camera/stream/start", post(camera_stream_start))
        .route("/camera/stream/stop", post(camera_stream_stop))
        .route("/camera/photo", post(camera_photo))
        .route("/camera/video/start", post(camera_video_start))
        .route("/camera/video/stop", post(camera_video_stop))
}

pub fn admin_router() -> Router<Arc<Services>> {
    Router::new()
        .route("/api/system/auto-scan/start", post(auto_scan_start))
        .route("/api/system/auto-scan/stop", post(auto_scan_stop))
        .route("/camera/settings", put(camera_settings))
}
