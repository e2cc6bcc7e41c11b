//! Model Context Protocol adapter: a JSON-RPC 2.0 server speaking
//! newline-delimited JSON over stdio. One process instance serves exactly
//! one client, so the natural-language parser's context memory is simply
//! owned here rather than keyed by a session id.

use crate::router::{ErrorRecovery, ExecutionMode};
use crate::services::Services;
use fleet_core::{Action, DroneId, ErrorKind, FleetError, Intent, NlParser, SlotValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "fleet-control-plane";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn ok_response(id: Option<Value>, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn err_response(id: Option<Value>, error: RpcError) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": error})
}

/// Maps the control plane's error taxonomy onto the small range of
/// JSON-RPC error codes this adapter reserves for itself.
fn rpc_code_for(err: &FleetError) -> i64 {
    match err.kind {
        ErrorKind::Validation => -32001,
        ErrorKind::State => -32002,
        ErrorKind::Safety => -32003,
        ErrorKind::Transport | ErrorKind::Hardware => -32004,
        ErrorKind::Security | ErrorKind::System => -32005,
    }
}

fn fleet_error_to_rpc(err: FleetError) -> RpcError {
    RpcError {
        code: rpc_code_for(&err),
        message: err.user_message.clone(),
        data: Some(json!({
            "kind": err.kind,
            "code": err.code,
            "technical_message": err.technical_message,
            "suggestions": err.suggestions,
            "recovery_actions": err.recovery_actions,
        })),
    }
}

fn parse_error(message: impl Into<String>) -> RpcError {
    RpcError {
        code: -32602,
        message: message.into(),
        data: None,
    }
}

fn method_not_found(method: &str) -> RpcError {
    RpcError {
        code: -32601,
        message: format!("unknown method {method:?}"),
        data: None,
    }
}

struct ToolDef {
    name: &'static str,
    description: &'static str,
    schema: fn() -> Value,
}

fn tool_catalog() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "connect_drone",
            description: "Connect to a drone, optionally selecting by preferred type (real/simulation/auto) or explicit drone id.",
            schema: || json!({
                "type": "object",
                "properties": {
                    "drone_type": {"type": "string", "enum": ["real", "simulation", "auto"]},
                    "drone_id": {"type": "string"}
                }
            }),
        },
        ToolDef {
            name: "takeoff_drone",
            description: "Command a connected drone to take off.",
            schema: || json!({
                "type": "object",
                "properties": {"drone_id": {"type": "string"}}
            }),
        },
        ToolDef {
            name: "land_drone",
            description: "Command a flying drone to land.",
            schema: || json!({
                "type": "object",
                "properties": {"drone_id": {"type": "string"}}
            }),
        },
        ToolDef {
            name: "move_drone",
            description: "Move a flying drone a given distance in a direction.",
            schema: || json!({
                "type": "object",
                "properties": {
                    "drone_id": {"type": "string"},
                    "direction": {"type": "string", "enum": ["forward", "back", "left", "right", "up", "down"]},
                    "distance": {"type": "number", "minimum": 1, "maximum": 500},
                    "speed": {"type": "number", "minimum": 10, "maximum": 100}
                },
                "required": ["direction", "distance"]
            }),
        },
        ToolDef {
            name: "rotate_drone",
            description: "Rotate a flying drone in place.",
            schema: || json!({
                "type": "object",
                "properties": {
                    "drone_id": {"type": "string"},
                    "direction": {"type": "string", "enum": ["clockwise", "counterclockwise"]},
                    "angle": {"type": "number", "minimum": 1, "maximum": 360}
                },
                "required": ["direction", "angle"]
            }),
        },
        ToolDef {
            name: "take_photo",
            description: "Capture a still frame from the drone's camera.",
            schema: || json!({
                "type": "object",
                "properties": {
                    "drone_id": {"type": "string"},
                    "filename": {"type": "string"}
                }
            }),
        },
        ToolDef {
            name: "execute_natural_language_command",
            description: "Parse and execute a free-form English or Japanese command, including chained multi-step commands.",
            schema: || json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "drone_id": {"type": "string"}
                },
                "required": ["command"]
            }),
        },
        ToolDef {
            name: "emergency_stop",
            description: "Immediately halt a drone's motors, bypassing normal command timeouts.",
            schema: || json!({
                "type": "object",
                "properties": {"drone_id": {"type": "string"}}
            }),
        },
    ]
}

fn resource_catalog() -> Value {
    json!([
        {"uri": "drone://available", "name": "Available drones", "mimeType": "application/json"},
        {"uri": "drone://status/{drone_id}", "name": "Single drone status", "mimeType": "application/json"},
        {"uri": "system://status", "name": "System status", "mimeType": "application/json"},
    ])
}

/// Owns the single stdio client's NL parsing context for the life of the
/// process.
pub struct McpAdapter {
    services: Arc<Services>,
    parser: Mutex<NlParser>,
}

impl McpAdapter {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            parser: Mutex::new(NlParser::new()),
        }
    }

    /// Reads newline-delimited JSON-RPC requests from stdin and writes
    /// responses to stdout until EOF or `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "mcp stdin read error");
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line).await;
            if let Some(response) = response {
                let mut payload = match serde_json::to_vec(&response) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize mcp response");
                        continue;
                    }
                };
                payload.push(b'\n');
                if stdout.write_all(&payload).await.is_err() || stdout.flush().await.is_err() {
                    warn!("mcp stdout write failed, ending session");
                    return;
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Option<Value> {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(err) => {
                return Some(err_response(None, parse_error(format!("invalid JSON-RPC request: {err}"))));
            }
        };
        let id = request.id.clone();
        debug!(method = %request.method, "mcp request");
        match self.dispatch(request).await {
            Ok(result) => Some(ok_response(id, result)),
            Err(error) => Some(err_response(id, error)),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}, "resources": {}},
                "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
            })),
            "tools/list" => {
                let tools: Vec<Value> = tool_catalog()
                    .into_iter()
                    .map(|t| json!({"name": t.name, "description": t.description, "inputSchema": (t.schema)()}))
                    .collect();
                Ok(json!({"tools": tools}))
            }
            "resources/list" => Ok(json!({"resources": resource_catalog()})),
            "tools/call" => self.call_tool(request.params).await,
            "resources/read" => self.read_resource(request.params).await,
            other => Err(method_not_found(other)),
        }
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let name = params.get("name").and_then(Value::as_str).ok_or_else(|| parse_error("missing `name`"))?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let text = match name {
            "connect_drone" => self.tool_connect(&args).await,
            "takeoff_drone" => self.tool_single(&args, Action::Takeoff).await,
            "land_drone" => self.tool_single(&args, Action::Land).await,
            "emergency_stop" => self.tool_single(&args, Action::Emergency).await,
            "move_drone" => self.tool_move(&args).await,
            "rotate_drone" => self.tool_rotate(&args).await,
            "take_photo" => self.tool_photo(&args).await,
            "execute_natural_language_command" => self.tool_nl_command(&args).await,
            other => return Err(method_not_found(other)),
        };

        match text {
            // The NL-command tool renders a human-readable summary line
            // first so a client can surface it directly; other tools just
            // echo their JSON payload as text.
            Ok(Value::Object(ref map)) if name == "execute_natural_language_command" => {
                let summary = map.get("summary").and_then(Value::as_str).unwrap_or("");
                Ok(json!({"content": [{"type": "text", "text": format!("{summary}\n{}", Value::Object(map.clone()))}]}))
            }
            Ok(value) => Ok(json!({"content": [{"type": "text", "text": value.to_string()}]})),
            Err(err) => Err(fleet_error_to_rpc(err)),
        }
    }

    fn target_drone(args: &Value) -> Result<Option<DroneId>, FleetError> {
        match args.get("drone_id").and_then(Value::as_str) {
            Some(raw) => DroneId::parse(raw)
                .map(Some)
                .map_err(|e| FleetError::new(fleet_core::ErrorCode::MalformedId, e.to_string())),
            None => Ok(None),
        }
    }

    async fn tool_single(&self, args: &Value, action: Action) -> Result<Value, FleetError> {
        let mut intent = Intent::new(action);
        if let Some(id) = Self::target_drone(args)? {
            intent = intent.with_target(id);
        }
        self.services.router.execute(intent).await
    }

    async fn tool_connect(&self, args: &Value) -> Result<Value, FleetError> {
        let mut intent = Intent::new(Action::Connect);
        if let Some(id) = Self::target_drone(args)? {
            intent = intent.with_target(id);
        } else if let Some(drone_type) = args.get("drone_type").and_then(Value::as_str) {
            if let Some(id) = self.resolve_by_type(drone_type) {
                intent = intent.with_target(id);
            }
        }
        self.services.router.execute(intent).await
    }

    /// Resolution for the ambiguous case where a caller names a preferred
    /// backend type instead of a specific drone id: picks the first
    /// registered drone whose real/simulated nature matches.
    fn resolve_by_type(&self, drone_type: &str) -> Option<DroneId> {
        let want_real = match drone_type {
            "real" => Some(true),
            "simulation" => Some(false),
            _ => None,
        };
        self.services
            .drones
            .iter()
            .find(|entry| match want_real {
                Some(want) => entry.value().is_real == want,
                None => true,
            })
            .map(|entry| entry.key().clone())
    }

    async fn tool_move(&self, args: &Value) -> Result<Value, FleetError> {
        let direction = args
            .get("direction")
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::new(fleet_core::ErrorCode::InvalidParameter, "missing `direction`"))?;
        let distance = args
            .get("distance")
            .and_then(Value::as_f64)
            .ok_or_else(|| FleetError::new(fleet_core::ErrorCode::InvalidParameter, "missing `distance`"))?;
        let speed = args.get("speed").and_then(Value::as_f64).unwrap_or(50.0);

        let mut intent = Intent::new(Action::Move)
            .with_param("direction", SlotValue::Text(direction.to_string()))
            .with_param("distance", SlotValue::Number(distance))
            .with_param("speed", SlotValue::Number(speed));
        if let Some(id) = Self::target_drone(args)? {
            intent = intent.with_target(id);
        }
        self.services.router.execute(intent).await
    }

    async fn tool_rotate(&self, args: &Value) -> Result<Value, FleetError> {
        let direction = args
            .get("direction")
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::new(fleet_core::ErrorCode::InvalidParameter, "missing `direction`"))?;
        let angle = args
            .get("angle")
            .and_then(Value::as_f64)
            .ok_or_else(|| FleetError::new(fleet_core::ErrorCode::InvalidParameter, "missing `angle`"))?;
        let normalized = match direction {
            "clockwise" => "clockwise",
            "counterclockwise" => "counter_clockwise",
            other => other,
        };

        let mut intent = Intent::new(Action::Rotate)
            .with_param("direction", SlotValue::Text(normalized.to_string()))
            .with_param("angle", SlotValue::Number(angle));
        if let Some(id) = Self::target_drone(args)? {
            intent = intent.with_target(id);
        }
        self.services.router.execute(intent).await
    }

    async fn tool_photo(&self, args: &Value) -> Result<Value, FleetError> {
        let mut intent = Intent::new(Action::Photo);
        if let Some(id) = Self::target_drone(args)? {
            intent = intent.with_target(id);
        }
        let mut result = self.services.router.execute(intent).await?;
        if let Some(filename) = args.get("filename").and_then(Value::as_str) {
            if let Value::Object(map) = &mut result {
                map.insert("filename".to_string(), json!(filename));
            }
        }
        Ok(result)
    }

    /// Parses (possibly compound) free-form text and runs every resulting
    /// intent as a sequential, fail-fast batch — so a single call can
    /// drive a whole "connect, then take off, then move, then land" chain.
    async fn tool_nl_command(&self, args: &Value) -> Result<Value, FleetError> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::new(fleet_core::ErrorCode::InvalidParameter, "missing `command`"))?;
        let default_target = Self::target_drone(args)?;

        let mut intents = {
            let mut parser = self.parser.lock().await;
            parser.parse_sequence(command)?
        };
        if let Some(target) = default_target {
            for intent in intents.iter_mut() {
                if intent.target_drone.is_none() {
                    intent.target_drone = Some(target.clone());
                }
            }
        }

        if intents.len() == 1 {
            let outcome = self.services.router.execute(intents.remove(0)).await?;
            return Ok(json!({"summary": "✅ command completed", "result": outcome}));
        }

        let outcomes = self
            .services
            .router
            .execute_batch(intents, ExecutionMode::Sequential, ErrorRecovery::FailFast)
            .await;
        let failed = outcomes.iter().find(|o| !o.success && !o.skipped);
        let summary = match failed {
            None => format!("✅ {} step(s) completed in order", outcomes.len()),
            Some(outcome) => format!(
                "❌ step {:?} failed: {}",
                outcome.action,
                outcome.error.as_ref().map(|e| e.user_message.as_str()).unwrap_or("unknown error")
            ),
        };
        Ok(json!({"summary": summary, "steps": outcomes}))
    }

    async fn read_resource(&self, params: Value) -> Result<Value, RpcError> {
        let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| parse_error("missing `uri`"))?;

        let contents = if uri == "drone://available" {
            let configured: Vec<Value> = {
                let mut items = Vec::new();
                for entry in self.services.drones.iter() {
                    items.push(serde_json::to_value(entry.value().status().await).unwrap_or_default());
                }
                items
            };
            json!({
                "configured": configured,
                "detected": self.services.discovery.cached().iter().map(|d| json!({
                    "ip": d.ip,
                    "battery_pct": d.battery_pct,
                })).collect::<Vec<_>>(),
            })
        } else if let Some(drone_id) = uri.strip_prefix("drone://status/") {
            let id = DroneId::parse(drone_id).map_err(|e| parse_error(e.to_string()))?;
            let supervisor = self
                .services
                .drones
                .get(&id)
                .map(|e| Arc::clone(e.value()))
                .ok_or_else(|| parse_error(format!("unknown drone id {drone_id:?}")))?;
            serde_json::to_value(supervisor.status().await).unwrap_or_default()
        } else if uri == "system://status" {
            let stats = self.services.router.stats().await;
            json!({
                "drones_registered": self.services.drones.len(),
                "discovery_scanning": self.services.discovery.is_scanning(),
                "started_at": self.services.started_at,
                "router_stats": stats,
            })
        } else {
            return Err(parse_error(format!("unknown resource uri {uri:?}")));
        };

        Ok(json!({"contents": [{"uri": uri, "mimeType": "application/json", "text": contents.to_string()}]}))
    }
}
