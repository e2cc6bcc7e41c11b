//! WebSocket streaming for real-time drone updates.
//!
//! A single task per connection selects between the client's inbound
//! frames and its current telemetry subscription, so `subscribe_drone`
//! can swap the active filter without a second task or a shared mutex.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use fleet_core::DroneId;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::services::Services;
use crate::telemetry::TelemetryMessage;

pub async fn ws_handler(ws: WebSocketUpgrade, State(services): State<Arc<Services>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, services))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SubscribeDrone { drone_id: String },
    GetDroneStatus { drone_id: String },
    Ping,
}

async fn handle_socket(mut socket: WebSocket, services: Arc<Services>) {
    let mut subscription = services.telemetry.subscribe(None);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_message(&mut socket, &services, &mut subscription, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            telemetry = subscription.recv() => {
                match telemetry {
                    Some(msg) => {
                        if socket.send(Message::Text(render(msg).to_string())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

fn render(msg: TelemetryMessage) -> serde_json::Value {
    match msg {
        TelemetryMessage::Snapshot { drone_id, status, timestamp } => json!({
            "type": "drone_status_update",
            "drone_id": drone_id,
            "status": status,
            "timestamp": timestamp,
        }),
        TelemetryMessage::Event { drone_id, kind, payload, timestamp } => json!({
            "type": "event",
            "drone_id": drone_id,
            "kind": kind,
            "payload": payload,
            "timestamp": timestamp,
        }),
    }
}

/// Returns `false` when the connection should close.
async fn handle_client_message(
    socket: &mut WebSocket,
    services: &Arc<Services>,
    subscription: &mut crate::telemetry::SubscriberHandle,
    text: &str,
) -> bool {
    let Ok(parsed) = serde_json::from_str::<ClientMessage>(text) else {
        return true;
    };
    match parsed {
        ClientMessage::Ping => socket
            .send(Message::Text(json!({"type": "pong"}).to_string()))
            .await
            .is_ok(),
        ClientMessage::SubscribeDrone { drone_id } => {
            if let Ok(id) = DroneId::parse(drone_id) {
                *subscription = services.telemetry.subscribe(Some(id));
            }
            true
        }
        ClientMessage::GetDroneStatus { drone_id } => {
            let Ok(id) = DroneId::parse(drone_id) else {
                return true;
            };
            let Some(supervisor) = services.drones.get(&id).map(|e| Arc::clone(e.value())) else {
                return true;
            };
            let status = supervisor.status().await;
            let payload = json!({
                "type": "drone_status_update",
                "drone_id": id,
                "status": status,
                "timestamp": chrono::Utc::now(),
            });
            socket.send(Message::Text(payload.to_string())).await.is_ok()
        }
    }
}
