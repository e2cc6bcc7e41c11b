//! The structured command produced by the NL parser or by REST handlers
//! that bypass it. The router consumes `Intent` uniformly
//! regardless of origin.

use crate::ids::DroneId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Connect,
    Disconnect,
    Takeoff,
    Land,
    Move,
    Rotate,
    Altitude,
    Photo,
    Streaming,
    Detection,
    Tracking,
    LearningData,
    Emergency,
    Status,
}

/// A slot value in canonical units (cm, degrees, cm/s) — never raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotValue {
    Number(f64),
    Text(String),
}

impl SlotValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SlotValue::Number(n) => Some(*n),
            SlotValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SlotValue::Text(s) => Some(s.as_str()),
            SlotValue::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub action: Action,
    pub parameters: HashMap<String, SlotValue>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub action: Action,
    pub parameters: HashMap<String, SlotValue>,
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub missing_slots: Vec<String>,
    pub target_drone: Option<DroneId>,
}

impl Intent {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            parameters: HashMap::new(),
            confidence: 1.0,
            alternatives: Vec::new(),
            missing_slots: Vec::new(),
            target_drone: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: SlotValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_target(mut self, drone: DroneId) -> Self {
        self.target_drone = Some(drone);
        self
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(SlotValue::as_number)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(SlotValue::as_text)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_slots.is_empty()
    }
}

/// Required slots per action, used both by the NL parser (to compute
/// `missing_slots`) and by REST/MCP handlers that build an `Intent`
/// directly from typed request bodies.
pub fn required_slots(action: Action) -> &'static [&'static str] {
    match action {
        Action::Move => &["direction", "distance"],
        Action::Rotate => &["direction", "angle"],
        Action::Altitude => &["target"],
        Action::Tracking => &["model_id"],
        Action::Connect
        | Action::Disconnect
        | Action::Takeoff
        | Action::Land
        | Action::Photo
        | Action::Streaming
        | Action::Detection
        | Action::LearningData
        | Action::Emergency
        | Action::Status => &[],
    }
}
