//! The `VisionService` collaborator contract. Detection/tracking
//! inference, model storage, and dataset collection live entirely
//! outside this crate; `DroneSupervisor`'s tracking-hold task only ever
//! calls through this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Detection {
    /// Horizontal offset of the detected target from frame center, in
    /// [-1.0, 1.0].
    pub offset_x: f64,
    /// Vertical offset of the detected target from frame center, in
    /// [-1.0, 1.0].
    pub offset_y: f64,
    pub confidence: f64,
}

#[async_trait]
pub trait VisionService: Send + Sync {
    async fn detect(&self, frame: &[u8], model_id: &str, threshold: f64) -> Vec<Detection>;
    async fn start_tracking(&self, drone_id: &str, model_id: &str);
    async fn stop_tracking(&self, drone_id: &str);
    /// Poll the most recent detection for an active tracking session, or
    /// `None` for an empty frame (the supervisor counts consecutive
    /// `None`s toward the "loses target" threshold).
    async fn poll_tracking(&self, drone_id: &str) -> Option<Detection>;
}

/// Deterministic no-op implementation: detects nothing, tracking never
/// produces a hit. Exists so `DroneSupervisor::tracking_hold` and the
/// `detection`/`tracking` MCP tools have something real to call against
/// in tests, without pulling in any inference code.
pub struct NoopVisionService;

#[async_trait]
impl VisionService for NoopVisionService {
    async fn detect(&self, _frame: &[u8], _model_id: &str, _threshold: f64) -> Vec<Detection> {
        Vec::new()
    }

    async fn start_tracking(&self, _drone_id: &str, _model_id: &str) {}

    async fn stop_tracking(&self, _drone_id: &str) {}

    async fn poll_tracking(&self, _drone_id: &str) -> Option<Detection> {
        None
    }
}
