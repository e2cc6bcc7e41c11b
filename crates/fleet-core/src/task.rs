//! Long-running supervisor tasks: precise altitude hold,
//! waypoint plans, and vision tracking holds.

use crate::capability::AltitudeMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    AltitudeHold {
        target_cm: f64,
        mode: AltitudeMode,
        timeout_secs: u64,
    },
    WaypointPlan {
        waypoints: Vec<Waypoint>,
        timeout_secs: Option<u64>,
    },
    TrackingHold {
        model_id: String,
        max_empty_frames: u32,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::AltitudeHold { .. } => "altitude_hold",
            TaskKind::WaypointPlan { .. } => "waypoint_plan",
            TaskKind::TrackingHold { .. } => "tracking_hold",
        }
    }

    /// Whether a new task of this kind may preempt an already-running task.
    /// Only emergency stop (handled outside the task system) always
    /// preempts; otherwise only an idle/terminal slot can accept new work.
    pub fn may_preempt(&self, existing_status: TaskStatus) -> bool {
        existing_status.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: TaskStatus::Pending,
            progress: 0.0,
            started_at: now,
            last_update_at: now,
        }
    }

    pub fn touch(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
        self.last_update_at = Utc::now();
    }

    pub fn finish(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.last_update_at = Utc::now();
        if status == TaskStatus::Completed {
            self.progress = 1.0;
        }
    }
}
