//! Pure domain logic for the drone fleet control plane: data model, error
//! taxonomy, the capability contract shared by real and simulated
//! backends, safety bounds, the per-drone state machine, long-running
//! tasks, and the natural-language command parser.
//!
//! No networking, no I/O — everything here is deterministic and
//! unit-testable without a runtime.

pub mod capability;
pub mod config_types;
pub mod errors;
pub mod geometry;
pub mod ids;
pub mod intent;
pub mod nlp;
pub mod safety;
pub mod state_machine;
pub mod task;

pub use capability::{AltitudeMode, DroneCapability, Frame, TelemetrySample};
pub use config_types::{DroneMode, FleetConfig};
pub use errors::{ErrorCode, ErrorKind, FleetError, RecoveryAction, SafetyViolation, Severity, ValidationError};
pub use geometry::{Direction, FlightBounds, Pose, RotateDirection, Velocity};
pub use ids::{DroneId, InvalidDroneId, TaskId};
pub use intent::{Action, Alternative, Intent, SlotValue};
pub use nlp::NlParser;
pub use safety::SafetyConfig;
pub use state_machine::{ConnectionState, FlightState, Operation, StateSnapshot};
pub use task::{TaskKind, TaskRecord, TaskStatus, Waypoint};
