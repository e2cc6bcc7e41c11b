//! Structured error taxonomy.
//!
//! Every failure path in the control plane resolves to a [`FleetError`]
//! rather than an ad-hoc string or a bare HTTP status: callers (REST, MCP,
//! the router's retry logic) all dispatch on `kind` and `code`, not on
//! message text.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    State,
    Safety,
    Transport,
    Hardware,
    Security,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Wait,
    RestartDrone,
    ChargeBattery,
    Reconfigure,
    ManualIntervention,
    Fallback,
}

/// Stable numeric error codes. Grouped by taxonomy so a caller can bucket
/// on the hundreds digit without matching on `kind` directly. The wire
/// representation (REST/MCP JSON `code` field) is the `SCREAMING_SNAKE_CASE`
/// name from [`ErrorCode::as_str`], not the numeric discriminant —
/// clients match on that string, not the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidParameter = 1001,
    OutOfRange = 1002,
    MalformedId = 1003,
    SchemaMismatch = 1004,

    NotConnected = 2001,
    NotFlying = 2002,
    AlreadyFlying = 2003,
    Busy = 2004,
    InvalidTransition = 2005,

    BoundsViolation = 3001,
    BatteryLow = 3002,
    VelocityExceeded = 3003,
    WindLimit = 3004,

    Unreachable = 4001,
    Timeout = 4002,
    ProtocolError = 4003,

    SensorFault = 5001,
    MotorFault = 5002,
    FirmwareMismatch = 5003,

    ForbiddenPattern = 6001,
    Unauthorized = 6002,
    RateLimitExceeded = 6003,

    Overload = 7001,
    ResourceExhausted = 7002,
    Internal = 7003,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            InvalidParameter | OutOfRange | MalformedId | SchemaMismatch => ErrorKind::Validation,
            NotConnected | NotFlying | AlreadyFlying | Busy | InvalidTransition => {
                ErrorKind::State
            }
            BoundsViolation | BatteryLow | VelocityExceeded | WindLimit => ErrorKind::Safety,
            Unreachable | Timeout | ProtocolError => ErrorKind::Transport,
            SensorFault | MotorFault | FirmwareMismatch => ErrorKind::Hardware,
            ForbiddenPattern | Unauthorized | RateLimitExceeded => ErrorKind::Security,
            Overload | ResourceExhausted | Internal => ErrorKind::System,
        }
    }

    /// The `SCREAMING_SNAKE_CASE` string clients match on (e.g.
    /// `"SAFETY_BOUNDS"` for a rejected move).
    pub fn as_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidParameter => "VALIDATION_INVALID_PARAMETER",
            OutOfRange => "VALIDATION_OUT_OF_RANGE",
            MalformedId => "VALIDATION_MALFORMED_ID",
            SchemaMismatch => "VALIDATION_SCHEMA_MISMATCH",
            NotConnected => "STATE_NOT_CONNECTED",
            NotFlying => "STATE_NOT_FLYING",
            AlreadyFlying => "STATE_ALREADY_FLYING",
            Busy => "STATE_BUSY",
            InvalidTransition => "STATE_INVALID_TRANSITION",
            BoundsViolation => "SAFETY_BOUNDS",
            BatteryLow => "SAFETY_BATTERY",
            VelocityExceeded => "SAFETY_VELOCITY",
            WindLimit => "SAFETY_WIND",
            Unreachable => "TRANSPORT_UNREACHABLE",
            Timeout => "TRANSPORT_TIMEOUT",
            ProtocolError => "TRANSPORT_PROTOCOL",
            SensorFault => "HARDWARE_SENSOR_FAULT",
            MotorFault => "HARDWARE_MOTOR_FAULT",
            FirmwareMismatch => "HARDWARE_FIRMWARE_MISMATCH",
            ForbiddenPattern => "SECURITY_FORBIDDEN_PATTERN",
            Unauthorized => "SECURITY_UNAUTHORIZED",
            RateLimitExceeded => "SECURITY_RATE_LIMIT",
            Overload => "SYSTEM_OVERLOAD",
            ResourceExhausted => "SYSTEM_RESOURCE_EXHAUSTED",
            Internal => "SYSTEM_INTERNAL",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity used when a rejection is recorded as a [`SafetyViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The structured error every fallible operation in the control plane
/// returns. `Display`/`Error` render the technical message; the user
/// message is carried separately for REST/MCP-facing payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub user_message: String,
    pub technical_message: String,
    pub suggestions: Vec<String>,
    pub recovery_actions: Vec<RecoveryAction>,
}

impl FleetError {
    pub fn new(code: ErrorCode, technical_message: impl Into<String>) -> Self {
        let technical_message = technical_message.into();
        let user_message = default_user_message(code);
        Self {
            kind: code.kind(),
            code,
            user_message,
            technical_message,
            suggestions: Vec::new(),
            recovery_actions: default_recovery_actions(code),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::Unreachable | ErrorCode::Timeout)
    }
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.kind, self.code, self.technical_message)
    }
}

impl std::error::Error for FleetError {}

fn default_user_message(code: ErrorCode) -> String {
    use ErrorCode::*;
    match code {
        InvalidParameter => "One or more parameters were invalid.",
        OutOfRange => "A parameter was outside its allowed range.",
        MalformedId => "The drone identifier was malformed.",
        SchemaMismatch => "The request did not match the expected schema.",
        NotConnected => "The drone is not connected.",
        NotFlying => "The drone is not currently flying.",
        AlreadyFlying => "The drone is already flying.",
        Busy => "The drone is busy with another task.",
        InvalidTransition => "That operation is not valid in the drone's current state.",
        BoundsViolation => "The requested movement would leave the configured flight bounds.",
        BatteryLow => "Battery is too low for this operation.",
        VelocityExceeded => "The requested velocity exceeds the configured limit.",
        WindLimit => "Conditions exceed the configured wind limit.",
        Unreachable => "The drone could not be reached.",
        Timeout => "The drone did not respond in time.",
        ProtocolError => "The drone returned an unexpected response.",
        SensorFault => "A sensor fault was reported by the drone.",
        MotorFault => "A motor fault was reported by the drone.",
        FirmwareMismatch => "The drone's firmware is incompatible.",
        ForbiddenPattern => "The request was rejected by a security filter.",
        Unauthorized => "You are not authorized to perform this action.",
        RateLimitExceeded => "Too many requests; please slow down.",
        Overload => "The system is overloaded; please retry shortly.",
        ResourceExhausted => "A system resource was exhausted.",
        Internal => "An internal error occurred.",
    }
    .to_string()
}

fn default_recovery_actions(code: ErrorCode) -> Vec<RecoveryAction> {
    use ErrorCode::*;
    use RecoveryAction::*;
    match code {
        Unreachable | Timeout => vec![Retry, Wait],
        ProtocolError => vec![Retry, RestartDrone],
        BatteryLow => vec![ChargeBattery, Wait],
        BoundsViolation | VelocityExceeded | WindLimit => vec![ManualIntervention],
        SensorFault | MotorFault | FirmwareMismatch => vec![RestartDrone, ManualIntervention],
        InvalidParameter | OutOfRange | MalformedId | SchemaMismatch => vec![Reconfigure],
        NotConnected => vec![Retry, Fallback],
        NotFlying | AlreadyFlying | Busy | InvalidTransition => vec![Wait],
        ForbiddenPattern | Unauthorized | RateLimitExceeded => vec![ManualIntervention],
        Overload | ResourceExhausted => vec![Wait, Retry],
        Internal => vec![ManualIntervention],
    }
}

/// A recorded incident where a pre-check or runtime guard rejected an
/// operation. Owned by `DroneRecord.safety_violations` as a bounded ring
/// buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub kind: ErrorCode,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub severity: Severity,
    pub detail: String,
}

impl SafetyViolation {
    pub fn new(kind: ErrorCode, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            kind,
            ts: chrono::Utc::now(),
            severity,
            detail: detail.into(),
        }
    }
}

/// All errors produced by config loading/validation:
/// enumerates every failure rather than stopping at the first.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("config validation failed with {} error(s): {}", .0.len(), .0.join("; "))]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    pub fn ok_or(errors: Vec<String>) -> Result<(), ValidationError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_kind_roundtrip_is_consistent() {
        assert_eq!(ErrorCode::Timeout.kind(), ErrorKind::Transport);
        assert_eq!(ErrorCode::BoundsViolation.kind(), ErrorKind::Safety);
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = FleetError::new(ErrorCode::Timeout, "no response within 7s");
        assert!(err.is_retryable());
        let err = FleetError::new(ErrorCode::BoundsViolation, "x out of bounds");
        assert!(!err.is_retryable());
    }

    #[test]
    fn bounds_violation_serializes_to_safety_bounds() {
        let value = serde_json::to_value(ErrorCode::BoundsViolation).unwrap();
        assert_eq!(value, serde_json::json!("SAFETY_BOUNDS"));
    }
}
