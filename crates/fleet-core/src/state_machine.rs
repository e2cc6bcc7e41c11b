//! Per-drone connection/flight state machine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightState {
    Landed,
    TakingOff,
    Flying,
    Landing,
    Emergency,
}

/// The operations a drone capability exposes, used both to drive the state
/// machine and to label per-operation timeouts/bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    Disconnect,
    Takeoff,
    Land,
    EmergencyStop,
    Move,
    Rotate,
    SetAltitude,
    GetTelemetry,
    CaptureFrame,
    StartStream,
    StopStream,
}

impl Operation {
    /// Operations permitted regardless of flight state.
    pub fn exempt_from_flight_requirement(self) -> bool {
        matches!(
            self,
            Operation::Takeoff
                | Operation::Connect
                | Operation::Disconnect
                | Operation::EmergencyStop
        )
    }

    /// Whether the operation requires the drone to be actively flying.
    pub fn requires_flight(self) -> bool {
        matches!(
            self,
            Operation::Move | Operation::Rotate | Operation::SetAltitude | Operation::Land
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub connection: ConnectionState,
    pub flight: FlightState,
}

impl StateSnapshot {
    pub fn landed_disconnected() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            flight: FlightState::Landed,
        }
    }

    /// Invariant 1: `flight != Landed` implies `connection == Connected`.
    pub fn invariant_holds(&self) -> bool {
        self.flight == FlightState::Landed || self.connection == ConnectionState::Connected
    }
}

/// A single permitted transition edge. `None` for `to_flight`/`to_connection`
/// means "unchanged".
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub op: Operation,
    pub from: StateSnapshot,
    pub to_connection: ConnectionState,
    pub to_flight: FlightState,
}

/// Resolve the next state for `op` given the current snapshot, or `None`
/// if the transition is forbidden and the caller
/// should surface `InvalidTransition`.
///
/// Idempotent-on-terminal-state operations are handled by the
/// caller before reaching this function: `Connect` while already
/// `Connected`, `Land` while already `Landed`.
pub fn next_state(current: StateSnapshot, op: Operation) -> Option<StateSnapshot> {
    use ConnectionState::*;
    use FlightState::*;

    match (op, current.connection, current.flight) {
        (Operation::Connect, Disconnected, Landed) => Some(StateSnapshot {
            connection: Connected,
            flight: Landed,
        }),
        (Operation::Connect, Error, Landed) => Some(StateSnapshot {
            connection: Connected,
            flight: Landed,
        }),
        (Operation::Disconnect, Connected, Landed) => Some(StateSnapshot {
            connection: Disconnected,
            flight: Landed,
        }),
        (Operation::Takeoff, Connected, Landed) => Some(StateSnapshot {
            connection: Connected,
            flight: TakingOff,
        }),
        // Internal: adapter reports airborne once takeoff completes.
        (Operation::GetTelemetry, Connected, TakingOff) => Some(StateSnapshot {
            connection: Connected,
            flight: Flying,
        }),
        (Operation::Land, Connected, Flying) => Some(StateSnapshot {
            connection: Connected,
            flight: Landing,
        }),
        (Operation::GetTelemetry, Connected, Landing) => Some(StateSnapshot {
            connection: Connected,
            flight: Landed,
        }),
        (Operation::Move, Connected, Flying) => Some(current),
        (Operation::Rotate, Connected, Flying) => Some(current),
        (Operation::SetAltitude, Connected, Flying) => Some(current),
        (Operation::EmergencyStop, _, Flying)
        | (Operation::EmergencyStop, _, TakingOff)
        | (Operation::EmergencyStop, _, Landing) => Some(StateSnapshot {
            connection: current.connection,
            flight: Emergency,
        }),
        // Manual clear from emergency back to landed, operator-initiated.
        (Operation::Connect, _, Emergency) => Some(StateSnapshot {
            connection: Connected,
            flight: Landed,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takeoff_requires_connected_landed() {
        let connecting = StateSnapshot {
            connection: ConnectionState::Connecting,
            flight: FlightState::Landed,
        };
        assert!(next_state(connecting, Operation::Takeoff).is_none());

        let ready = StateSnapshot {
            connection: ConnectionState::Connected,
            flight: FlightState::Landed,
        };
        assert!(next_state(ready, Operation::Takeoff).is_some());
    }

    #[test]
    fn emergency_preempts_from_any_airborne_state() {
        let flying = StateSnapshot {
            connection: ConnectionState::Connected,
            flight: FlightState::Flying,
        };
        let next = next_state(flying, Operation::EmergencyStop).unwrap();
        assert_eq!(next.flight, FlightState::Emergency);
    }

    #[test]
    fn invariant_rejects_flying_while_disconnected() {
        let bad = StateSnapshot {
            connection: ConnectionState::Disconnected,
            flight: FlightState::Flying,
        };
        assert!(!bad.invariant_holds());
    }
}
