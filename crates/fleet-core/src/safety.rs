//! Safety configuration and the bounded violation ring buffer.

use crate::errors::SafetyViolation;
use crate::geometry::FlightBounds;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub min_battery: u8,
    pub emergency_battery: u8,
    pub max_flight_time_secs: u64,
    pub bounds: FlightBounds,
    pub max_velocity_cmps: f64,
    pub wind_limit_mps: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_battery: 30,
            emergency_battery: 10,
            max_flight_time_secs: 15 * 60,
            bounds: FlightBounds::default(),
            max_velocity_cmps: 100.0,
            wind_limit_mps: 8.0,
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.bounds.validate();
        if self.min_battery > 100 {
            errors.push(format!("safety.min_battery ({}) must be <= 100", self.min_battery));
        }
        if self.emergency_battery > self.min_battery {
            errors.push(
                "safety.emergency_battery must be <= safety.min_battery".to_string(),
            );
        }
        if self.max_flight_time_secs == 0 {
            errors.push("safety.max_flight_time_secs must be > 0".to_string());
        }
        if self.max_velocity_cmps <= 0.0 {
            errors.push("safety.max_velocity_cmps must be > 0".to_string());
        }
        errors
    }
}

/// Fixed-capacity FIFO of the most recent safety violations for a single
/// drone.
#[derive(Debug, Clone)]
pub struct ViolationRingBuffer {
    capacity: usize,
    entries: VecDeque<SafetyViolation>,
}

impl ViolationRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, violation: SafetyViolation) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(violation);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SafetyViolation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_vec(&self) -> Vec<SafetyViolation> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ViolationRingBuffer {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, Severity};

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let mut buf = ViolationRingBuffer::new(2);
        buf.push(SafetyViolation::new(ErrorCode::BoundsViolation, Severity::Low, "a"));
        buf.push(SafetyViolation::new(ErrorCode::BoundsViolation, Severity::Low, "b"));
        buf.push(SafetyViolation::new(ErrorCode::BoundsViolation, Severity::Low, "c"));
        let details: Vec<_> = buf.iter().map(|v| v.detail.as_str()).collect();
        assert_eq!(details, vec!["b", "c"]);
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(SafetyConfig::default().validate().is_empty());
    }

    #[test]
    fn emergency_battery_above_min_is_rejected() {
        let cfg = SafetyConfig {
            emergency_battery: 50,
            min_battery: 30,
            ..Default::default()
        };
        assert!(!cfg.validate().is_empty());
    }
}
