//! Pose, velocity, and flight-bounds geometry.
//!
//! Positions are local Cartesian centimeters (x, y, z), not geographic
//! coordinates — Tello-class hardware reports position relative to its
//! takeoff point, not lat/lon.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub yaw_deg: f64,
}

impl Pose {
    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl Velocity {
    pub fn magnitude(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy + self.vz * self.vz).sqrt()
    }
}

/// Axis-aligned rectangular flight bounds (cm). Movement that would cross
/// these is rejected pre-flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlightBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for FlightBounds {
    fn default() -> Self {
        Self {
            min_x: -500.0,
            max_x: 500.0,
            min_y: -500.0,
            max_y: 500.0,
            min_z: 0.0,
            max_z: 500.0,
        }
    }
}

impl FlightBounds {
    /// Validate the bounds themselves: every `min` must be strictly less
    /// than its `max`.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_x >= self.max_x {
            errors.push(format!("bounds.x: min ({}) >= max ({})", self.min_x, self.max_x));
        }
        if self.min_y >= self.max_y {
            errors.push(format!("bounds.y: min ({}) >= max ({})", self.min_y, self.max_y));
        }
        if self.min_z >= self.max_z {
            errors.push(format!("bounds.z: min ({}) >= max ({})", self.min_z, self.max_z));
        }
        errors
    }

    pub fn contains(&self, p: (f64, f64, f64)) -> bool {
        let (x, y, z) = p;
        x >= self.min_x
            && x <= self.max_x
            && y >= self.min_y
            && y <= self.max_y
            && z >= self.min_z
            && z <= self.max_z
    }

    /// Check a straight-line segment for full containment, sampling every
    /// `step_cm` (curves are sampled at
    /// 10 cm intervals"). Returns the first out-of-bounds point found, if
    /// any.
    pub fn check_segment(
        &self,
        from: (f64, f64, f64),
        to: (f64, f64, f64),
        step_cm: f64,
    ) -> Result<(), (f64, f64, f64)> {
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let dz = to.2 - from.2;
        let length = (dx * dx + dy * dy + dz * dz).sqrt();
        let steps = ((length / step_cm).ceil() as usize).max(1);

        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let point = (from.0 + t * dx, from.1 + t * dy, from.2 + t * dz);
            if !self.contains(point) {
                return Err(point);
            }
        }
        Ok(())
    }
}

/// Resolve the destination of a directional move (REST
/// `/drone/move`). Distances are centimeters, yaw in degrees (0 = drone's
/// forward axis aligned with world +y, counterclockwise positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Unit displacement in the drone's body frame before yaw rotation:
    /// x = right/left, y = forward/back, z = up/down. At yaw 0 the body
    /// frame lines up with the world frame, so "right" moves world +x and
    /// "forward" moves world +y.
    pub fn unit_body_vector(self) -> (f64, f64, f64) {
        match self {
            Direction::Forward => (0.0, 1.0, 0.0),
            Direction::Back => (0.0, -1.0, 0.0),
            Direction::Left => (-1.0, 0.0, 0.0),
            Direction::Right => (1.0, 0.0, 0.0),
            Direction::Up => (0.0, 0.0, 1.0),
            Direction::Down => (0.0, 0.0, -1.0),
        }
    }
}

/// Project a body-frame direction + distance into the world frame, given
/// the drone's current yaw (degrees, counterclockwise from the body's
/// forward axis).
pub fn project_move(pose: &Pose, direction: Direction, distance_cm: f64) -> (f64, f64, f64) {
    let (bx, by, bz) = direction.unit_body_vector();
    let yaw = pose.yaw_deg.to_radians();
    let (sin, cos) = yaw.sin_cos();
    let wx = pose.x + distance_cm * (bx * cos - by * sin);
    let wy = pose.y + distance_cm * (bx * sin + by * cos);
    let wz = pose.z + distance_cm * bz;
    (wx, wy, wz)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl RotateDirection {
    pub fn signed_angle(self, angle_deg: f64) -> f64 {
        match self {
            RotateDirection::Clockwise => angle_deg,
            RotateDirection::CounterClockwise => -angle_deg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_reject_min_ge_max() {
        let bounds = FlightBounds {
            min_x: 10.0,
            max_x: 10.0,
            ..Default::default()
        };
        assert!(!bounds.validate().is_empty());
    }

    #[test]
    fn segment_check_finds_first_violation() {
        let bounds = FlightBounds {
            min_x: -100.0,
            max_x: 100.0,
            min_y: -100.0,
            max_y: 100.0,
            min_z: 0.0,
            max_z: 200.0,
        };
        let result = bounds.check_segment((0.0, 0.0, 50.0), (150.0, 0.0, 50.0), 10.0);
        assert!(result.is_err());
    }

    #[test]
    fn project_move_respects_yaw() {
        let pose = Pose {
            yaw_deg: 90.0,
            ..Default::default()
        };
        let (x, y, _) = project_move(&pose, Direction::Forward, 100.0);
        assert!((x - -100.0).abs() < 1e-6);
        assert!((y - 0.0).abs() < 1e-6);
    }

    #[test]
    fn right_moves_along_world_x_at_zero_yaw() {
        let pose = Pose {
            x: 80.0,
            y: 0.0,
            z: 100.0,
            ..Default::default()
        };
        let (x, y, z) = project_move(&pose, Direction::Right, 50.0);
        assert!((x - 130.0).abs() < 1e-6);
        assert!((y - 0.0).abs() < 1e-6);
        assert!((z - 100.0).abs() < 1e-6);

        let bounds = FlightBounds {
            min_x: -100.0,
            max_x: 100.0,
            ..Default::default()
        };
        assert!(bounds.check_segment(pose.position(), (x, y, z), 10.0).is_err());
    }
}
