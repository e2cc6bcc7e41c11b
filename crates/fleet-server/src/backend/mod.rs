//! Concrete [`fleet_core::DroneCapability`] backends: real hardware over
//! UDP, and an in-process kinematic simulation. `DroneFactory` is the only
//! place that constructs either directly; everything else only ever sees
//! `Box<dyn DroneCapability>`.

pub mod real;
pub mod simulated;

pub use real::{RealDroneAdapter, RealDroneAdapterConfig};
pub use simulated::{SimulatedDroneAdapter, SimulatedDroneAdapterConfig};
