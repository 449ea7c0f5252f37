// simulation_engine/mod.rs
pub mod interface;
pub mod lanes;
pub mod simulation;

pub use interface::{SensorReader, SignalActuator, TrafficSensors, TrafficSimulation};
pub use lanes::IntersectionLayout;
pub use simulation::{SyntheticIntersection, SyntheticSettings};
