// control_system/mod.rs
pub mod overrides;
pub mod solver;
pub mod traffic_light_controller;

pub use overrides::{DetectorSet, OverrideDetector, OverrideSignal};
pub use solver::{Assignment, Resolution, SolverAdapter, SolverConfig};
pub use traffic_light_controller::{
    ControllerSettings, PhaseDecisionController, PhaseState, TickOutcome,
};
