// engine/mod.rs
pub mod simulation;

pub use simulation::{synthetic_engine, EpisodeReport, SimulationEngine};
