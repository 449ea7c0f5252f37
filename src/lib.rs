pub mod config;
pub mod control_system;
pub mod data_structures;
pub mod engine;
pub mod errors;
pub mod flow_analyzer;
pub mod global_variables;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;
