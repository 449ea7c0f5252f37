pub mod cost_model;
pub mod traffic_state;

// Re-export the items callers reach for most
pub use cost_model::{CostModel, CostModelGenerator, CostModelSettings, DecisionStrategy};
pub use traffic_state::{IntersectionState, RawReadings};
