use thiserror::Error;

/// A sensor query that could not be answered. Always recovered locally as a zero reading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensingFault {
    #[error("Unknown lane: {0}")]
    UnknownLane(String),
    #[error("Unknown edge: {0}")]
    UnknownEdge(String),
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),
    #[error("Sensor backend error: {0}")]
    Backend(String),
}

/// The simulator refused or failed an actuation command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuationFault {
    #[error("Actuation rejected: {0}")]
    Rejected(String),
    #[error("Actuator backend error: {0}")]
    Backend(String),
}

/// The simulator could not advance; ends the episode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("Simulation closed: {0}")]
    Closed(String),
    #[error("Simulation backend error: {0}")]
    Backend(String),
}

/// Solver adapter failures. The controller fails open on any of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Cost model has no variables")]
    EmptyModel,
    #[error("Too many variables for {solver}: {count} (limit {limit})")]
    TooManyVariables {
        solver: String,
        count: usize,
        limit: usize,
    },
    #[error("Solver returned {got} values for {expected} variables")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Solver backend error: {0}")]
    Backend(String),
}

/// Startup-fatal configuration problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Penalty {penalty} does not dominate the reward range (needs at least {required})")]
    PenaltyNotDominant { penalty: f64, required: f64 },
    #[error("Unknown signal mode: {0}")]
    UnknownSignalMode(String),
    #[error("Unknown approach: {0}")]
    UnknownApproach(String),
    #[error("Invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, value: impl ToString, reason: &'static str) -> Self {
        ConfigError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

/// History sink failures. Logged, never fatal to a run.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("AMQP error: {0}")]
    Amqp(#[from] amiquip::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level error for the binaries.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
