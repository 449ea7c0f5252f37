//! JSON configuration for the binaries. Every section falls back to defaults, so a partial
//! file (or none at all) is valid as long as what it does set passes validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::control_system::overrides::{
    DetectorSet, DilemmaZoneDetector, EmergencyDetector, OverrideDetector,
    TransitPriorityDetector,
};
use crate::control_system::solver::{SolverAdapter, SolverConfig};
use crate::control_system::traffic_light_controller::{
    ControllerSettings, HoldTiers, PhaseDecisionController,
};
use crate::data_structures::SignalMode;
use crate::errors::ConfigError;
use crate::flow_analyzer::cost_model::{CostModelGenerator, CostModelSettings, DecisionStrategy};
use crate::flow_analyzer::traffic_state::IntersectionState;
use crate::global_variables::{
    AMQP_URL, EMERGENCY_CLEARANCE, MAX_QUEUE_PER_APPROACH, PENALTY, QUEUE_SIGNAL_HISTORY,
    REWARD_SCALE, SAFETY_EXTENSION, STRAIGHT_FRACTION, TICK_SECONDS, TRANSIT_EXTENSION,
    YELLOW_DURATION,
};
use crate::simulation_engine::lanes::IntersectionLayout;
use crate::simulation_engine::simulation::SyntheticSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub simulation: SimulationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    pub emergency: Option<EmergencyDetector>,
    pub dilemma_zone: Option<DilemmaZoneDetector>,
    pub transit: Option<TransitPriorityDetector>,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            emergency: Some(EmergencyDetector::default()),
            dilemma_zone: Some(DilemmaZoneDetector::default()),
            transit: Some(TransitPriorityDetector::default()),
        }
    }
}

impl DetectorsConfig {
    pub fn build(&self) -> DetectorSet {
        DetectorSet {
            emergency: self
                .emergency
                .clone()
                .map(|d| Box::new(d) as Box<dyn OverrideDetector>),
            dilemma_zone: self
                .dilemma_zone
                .clone()
                .map(|d| Box::new(d) as Box<dyn OverrideDetector>),
            transit: self
                .transit
                .clone()
                .map(|d| Box::new(d) as Box<dyn OverrideDetector>),
        }
    }
}

/// Controller, cost model and solver settings. Mode names are kept as strings here and
/// parsed during validation so a typo surfaces as a configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub tick_seconds: f64,
    pub yellow_duration: f64,
    pub emergency_clearance: f64,
    pub safety_extension: f64,
    pub transit_extension: f64,
    pub hold: HoldTiers,
    pub default_mode: String,
    pub straight_fraction: f64,
    pub penalty: f64,
    pub reward_scale: f64,
    pub mode_weights: BTreeMap<String, f64>,
    pub max_queue_per_approach: u32,
    pub strategy: DecisionStrategy,
    pub solver: SolverConfig,
    pub detectors: DetectorsConfig,
    pub layout: IntersectionLayout,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: TICK_SECONDS,
            yellow_duration: YELLOW_DURATION,
            emergency_clearance: EMERGENCY_CLEARANCE,
            safety_extension: SAFETY_EXTENSION,
            transit_extension: TRANSIT_EXTENSION,
            hold: HoldTiers::default(),
            default_mode: "NsStraight".to_string(),
            straight_fraction: STRAIGHT_FRACTION,
            penalty: PENALTY,
            reward_scale: REWARD_SCALE,
            mode_weights: BTreeMap::new(),
            max_queue_per_approach: MAX_QUEUE_PER_APPROACH,
            strategy: DecisionStrategy::Reactive,
            solver: SolverConfig::default(),
            detectors: DetectorsConfig::default(),
            layout: IntersectionLayout::default(),
        }
    }
}

fn parse_mode(name: &str) -> Result<SignalMode, ConfigError> {
    name.parse()
        .map_err(|_| ConfigError::UnknownSignalMode(name.to_string()))
}

impl ControllerConfig {
    pub fn controller_settings(&self) -> Result<ControllerSettings, ConfigError> {
        let settings = ControllerSettings {
            tick_seconds: self.tick_seconds,
            yellow_duration: self.yellow_duration,
            emergency_clearance: self.emergency_clearance,
            safety_extension: self.safety_extension,
            transit_extension: self.transit_extension,
            hold: self.hold.clone(),
            default_mode: parse_mode(&self.default_mode)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn cost_model_settings(&self) -> Result<CostModelSettings, ConfigError> {
        let mode_weights = self
            .mode_weights
            .iter()
            .map(|(name, &weight)| Ok((parse_mode(name)?, weight)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
        let settings = CostModelSettings {
            penalty: self.penalty,
            reward_scale: self.reward_scale,
            mode_weights,
            max_queue_per_approach: self.max_queue_per_approach,
            strategy: self.strategy,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller_settings()?;
        self.cost_model_settings()?;
        IntersectionState::new(self.straight_fraction)?;
        self.solver.build()?;
        Ok(())
    }

    /// Controller as configured.
    pub fn build_controller(&self) -> Result<PhaseDecisionController, ConfigError> {
        self.build_controller_with(self.strategy, self.solver.build()?)
    }

    /// Controller with the strategy and solver swapped out; used for side-by-side runs.
    pub fn build_controller_with(
        &self,
        strategy: DecisionStrategy,
        solver: Box<dyn SolverAdapter>,
    ) -> Result<PhaseDecisionController, ConfigError> {
        let generator = CostModelGenerator::new(CostModelSettings {
            strategy,
            ..self.cost_model_settings()?
        })?;
        PhaseDecisionController::new(
            self.controller_settings()?,
            IntersectionState::new(self.straight_fraction)?,
            generator,
            solver,
            self.detectors.build(),
            self.layout.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Episode length in controller ticks.
    pub max_steps: u64,
    /// Wall-clock delay between ticks; 0 runs as fast as possible.
    pub pacing_ms: u64,
    /// Rotation used by the fixed-time baseline.
    pub baseline_cycle: Vec<String>,
    pub synthetic: SyntheticSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_steps: 3600,
            pacing_ms: 0,
            baseline_cycle: vec!["NsStraight".to_string(), "EwStraight".to_string()],
            synthetic: SyntheticSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn baseline_solver(&self) -> Result<Box<dyn SolverAdapter>, ConfigError> {
        SolverConfig::FixedCycle {
            cycle: self.baseline_cycle.clone(),
        }
        .build()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::invalid("max_steps", 0, "must be at least 1"));
        }
        self.baseline_solver()?;
        self.synthetic.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sampling_interval: u64,
    pub csv_path: Option<String>,
    pub amqp_enabled: bool,
    pub amqp_url: String,
    pub amqp_queue: String,
}

impl OutputConfig {
    /// The same outputs with per-step AMQP streaming turned off, for runs that publish their
    /// history in one batch afterwards.
    pub fn without_amqp_stream(&self) -> Self {
        Self {
            amqp_enabled: false,
            ..self.clone()
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sampling_interval: 1,
            csv_path: Some("signal_history.csv".to_string()),
            amqp_enabled: false,
            amqp_url: AMQP_URL.to_string(),
            amqp_queue: QUEUE_SIGNAL_HISTORY.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Loads `path` if it exists, otherwise the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::from_json_file(path)
        } else {
            log::info!("No configuration at {}; using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        self.simulation.validate()?;
        if self.output.sampling_interval == 0 {
            return Err(ConfigError::invalid(
                "sampling_interval",
                0,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
