use serde::{Deserialize, Serialize};

use crate::control_system::overrides::{DetectorSet, OverrideDetector, OverrideSignal};
use crate::control_system::solver::{Resolution, SolverAdapter};
use crate::data_structures::{Approach, SignalIndication, SignalMode};
use crate::errors::ConfigError;
use crate::flow_analyzer::cost_model::CostModelGenerator;
use crate::flow_analyzer::traffic_state::IntersectionState;
use crate::global_variables::{
    EMERGENCY_CLEARANCE, LIGHT_QUEUE_MAX, LONG_HOLD, MEDIUM_HOLD, MODERATE_QUEUE_MAX,
    SAFETY_EXTENSION, SHORT_HOLD, TICK_SECONDS, TRANSIT_EXTENSION, YELLOW_DURATION,
};
use crate::simulation_engine::interface::{SensorReader, SignalActuator, TrafficSensors};
use crate::simulation_engine::lanes::IntersectionLayout;

/// Green hold after a decision, tiered by the queue the chosen mode serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldTiers {
    pub light_max: u32,
    pub moderate_max: u32,
    pub short: f64,
    pub medium: f64,
    pub long: f64,
}

impl Default for HoldTiers {
    fn default() -> Self {
        Self {
            light_max: LIGHT_QUEUE_MAX,
            moderate_max: MODERATE_QUEUE_MAX,
            short: SHORT_HOLD,
            medium: MEDIUM_HOLD,
            long: LONG_HOLD,
        }
    }
}

impl HoldTiers {
    pub fn hold_for(&self, serving_queue: u32) -> f64 {
        if serving_queue < self.light_max {
            self.short
        } else if serving_queue < self.moderate_max {
            self.medium
        } else {
            self.long
        }
    }
}

/// Timing parameters of the phase decision controller, all in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub tick_seconds: f64,
    pub yellow_duration: f64,
    pub emergency_clearance: f64,
    pub safety_extension: f64,
    pub transit_extension: f64,
    pub hold: HoldTiers,
    pub default_mode: SignalMode,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_seconds: TICK_SECONDS,
            yellow_duration: YELLOW_DURATION,
            emergency_clearance: EMERGENCY_CLEARANCE,
            safety_extension: SAFETY_EXTENSION,
            transit_extension: TRANSIT_EXTENSION,
            hold: HoldTiers::default(),
            default_mode: SignalMode::NsStraight,
        }
    }
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tick_seconds", self.tick_seconds),
            ("yellow_duration", self.yellow_duration),
            ("emergency_clearance", self.emergency_clearance),
            ("hold.short", self.hold.short),
            ("hold.medium", self.hold.medium),
            ("hold.long", self.hold.long),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(name, value, "must be positive"));
            }
        }
        for (name, value) in [
            ("safety_extension", self.safety_extension),
            ("transit_extension", self.transit_extension),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(name, value, "must be non-negative"));
            }
        }
        if self.emergency_clearance > self.yellow_duration {
            return Err(ConfigError::invalid(
                "emergency_clearance",
                self.emergency_clearance,
                "must not exceed yellow_duration",
            ));
        }
        if self.hold.light_max > self.hold.moderate_max {
            return Err(ConfigError::invalid(
                "hold.light_max",
                self.hold.light_max,
                "must not exceed hold.moderate_max",
            ));
        }
        Ok(())
    }

    /// Whole ticks covering `seconds`, at least one.
    pub fn steps_for(&self, seconds: f64) -> u64 {
        ((seconds / self.tick_seconds).ceil() as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseState {
    Steady(SignalMode),
    Clearing {
        from: SignalMode,
        to: SignalMode,
        remaining_seconds: f64,
    },
}

/// Everything the controller mutates between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerTimerState {
    phase: PhaseState,
    next_decision_step: u64,
}

impl ControllerTimerState {
    pub fn new(mode: SignalMode) -> Self {
        Self {
            phase: PhaseState::Steady(mode),
            next_decision_step: 0,
        }
    }

    pub fn phase(&self) -> PhaseState {
        self.phase
    }

    /// The mode whose right-of-way is in force or being revoked.
    pub fn active_mode(&self) -> SignalMode {
        match self.phase {
            PhaseState::Steady(mode) => mode,
            PhaseState::Clearing { from, .. } => from,
        }
    }

    pub fn target_mode(&self) -> Option<SignalMode> {
        match self.phase {
            PhaseState::Steady(_) => None,
            PhaseState::Clearing { to, .. } => Some(to),
        }
    }

    pub fn remaining_seconds(&self) -> f64 {
        match self.phase {
            PhaseState::Steady(_) => 0.0,
            PhaseState::Clearing {
                remaining_seconds, ..
            } => remaining_seconds,
        }
    }

    pub fn next_decision_step(&self) -> u64 {
        self.next_decision_step
    }

    pub fn is_clearing(&self) -> bool {
        matches!(self.phase, PhaseState::Clearing { .. })
    }
}

/// Why an optimization decision ended on the mode it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionBasis {
    Solved,
    /// Several modes came back; the lowest-numbered one was taken.
    TieBroken,
    /// Solver failed or returned nothing; the current mode was kept.
    FailedOpen,
    /// Nothing queued or approaching; the solver was not consulted.
    NoDemand,
}

/// Which rule settled a tick, and its effect.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    EmergencyPreemption {
        approach: Approach,
        target: SignalMode,
    },
    EmergencyHold {
        approach: Approach,
        next_decision_step: u64,
    },
    Clearing {
        to: SignalMode,
        remaining_seconds: f64,
    },
    ClearanceComplete {
        mode: SignalMode,
    },
    SafetyExtension {
        approach: Approach,
        next_decision_step: u64,
    },
    TransitExtension {
        approach: Approach,
        next_decision_step: u64,
    },
    Decided {
        mode: SignalMode,
        switched: bool,
        hold_seconds: f64,
        basis: DecisionBasis,
    },
    Holding {
        mode: SignalMode,
    },
}

/// Running totals, mostly for end-of-run reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub decisions: u64,
    pub switches: u64,
    pub fail_opens: u64,
    pub tie_breaks: u64,
    pub preemptions: u64,
    pub safety_extensions: u64,
    pub transit_extensions: u64,
}

/// Adaptive controller for a single intersection.
pub struct PhaseDecisionController {
    settings: ControllerSettings,
    state: IntersectionState,
    timer: ControllerTimerState,
    generator: CostModelGenerator,
    solver: Box<dyn SolverAdapter>,
    detectors: DetectorSet,
    layout: IntersectionLayout,
    stats: ControllerStats,
}

impl PhaseDecisionController {
    pub fn new(
        settings: ControllerSettings,
        state: IntersectionState,
        generator: CostModelGenerator,
        solver: Box<dyn SolverAdapter>,
        detectors: DetectorSet,
        layout: IntersectionLayout,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let timer = ControllerTimerState::new(settings.default_mode);
        Ok(Self {
            settings,
            state,
            timer,
            generator,
            solver,
            detectors,
            layout,
            stats: ControllerStats::default(),
        })
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn state(&self) -> &IntersectionState {
        &self.state
    }

    pub fn timer(&self) -> &ControllerTimerState {
        &self.timer
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn layout(&self) -> &IntersectionLayout {
        &self.layout
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    /// Adopt the simulator's current green if it shows one; otherwise put the default mode up.
    pub fn initialize<S: SignalActuator>(&mut self, sim: &mut S) {
        match sim.current_indication() {
            Ok(SignalIndication::Green(mode)) => {
                self.timer = ControllerTimerState::new(mode);
                log::info!("Controller adopting running green {}", mode);
            }
            other => {
                if let Err(fault) = &other {
                    log::debug!("Could not read current indication: {}", fault);
                }
                self.timer = ControllerTimerState::new(self.settings.default_mode);
                Self::actuate(sim, SignalIndication::Green(self.settings.default_mode));
                log::info!("Controller starting on {}", self.settings.default_mode);
            }
        }
    }

    /// Evaluate one control tick. Rules are checked in priority order and the first that
    /// applies settles the tick.
    pub fn tick<S: TrafficSensors + SignalActuator>(&mut self, sim: &mut S, step: u64) -> TickOutcome {
        if let Some(outcome) = self.check_emergency(sim, step) {
            return outcome;
        }

        if let PhaseState::Clearing {
            from,
            to,
            remaining_seconds,
        } = self.timer.phase
        {
            let remaining_seconds = remaining_seconds - self.settings.tick_seconds;
            if remaining_seconds <= 0.0 {
                self.timer.phase = PhaseState::Steady(to);
                Self::actuate(sim, SignalIndication::Green(to));
                log::info!("[Step {}] Switched to green {}", step, to);
                return TickOutcome::ClearanceComplete { mode: to };
            }
            self.timer.phase = PhaseState::Clearing {
                from,
                to,
                remaining_seconds,
            };
            return TickOutcome::Clearing {
                to,
                remaining_seconds,
            };
        }

        let current = self.timer.active_mode();
        if step < self.timer.next_decision_step {
            return TickOutcome::Holding { mode: current };
        }

        let served = current.served_approaches();
        let sensors: &dyn TrafficSensors = &*sim;

        if let Some(OverrideSignal::DilemmaZone(approach)) =
            Self::run_detector(&self.detectors.dilemma_zone, sensors, &self.layout, served)
        {
            let next = step + self.settings.steps_for(self.settings.safety_extension);
            self.timer.next_decision_step = next;
            self.stats.safety_extensions += 1;
            log::debug!(
                "[Step {}] Vehicle in dilemma zone on {}; deferring decision to step {}",
                step,
                approach,
                next
            );
            return TickOutcome::SafetyExtension {
                approach,
                next_decision_step: next,
            };
        }

        if let Some(OverrideSignal::TransitPriority(approach)) =
            Self::run_detector(&self.detectors.transit, sensors, &self.layout, served)
        {
            let next = step + self.settings.steps_for(self.settings.transit_extension);
            self.timer.next_decision_step = next;
            self.stats.transit_extensions += 1;
            log::debug!(
                "[Step {}] Transit vehicle on {}; extending green to step {}",
                step,
                approach,
                next
            );
            return TickOutcome::TransitExtension {
                approach,
                next_decision_step: next,
            };
        }

        self.decide(sim, step, current)
    }

    fn run_detector(
        slot: &Option<Box<dyn OverrideDetector>>,
        sensors: &dyn TrafficSensors,
        layout: &IntersectionLayout,
        served: &[Approach],
    ) -> Option<OverrideSignal> {
        slot.as_ref()
            .and_then(|detector| detector.detect(sensors, layout, served))
    }

    fn check_emergency<S: TrafficSensors + SignalActuator>(
        &mut self,
        sim: &mut S,
        step: u64,
    ) -> Option<TickOutcome> {
        let sensors: &dyn TrafficSensors = &*sim;
        // The detector reports vans outside `served` first. While clearing, the vans the
        // clearance already heads toward go first, so two vans on conflicting approaches
        // cannot keep swapping the target.
        let served: Vec<Approach> = match self.timer.phase {
            PhaseState::Steady(mode) => mode.served_approaches().to_vec(),
            PhaseState::Clearing { to, .. } => Approach::ALL
                .iter()
                .copied()
                .filter(|a| !to.serves(*a))
                .collect(),
        };
        let approach = match Self::run_detector(&self.detectors.emergency, sensors, &self.layout, &served)
        {
            Some(OverrideSignal::Emergency(approach)) => approach,
            _ => return None,
        };

        match self.timer.phase {
            PhaseState::Steady(mode) if mode.serves(approach) => {
                // Already green for the emergency vehicle: keep it that way.
                let next = self
                    .timer
                    .next_decision_step
                    .max(step + self.settings.steps_for(self.settings.safety_extension));
                self.timer.next_decision_step = next;
                Some(TickOutcome::EmergencyHold {
                    approach,
                    next_decision_step: next,
                })
            }
            PhaseState::Clearing { to, .. } if to.serves(approach) => None,
            PhaseState::Steady(from) | PhaseState::Clearing { from, .. } => {
                let target = SignalMode::preemption_target(approach);
                let overridden = self.timer.target_mode();
                self.timer.phase = PhaseState::Clearing {
                    from,
                    to: target,
                    remaining_seconds: self.settings.emergency_clearance,
                };
                if overridden.is_none() {
                    Self::actuate(sim, SignalIndication::Yellow(from));
                }
                self.stats.preemptions += 1;
                log::info!(
                    "[Step {}] EMERGENCY preemption on {}: clearing {} toward {}{}",
                    step,
                    approach,
                    from,
                    target,
                    overridden
                        .map(|m| format!(" (overriding pending {})", m))
                        .unwrap_or_default()
                );
                Some(TickOutcome::EmergencyPreemption { approach, target })
            }
        }
    }

    /// Per-approach queues as "N3 S0 E7 W1".
    fn queue_summary(&self) -> String {
        Approach::ALL
            .iter()
            .map(|&a| format!("{}{}", a.letter(), self.state.queue(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Optimization decision: refresh state, build and solve the cost model, then either
    /// start a clearance toward the winning mode or stay, and schedule the next decision.
    fn decide<S: TrafficSensors + SignalActuator>(
        &mut self,
        sim: &mut S,
        step: u64,
        current: SignalMode,
    ) -> TickOutcome {
        {
            let reader = SensorReader::new(&*sim);
            let queues = reader.queue_snapshot(&self.layout);
            let approaching = reader.approaching_snapshot(&self.layout);
            self.state.update(&queues, Some(&approaching));
            self.state.set_waiting_times(&reader.waiting_snapshot(&self.layout));
        }
        self.stats.decisions += 1;

        let strategy = self.generator.settings().strategy;
        let demand: f64 = self.generator.inputs(&self.state, strategy).iter().sum();
        let (desired, basis) = if demand <= 0.0 {
            (current, DecisionBasis::NoDemand)
        } else {
            let model = self.generator.build(&self.state);
            match self.solver.solve(&model) {
                Ok(assignment) => match assignment.resolve() {
                    Resolution::Single(mode) => (mode, DecisionBasis::Solved),
                    Resolution::Ambiguous { chosen, candidates } => {
                        self.stats.tie_breaks += 1;
                        log::warn!(
                            "[Step {}] Solver '{}' selected {:?}; taking {}",
                            step,
                            self.solver.name(),
                            candidates,
                            chosen
                        );
                        (chosen, DecisionBasis::TieBroken)
                    }
                    Resolution::Unusable => {
                        self.stats.fail_opens += 1;
                        log::warn!(
                            "[Step {}] Solver '{}' selected no mode; keeping {}",
                            step,
                            self.solver.name(),
                            current
                        );
                        (current, DecisionBasis::FailedOpen)
                    }
                },
                Err(e) => {
                    self.stats.fail_opens += 1;
                    log::warn!(
                        "[Step {}] Solver '{}' failed: {}; keeping {}",
                        step,
                        self.solver.name(),
                        e,
                        current
                    );
                    (current, DecisionBasis::FailedOpen)
                }
            }
        };

        let switched = desired != current;
        if switched {
            self.timer.phase = PhaseState::Clearing {
                from: current,
                to: desired,
                remaining_seconds: self.settings.yellow_duration,
            };
            Self::actuate(sim, SignalIndication::Yellow(current));
            self.stats.switches += 1;
            log::info!(
                "[Step {}] Requesting switch {} -> {} (queues {})",
                step,
                current,
                desired,
                self.queue_summary()
            );
        }

        let hold_seconds = match basis {
            DecisionBasis::FailedOpen | DecisionBasis::NoDemand => self.settings.hold.short,
            _ => self.settings.hold.hold_for(self.state.serving_queue(desired)),
        };
        self.timer.next_decision_step = step + self.settings.steps_for(hold_seconds);

        TickOutcome::Decided {
            mode: desired,
            switched,
            hold_seconds,
            basis,
        }
    }

    fn actuate<S: SignalActuator>(sim: &mut S, indication: SignalIndication) {
        if let Err(fault) = sim.set_indication(indication) {
            log::warn!("Failed to set indication {:?}: {}", indication, fault);
        }
    }
}

impl std::fmt::Debug for PhaseDecisionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseDecisionController")
            .field("timer", &self.timer)
            .field("solver", &self.solver.name())
            .field("detectors", &self.detectors)
            .field("stats", &self.stats)
            .finish()
    }
}
