//! Solver adapter boundary.
//!
//! A solver receives a [`CostModel`] and answers with an [`Assignment`]: which signal modes
//! came back selected. The cost model only makes a single selection *likely*; callers must
//! cope with zero or several selected modes via [`Assignment::resolve`].

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data_structures::SignalMode;
use crate::errors::{ConfigError, SolverError};
use crate::flow_analyzer::cost_model::CostModel;
use crate::global_variables::SELECTION_THRESHOLD;

/// Modes a solver reported as selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    selected: BTreeSet<SignalMode>,
}

/// What the controller can make of an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing selected; treated exactly like a solver failure.
    Unusable,
    Single(SignalMode),
    /// Several selected; the lowest-numbered mode wins.
    Ambiguous {
        chosen: SignalMode,
        candidates: Vec<SignalMode>,
    },
}

impl Assignment {
    pub fn from_modes<I: IntoIterator<Item = SignalMode>>(modes: I) -> Self {
        Self {
            selected: modes.into_iter().collect(),
        }
    }

    /// Threshold continuous or probabilistic solver output; `values[i]` belongs to variable `i`.
    pub fn from_values(model: &CostModel, values: &[f64]) -> Result<Self, SolverError> {
        if values.len() != model.len() {
            return Err(SolverError::DimensionMismatch {
                expected: model.len(),
                got: values.len(),
            });
        }
        Ok(Self::from_modes(
            model
                .variables()
                .iter()
                .zip(values)
                .filter(|&(_, &v)| v > SELECTION_THRESHOLD)
                .map(|(&m, _)| m),
        ))
    }

    pub fn from_bits(model: &CostModel, bits: &[bool]) -> Self {
        Self::from_modes(
            model
                .variables()
                .iter()
                .zip(bits)
                .filter(|&(_, &on)| on)
                .map(|(&m, _)| m),
        )
    }

    pub fn value(&self, mode: SignalMode) -> u8 {
        u8::from(self.selected.contains(&mode))
    }

    pub fn selected(&self) -> impl Iterator<Item = SignalMode> + '_ {
        self.selected.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn resolve(&self) -> Resolution {
        let mut modes = self.selected.iter().copied();
        match (modes.next(), modes.next()) {
            (None, _) => Resolution::Unusable,
            (Some(only), None) => Resolution::Single(only),
            (Some(chosen), Some(_)) => Resolution::Ambiguous {
                chosen,
                candidates: self.selected.iter().copied().collect(),
            },
        }
    }
}

/// Contract for any backend that can minimize a cost model.
pub trait SolverAdapter: Send {
    fn name(&self) -> &str;

    fn solve(&mut self, model: &CostModel) -> Result<Assignment, SolverError>;
}

/// Brute force over every assignment. Exact, only sensible for small variable counts.
#[derive(Debug, Clone)]
pub struct ExhaustiveSolver {
    max_variables: usize,
}

impl Default for ExhaustiveSolver {
    fn default() -> Self {
        Self { max_variables: 20 }
    }
}

impl ExhaustiveSolver {
    pub fn new(max_variables: usize) -> Self {
        Self {
            max_variables: max_variables.min(63),
        }
    }
}

impl SolverAdapter for ExhaustiveSolver {
    fn name(&self) -> &str {
        "exhaustive"
    }

    fn solve(&mut self, model: &CostModel) -> Result<Assignment, SolverError> {
        if model.is_empty() {
            return Err(SolverError::EmptyModel);
        }
        if model.len() > self.max_variables {
            return Err(SolverError::TooManyVariables {
                solver: self.name().to_string(),
                count: model.len(),
                limit: self.max_variables,
            });
        }

        // Strict comparison keeps the lowest mask on ties.
        let mut best_mask = 0u64;
        let mut best_energy = f64::INFINITY;
        for mask in 0..(1u64 << model.len()) {
            let energy = model.energy_of_mask(mask);
            if energy < best_energy {
                best_energy = energy;
                best_mask = mask;
            }
        }

        let bits: Vec<bool> = (0..model.len()).map(|i| best_mask & (1 << i) != 0).collect();
        Ok(Assignment::from_bits(model, &bits))
    }
}

/// Simulated annealing with single-bit flips and a geometric cooling schedule.
#[derive(Debug, Clone)]
pub struct AnnealingSolver {
    sweeps: usize,
    restarts: usize,
    initial_temperature: f64,
    final_temperature: f64,
    rng: StdRng,
}

impl AnnealingSolver {
    pub fn new(
        sweeps: usize,
        restarts: usize,
        initial_temperature: f64,
        final_temperature: f64,
        seed: u64,
    ) -> Self {
        Self {
            sweeps: sweeps.max(1),
            restarts: restarts.max(1),
            initial_temperature,
            final_temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Dense symmetric coupling matrix built from the upper-triangle entries.
    fn couplings(model: &CostModel) -> Vec<Vec<f64>> {
        let n = model.len();
        let mut q = vec![vec![0.0; n]; n];
        for &(i, j, c) in model.quadratic_entries() {
            q[i][j] += c;
            q[j][i] += c;
        }
        q
    }
}

impl Default for AnnealingSolver {
    fn default() -> Self {
        Self::new(200, 4, 100.0, 0.05, 7)
    }
}

impl SolverAdapter for AnnealingSolver {
    fn name(&self) -> &str {
        "annealing"
    }

    fn solve(&mut self, model: &CostModel) -> Result<Assignment, SolverError> {
        if model.is_empty() {
            return Err(SolverError::EmptyModel);
        }
        if !(self.initial_temperature > 0.0 && self.final_temperature > 0.0) {
            return Err(SolverError::Backend(
                "annealing temperatures must be positive".to_string(),
            ));
        }

        let n = model.len();
        let linear = model.linear_coefficients();
        let q = Self::couplings(model);
        let cooling = if self.sweeps > 1 {
            (self.final_temperature / self.initial_temperature).powf(1.0 / (self.sweeps - 1) as f64)
        } else {
            1.0
        };

        let mut best_bits = vec![false; n];
        let mut best_energy = model.energy(&best_bits);

        for _ in 0..self.restarts {
            let mut bits: Vec<bool> = (0..n).map(|_| self.rng.random_bool(0.5)).collect();
            let mut energy = model.energy(&bits);
            if energy < best_energy {
                best_energy = energy;
                best_bits.clone_from(&bits);
            }
            let mut temperature = self.initial_temperature;

            for _ in 0..self.sweeps {
                for i in 0..n {
                    let field: f64 = linear[i]
                        + (0..n)
                            .filter(|&j| j != i && bits[j])
                            .map(|j| q[i][j])
                            .sum::<f64>();
                    let delta = if bits[i] { -field } else { field };
                    let accept = delta <= 0.0
                        || self.rng.random::<f64>() < (-delta / temperature).exp();
                    if accept {
                        bits[i] = !bits[i];
                        energy += delta;
                        if energy < best_energy {
                            best_energy = energy;
                            best_bits.clone_from(&bits);
                        }
                    }
                }
                temperature *= cooling;
            }
        }

        Ok(Assignment::from_bits(model, &best_bits))
    }
}

/// Fixed-time baseline: ignores the costs and rotates through a mode list.
#[derive(Debug, Clone)]
pub struct FixedCycleSolver {
    cycle: Vec<SignalMode>,
    next: usize,
}

impl FixedCycleSolver {
    pub fn new(cycle: Vec<SignalMode>) -> Self {
        Self { cycle, next: 0 }
    }
}

impl Default for FixedCycleSolver {
    fn default() -> Self {
        Self::new(vec![SignalMode::NsStraight, SignalMode::EwStraight])
    }
}

impl SolverAdapter for FixedCycleSolver {
    fn name(&self) -> &str {
        "fixed_cycle"
    }

    fn solve(&mut self, _model: &CostModel) -> Result<Assignment, SolverError> {
        if self.cycle.is_empty() {
            return Err(SolverError::Backend("fixed cycle has no modes".to_string()));
        }
        let mode = self.cycle[self.next % self.cycle.len()];
        self.next = (self.next + 1) % self.cycle.len();
        Ok(Assignment::from_modes([mode]))
    }
}

/// Serde-facing solver selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolverConfig {
    Exhaustive {
        #[serde(default = "default_max_variables")]
        max_variables: usize,
    },
    Annealing {
        #[serde(default = "default_sweeps")]
        sweeps: usize,
        #[serde(default = "default_restarts")]
        restarts: usize,
        #[serde(default = "default_initial_temperature")]
        initial_temperature: f64,
        #[serde(default = "default_final_temperature")]
        final_temperature: f64,
        #[serde(default)]
        seed: u64,
    },
    FixedCycle {
        cycle: Vec<String>,
    },
}

fn default_max_variables() -> usize {
    20
}

fn default_sweeps() -> usize {
    200
}

fn default_restarts() -> usize {
    4
}

fn default_initial_temperature() -> f64 {
    100.0
}

fn default_final_temperature() -> f64 {
    0.05
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig::Exhaustive {
            max_variables: default_max_variables(),
        }
    }
}

impl SolverConfig {
    pub fn build(&self) -> Result<Box<dyn SolverAdapter>, ConfigError> {
        match self {
            SolverConfig::Exhaustive { max_variables } => {
                if *max_variables < SignalMode::ALL.len() {
                    return Err(ConfigError::invalid(
                        "max_variables",
                        max_variables,
                        "must cover every signal mode",
                    ));
                }
                Ok(Box::new(ExhaustiveSolver::new(*max_variables)))
            }
            SolverConfig::Annealing {
                sweeps,
                restarts,
                initial_temperature,
                final_temperature,
                seed,
            } => {
                if !(*initial_temperature > 0.0 && *final_temperature > 0.0) {
                    return Err(ConfigError::invalid(
                        "temperature",
                        format!("{}..{}", initial_temperature, final_temperature),
                        "must be positive",
                    ));
                }
                Ok(Box::new(AnnealingSolver::new(
                    *sweeps,
                    *restarts,
                    *initial_temperature,
                    *final_temperature,
                    *seed,
                )))
            }
            SolverConfig::FixedCycle { cycle } => {
                let modes = cycle
                    .iter()
                    .map(|name| {
                        name.parse::<SignalMode>()
                            .map_err(ConfigError::UnknownSignalMode)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if modes.is_empty() {
                    return Err(ConfigError::invalid("cycle", "[]", "needs at least one mode"));
                }
                Ok(Box::new(FixedCycleSolver::new(modes)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_analyzer::cost_model::{CostModelGenerator, CostModelSettings};
    use crate::flow_analyzer::traffic_state::{IntersectionState, RawReadings};

    fn model_for(queues: [f64; 4]) -> CostModel {
        let snapshot: RawReadings = ["N", "S", "E", "W"]
            .iter()
            .zip(queues)
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut state = IntersectionState::default();
        state.update(&snapshot, None);
        CostModelGenerator::new(CostModelSettings::default())
            .unwrap()
            .build(&state)
    }

    #[test]
    fn test_resolution_tie_break_prefers_lowest_number() {
        let assignment = Assignment::from_modes([SignalMode::EwTurn, SignalMode::NsTurn]);
        assert_eq!(
            assignment.resolve(),
            Resolution::Ambiguous {
                chosen: SignalMode::NsTurn,
                candidates: vec![SignalMode::NsTurn, SignalMode::EwTurn],
            }
        );
        assert_eq!(Assignment::default().resolve(), Resolution::Unusable);
        assert_eq!(
            Assignment::from_modes([SignalMode::EastOnly]).resolve(),
            Resolution::Single(SignalMode::EastOnly)
        );
    }

    #[test]
    fn test_from_values_applies_threshold() {
        let model = model_for([1.0, 1.0, 1.0, 1.0]);
        let assignment =
            Assignment::from_values(&model, &[0.95, 0.9, 0.2, 1.0, 0.0, 0.91]).unwrap();
        assert_eq!(assignment.value(SignalMode::NsStraight), 1);
        assert_eq!(assignment.value(SignalMode::NsTurn), 0);
        assert_eq!(assignment.value(SignalMode::EwTurn), 1);
        assert_eq!(assignment.value(SignalMode::EastOnly), 1);
        assert_eq!(assignment.len(), 3);

        assert_eq!(
            Assignment::from_values(&model, &[1.0]),
            Err(SolverError::DimensionMismatch {
                expected: 6,
                got: 1
            })
        );
    }

    #[test]
    fn test_exhaustive_picks_highest_reward_mode() {
        let mut solver = ExhaustiveSolver::default();
        let assignment = solver.solve(&model_for([2.0, 3.0, 9.0, 8.0])).unwrap();
        assert_eq!(assignment.resolve(), Resolution::Single(SignalMode::EwStraight));

        let assignment = solver.solve(&model_for([30.0, 0.0, 1.0, 0.0])).unwrap();
        assert_eq!(assignment.resolve(), Resolution::Single(SignalMode::NorthOnly));
    }

    #[test]
    fn test_exhaustive_rejects_empty_model() {
        let mut solver = ExhaustiveSolver::default();
        let empty = CostModel::from_rewards(&[], 10.0);
        assert_eq!(solver.solve(&empty), Err(SolverError::EmptyModel));
    }

    #[test]
    fn test_annealing_matches_exhaustive_on_clear_winner() {
        let model = model_for([20.0, 20.0, 2.0, 2.0]);
        let mut annealer = AnnealingSolver::default();
        let assignment = annealer.solve(&model).unwrap();
        assert_eq!(assignment.resolve(), Resolution::Single(SignalMode::NsStraight));
    }

    #[test]
    fn test_fixed_cycle_rotates() {
        let mut solver = FixedCycleSolver::default();
        let model = model_for([0.0, 0.0, 0.0, 0.0]);
        let picks: Vec<_> = (0..3)
            .map(|_| solver.solve(&model).unwrap().resolve())
            .collect();
        assert_eq!(
            picks,
            vec![
                Resolution::Single(SignalMode::NsStraight),
                Resolution::Single(SignalMode::EwStraight),
                Resolution::Single(SignalMode::NsStraight),
            ]
        );
    }

    #[test]
    fn test_solver_config_rejects_unknown_mode() {
        let config = SolverConfig::FixedCycle {
            cycle: vec!["NsStraight".into(), "Diagonal".into()],
        };
        match config.build() {
            Err(ConfigError::UnknownSignalMode(name)) => assert_eq!(name, "Diagonal"),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("unknown mode accepted"),
        }
    }

    #[test]
    fn test_solver_config_from_json() {
        let config: SolverConfig =
            serde_json::from_str(r#"{"kind": "annealing", "sweeps": 50, "seed": 3}"#).unwrap();
        let solver = config.build().unwrap();
        assert_eq!(solver.name(), "annealing");
    }
}
