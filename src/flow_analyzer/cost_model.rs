//! Turns traffic state into a QUBO-style cost model.
//!
//! Every candidate [`SignalMode`] gets one binary variable. Minimizing
//!
//! ```text
//! E(x) = sum_i (-reward_i - P) x_i + sum_{i<j} 2P x_i x_j + P
//! ```
//!
//! rewards high-throughput modes, while the penalty part equals `P (k - 1)^2` for `k`
//! selected variables: zero for exactly one mode, strictly positive otherwise. As long as
//! `P` exceeds the largest possible reward, the one-hot minimum always wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_structures::SignalMode;
use crate::errors::ConfigError;
use crate::flow_analyzer::traffic_state::{potential_from, IntersectionState};
use crate::global_variables::{MAX_QUEUE_PER_APPROACH, PENALTY, REWARD_SCALE};

/// Whether the reward looks only at stopped queues or also at traffic still upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionStrategy {
    #[default]
    Reactive,
    Proactive { alpha: f64 },
}

impl DecisionStrategy {
    pub fn alpha(self) -> f64 {
        match self {
            DecisionStrategy::Reactive => 0.0,
            DecisionStrategy::Proactive { alpha } => alpha,
        }
    }
}

/// Validated generator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModelSettings {
    pub penalty: f64,
    pub reward_scale: f64,
    pub mode_weights: BTreeMap<SignalMode, f64>,
    pub max_queue_per_approach: u32,
    pub strategy: DecisionStrategy,
}

impl Default for CostModelSettings {
    fn default() -> Self {
        Self {
            penalty: PENALTY,
            reward_scale: REWARD_SCALE,
            mode_weights: BTreeMap::new(),
            max_queue_per_approach: MAX_QUEUE_PER_APPROACH,
            strategy: DecisionStrategy::Reactive,
        }
    }
}

impl CostModelSettings {
    pub fn weight(&self, mode: SignalMode) -> f64 {
        self.mode_weights.get(&mode).copied().unwrap_or(1.0)
    }

    /// Largest reward any mode can reach with every approach at capacity. Both straight and
    /// turn fractions are at most 1, so this holds for any straight fraction.
    pub fn max_possible_reward(&self) -> f64 {
        let capacity = self.max_queue_per_approach as f64;
        SignalMode::ALL
            .iter()
            .map(|&mode| {
                let served = mode.served_approaches().len() as f64;
                self.reward_scale * self.weight(mode) * served * capacity
            })
            .fold(0.0, f64::max)
    }

    /// Smallest penalty that keeps the one-hot optimum dominant. Rewards bottom out at zero
    /// for an empty intersection.
    pub fn required_penalty(&self) -> f64 {
        self.max_possible_reward() + 1.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.penalty.is_finite() || self.penalty <= 0.0 {
            return Err(ConfigError::invalid("penalty", self.penalty, "must be positive"));
        }
        if !self.reward_scale.is_finite() || self.reward_scale < 0.0 {
            return Err(ConfigError::invalid(
                "reward_scale",
                self.reward_scale,
                "must be non-negative",
            ));
        }
        for (mode, &weight) in &self.mode_weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::invalid(
                    "mode_weights",
                    format!("{}={}", mode, weight),
                    "weights must be non-negative",
                ));
            }
        }
        if self.max_queue_per_approach == 0 {
            return Err(ConfigError::invalid(
                "max_queue_per_approach",
                0,
                "must be at least 1",
            ));
        }
        let alpha = self.strategy.alpha();
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::invalid("alpha", alpha, "must lie in [0, 1]"));
        }
        let required = self.required_penalty();
        if self.penalty < required {
            return Err(ConfigError::PenaltyNotDominant {
                penalty: self.penalty,
                required,
            });
        }
        Ok(())
    }
}

/// Immutable optimization problem handed to a solver.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    variables: Vec<SignalMode>,
    rewards: Vec<f64>,
    linear: Vec<f64>,
    /// `(i, j, coefficient)` with `i < j`.
    quadratic: Vec<(usize, usize, f64)>,
    offset: f64,
    penalty: f64,
}

impl CostModel {
    /// Assemble the model from per-mode rewards.
    pub fn from_rewards(rewards: &[(SignalMode, f64)], penalty: f64) -> Self {
        let variables: Vec<SignalMode> = rewards.iter().map(|(m, _)| *m).collect();
        let rewards: Vec<f64> = rewards.iter().map(|(_, r)| *r).collect();
        let linear = rewards.iter().map(|r| -r - penalty).collect();

        let mut quadratic = Vec::new();
        for i in 0..variables.len() {
            for j in (i + 1)..variables.len() {
                quadratic.push((i, j, 2.0 * penalty));
            }
        }

        Self {
            variables,
            rewards,
            linear,
            quadratic,
            offset: penalty,
            penalty,
        }
    }

    pub fn variables(&self) -> &[SignalMode] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn linear_terms(&self) -> impl Iterator<Item = (SignalMode, f64)> + '_ {
        self.variables.iter().copied().zip(self.linear.iter().copied())
    }

    pub fn quadratic_terms(&self) -> impl Iterator<Item = ((SignalMode, SignalMode), f64)> + '_ {
        self.quadratic
            .iter()
            .map(|&(i, j, c)| ((self.variables[i], self.variables[j]), c))
    }

    /// Index-based view for solvers.
    pub fn linear_coefficients(&self) -> &[f64] {
        &self.linear
    }

    pub fn quadratic_entries(&self) -> &[(usize, usize, f64)] {
        &self.quadratic
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn index_of(&self, mode: SignalMode) -> Option<usize> {
        self.variables.iter().position(|&m| m == mode)
    }

    pub fn reward(&self, mode: SignalMode) -> Option<f64> {
        self.index_of(mode).map(|i| self.rewards[i])
    }

    pub fn linear_coefficient(&self, mode: SignalMode) -> Option<f64> {
        self.index_of(mode).map(|i| self.linear[i])
    }

    pub fn quadratic_coefficient(&self, a: SignalMode, b: SignalMode) -> Option<f64> {
        let (i, j) = (self.index_of(a)?, self.index_of(b)?);
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.quadratic
            .iter()
            .find(|&&(qi, qj, _)| qi == i && qj == j)
            .map(|&(_, _, c)| c)
    }

    /// Objective value of a binary assignment. `bits[i]` is variable `i`.
    pub fn energy(&self, bits: &[bool]) -> f64 {
        let mut total = self.offset;
        for (i, &on) in bits.iter().enumerate().take(self.linear.len()) {
            if on {
                total += self.linear[i];
            }
        }
        for &(i, j, c) in &self.quadratic {
            if bits.get(i).copied().unwrap_or(false) && bits.get(j).copied().unwrap_or(false) {
                total += c;
            }
        }
        total
    }

    /// Same as [`energy`](Self::energy) with bit `i` of `mask` standing for variable `i`.
    pub fn energy_of_mask(&self, mask: u64) -> f64 {
        let bits: Vec<bool> = (0..self.len()).map(|i| mask & (1 << i) != 0).collect();
        self.energy(&bits)
    }

    /// True when this model's penalty beats its own reward spread by at least one.
    pub fn penalty_dominates(&self) -> bool {
        let max = self.rewards.iter().copied().fold(0.0, f64::max);
        let min = self.rewards.iter().copied().fold(0.0, f64::min);
        self.penalty >= max - min + 1.0
    }
}

/// Builds [`CostModel`]s. Holds only validated settings; no state between calls.
#[derive(Debug, Clone)]
pub struct CostModelGenerator {
    settings: CostModelSettings,
}

impl CostModelGenerator {
    pub fn new(settings: CostModelSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &CostModelSettings {
        &self.settings
    }

    pub fn build(&self, state: &IntersectionState) -> CostModel {
        self.build_with(state, self.settings.strategy)
    }

    pub fn build_with(&self, state: &IntersectionState, strategy: DecisionStrategy) -> CostModel {
        let rewards = self.rewards(state, strategy);
        let model = CostModel::from_rewards(&rewards, self.settings.penalty);
        debug_assert!(model.penalty_dominates());
        model
    }

    /// `reward(m) = scale * weight(m) * potential(m)` over capacity-clamped inputs.
    pub fn rewards(
        &self,
        state: &IntersectionState,
        strategy: DecisionStrategy,
    ) -> Vec<(SignalMode, f64)> {
        let inputs = self.inputs(state, strategy);
        SignalMode::ALL
            .iter()
            .map(|&mode| {
                let potential = potential_from(&inputs, mode, state.straight_fraction());
                (
                    mode,
                    self.settings.reward_scale * self.settings.weight(mode) * potential,
                )
            })
            .collect()
    }

    /// Per-approach values feeding the potential, clamped to the capacity the penalty was
    /// validated against.
    pub fn inputs(&self, state: &IntersectionState, strategy: DecisionStrategy) -> [f64; 4] {
        let capacity = self.settings.max_queue_per_approach as f64;
        let raw = match strategy {
            DecisionStrategy::Reactive => state.queue_values(),
            DecisionStrategy::Proactive { alpha } => state.blended_queues(alpha.clamp(0.0, 1.0)),
        };
        raw.map(|v| v.clamp(0.0, capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_analyzer::traffic_state::RawReadings;

    fn state_with(queues: [f64; 4], approaching: Option<[f64; 4]>) -> IntersectionState {
        let keys = ["N", "S", "E", "W"];
        let snapshot: RawReadings = keys
            .iter()
            .zip(queues)
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let volumes: Option<RawReadings> = approaching.map(|a| {
            keys.iter()
                .zip(a)
                .map(|(k, v)| (k.to_string(), v))
                .collect()
        });
        let mut state = IntersectionState::default();
        state.update(&snapshot, volumes.as_ref());
        state
    }

    fn argmin_mask(model: &CostModel) -> u64 {
        let mut best = 0u64;
        let mut best_energy = f64::INFINITY;
        for mask in 0..(1u64 << model.len()) {
            let energy = model.energy_of_mask(mask);
            if energy < best_energy {
                best_energy = energy;
                best = mask;
            }
        }
        best
    }

    #[test]
    fn test_coefficients_follow_penalty_identity() {
        let generator = CostModelGenerator::new(CostModelSettings::default()).unwrap();
        let model = generator.build(&state_with([10.0, 10.0, 4.0, 6.0], None));
        let p = model.penalty();

        assert_eq!(model.len(), 6);
        assert!((model.linear_coefficient(SignalMode::NsStraight).unwrap() + 14.0 + p).abs() < 1e-9);
        assert_eq!(
            model.quadratic_coefficient(SignalMode::EastOnly, SignalMode::NsTurn),
            Some(2.0 * p)
        );
        assert_eq!(model.quadratic_terms().count(), 15);
        assert_eq!(model.offset(), p);
    }

    #[test]
    fn test_penalty_part_is_zero_only_for_one_hot() {
        let model = CostModel::from_rewards(
            &SignalMode::ALL.iter().map(|&m| (m, 0.0)).collect::<Vec<_>>(),
            50.0,
        );
        for mask in 0..64u64 {
            let k = mask.count_ones();
            let energy = model.energy_of_mask(mask);
            if k == 1 {
                assert_eq!(energy, 0.0);
            } else {
                assert!(energy > 0.0, "mask {:06b} has energy {}", mask, energy);
            }
        }
    }

    #[test]
    fn test_dominant_penalty_yields_one_hot_minimum() {
        let settings = CostModelSettings::default();
        let generator = CostModelGenerator::new(settings.clone()).unwrap();
        let cases = [
            [0.0, 0.0, 0.0, 0.0],
            [50.0, 50.0, 50.0, 50.0],
            [50.0, 0.0, 50.0, 0.0],
            [3.0, 17.0, 42.0, 8.0],
            [400.0, 1.0, 0.0, 0.0],
        ];
        for queues in cases {
            let model = generator.build(&state_with(queues, None));
            assert!(model.penalty >= settings.required_penalty());
            assert!(model.penalty_dominates());
            let best = argmin_mask(&model);
            assert_eq!(best.count_ones(), 1, "queues {:?} picked {:06b}", queues, best);
        }
    }

    #[test]
    fn test_weak_penalty_rejected_at_construction() {
        let settings = CostModelSettings {
            penalty: 100.0,
            ..CostModelSettings::default()
        };
        match CostModelGenerator::new(settings) {
            Err(ConfigError::PenaltyNotDominant { required, .. }) => assert_eq!(required, 101.0),
            other => panic!("expected PenaltyNotDominant, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_weight_and_bad_alpha_rejected() {
        let mut weights = BTreeMap::new();
        weights.insert(SignalMode::NsTurn, -1.0);
        let settings = CostModelSettings {
            mode_weights: weights,
            ..CostModelSettings::default()
        };
        assert!(CostModelGenerator::new(settings).is_err());

        let settings = CostModelSettings {
            strategy: DecisionStrategy::Proactive { alpha: 1.5 },
            ..CostModelSettings::default()
        };
        assert!(CostModelGenerator::new(settings).is_err());
    }

    #[test]
    fn test_mode_weight_biases_reward() {
        let mut weights = BTreeMap::new();
        weights.insert(SignalMode::EwStraight, 3.0);
        let settings = CostModelSettings {
            mode_weights: weights,
            penalty: 400.0,
            ..CostModelSettings::default()
        };
        let generator = CostModelGenerator::new(settings).unwrap();
        let model = generator.build(&state_with([10.0, 10.0, 5.0, 5.0], None));
        // 0.7 * 10 * 3 = 21 beats 0.7 * 20 = 14
        assert!(model.reward(SignalMode::EwStraight).unwrap() > model.reward(SignalMode::NsStraight).unwrap());
    }

    #[test]
    fn test_proactive_blend_favours_incoming_platoon() {
        let generator = CostModelGenerator::new(CostModelSettings::default()).unwrap();
        let state = state_with([20.0, 20.0, 2.0, 2.0], Some([10.0, 10.0, 0.0, 0.0]));
        let model = generator.build_with(&state, DecisionStrategy::Proactive { alpha: 0.5 });

        // blended N = S = 15, E = W = 1
        assert!((model.reward(SignalMode::NsStraight).unwrap() - 21.0).abs() < 1e-9);
        assert!((model.reward(SignalMode::EwStraight).unwrap() - 1.4).abs() < 1e-9);
        let best = argmin_mask(&model);
        assert_eq!(best, 1 << model.index_of(SignalMode::NsStraight).unwrap());
    }

    #[test]
    fn test_reactive_ignores_approaching_volume() {
        let generator = CostModelGenerator::new(CostModelSettings::default()).unwrap();
        let state = state_with([1.0, 1.0, 1.0, 1.0], Some([30.0, 30.0, 0.0, 0.0]));
        let model = generator.build_with(&state, DecisionStrategy::Reactive);
        assert_eq!(
            model.reward(SignalMode::NsStraight),
            model.reward(SignalMode::EwStraight)
        );
    }

    #[test]
    fn test_inputs_clamped_to_capacity() {
        let generator = CostModelGenerator::new(CostModelSettings::default()).unwrap();
        let state = state_with([500.0, 0.0, 0.0, 0.0], None);
        let inputs = generator.inputs(&state, DecisionStrategy::Reactive);
        assert_eq!(inputs[0], 50.0);
        assert_eq!(generator.build(&state).reward(SignalMode::NorthOnly), Some(50.0));
    }
}
