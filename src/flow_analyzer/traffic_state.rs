use std::collections::BTreeMap;

use crate::data_structures::{Approach, SignalMode};
use crate::errors::ConfigError;
use crate::global_variables::{MAX_SENSOR_COUNT, STRAIGHT_FRACTION};
use crate::shared_data::{population_variance, QueueSample};

/// Raw sensor readings keyed by approach name ("N", "North", "N_1", ...).
pub type RawReadings = BTreeMap<String, f64>;

/// Coerce a raw sensor value into a vehicle count. NaN, infinities and negatives read as 0,
/// implausibly large readings are capped at `MAX_SENSOR_COUNT`.
fn sanitize_count(raw: f64) -> u32 {
    if !raw.is_finite() || raw <= 0.0 {
        0
    } else if raw >= MAX_SENSOR_COUNT as f64 {
        MAX_SENSOR_COUNT
    } else {
        raw.floor() as u32
    }
}

fn sanitize_seconds(raw: f64) -> f64 {
    if raw.is_finite() && raw > 0.0 {
        raw
    } else {
        0.0
    }
}

fn saturating_total(counts: impl Iterator<Item = u32>) -> u32 {
    counts.fold(0u32, u32::saturating_add)
}

/// Weighted queue mass a mode can serve, given per-approach values indexed by `Approach::index`.
pub fn potential_from(values: &[f64; 4], mode: SignalMode, straight_fraction: f64) -> f64 {
    let n = values[Approach::North.index()];
    let s = values[Approach::South.index()];
    let e = values[Approach::East.index()];
    let w = values[Approach::West.index()];
    let f = straight_fraction;
    match mode {
        SignalMode::NsStraight => f * (n + s),
        SignalMode::NsTurn => (1.0 - f) * (n + s),
        SignalMode::EwStraight => f * (e + w),
        SignalMode::EwTurn => (1.0 - f) * (e + w),
        SignalMode::NorthOnly => n,
        SignalMode::EastOnly => e,
    }
}

/// Current per-approach queue state of one intersection plus its own queue history.
#[derive(Debug, Clone)]
pub struct IntersectionState {
    queues: [u32; 4],
    approaching: [u32; 4],
    waiting_time: [f64; 4],
    straight_fraction: f64,
    step: u64,
    history: Vec<QueueSample>,
}

impl Default for IntersectionState {
    fn default() -> Self {
        Self {
            queues: [0; 4],
            approaching: [0; 4],
            waiting_time: [0.0; 4],
            straight_fraction: STRAIGHT_FRACTION,
            step: 0,
            history: Vec::new(),
        }
    }
}

impl IntersectionState {
    pub fn new(straight_fraction: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&straight_fraction) {
            return Err(ConfigError::invalid(
                "straight_fraction",
                straight_fraction,
                "must lie in [0, 1]",
            ));
        }
        Ok(Self {
            straight_fraction,
            ..Self::default()
        })
    }

    /// Overwrite the queues named in `snapshot` (and approaching volumes, if given), then
    /// append a history sample. Unknown keys are skipped.
    pub fn update(&mut self, snapshot: &RawReadings, approaching: Option<&RawReadings>) {
        for (key, &raw) in snapshot {
            match Approach::from_key(key) {
                Some(approach) => self.queues[approach.index()] = sanitize_count(raw),
                None => log::debug!("Ignoring queue reading for unknown approach '{}'", key),
            }
        }
        if let Some(volumes) = approaching {
            for (key, &raw) in volumes {
                if let Some(approach) = Approach::from_key(key) {
                    self.approaching[approach.index()] = sanitize_count(raw);
                }
            }
        }

        self.step += 1;
        self.history.push(QueueSample {
            step: self.step,
            total_queue: self.total_queue(),
            variance: self.queue_variance(),
        });
    }

    pub fn set_waiting_times(&mut self, snapshot: &RawReadings) {
        for (key, &raw) in snapshot {
            if let Some(approach) = Approach::from_key(key) {
                self.waiting_time[approach.index()] = sanitize_seconds(raw);
            }
        }
    }

    pub fn throughput_potential(&self, mode: SignalMode) -> f64 {
        potential_from(&self.queue_values(), mode, self.straight_fraction)
    }

    /// Per-approach `(1 - alpha) * queue + alpha * approaching`.
    pub fn blended_queues(&self, alpha: f64) -> [f64; 4] {
        let mut blended = [0.0; 4];
        for approach in Approach::ALL {
            let i = approach.index();
            blended[i] = (1.0 - alpha) * self.queues[i] as f64 + alpha * self.approaching[i] as f64;
        }
        blended
    }

    pub fn queue_values(&self) -> [f64; 4] {
        self.queues.map(|q| q as f64)
    }

    pub fn queue(&self, approach: Approach) -> u32 {
        self.queues[approach.index()]
    }

    pub fn approaching(&self, approach: Approach) -> u32 {
        self.approaching[approach.index()]
    }

    pub fn waiting_time(&self, approach: Approach) -> f64 {
        self.waiting_time[approach.index()]
    }

    pub fn total_queue(&self) -> u32 {
        saturating_total(self.queues.iter().copied())
    }

    pub fn total_approaching(&self) -> u32 {
        saturating_total(self.approaching.iter().copied())
    }

    /// Raw queue sum of the approaches a mode serves; drives the green hold tier.
    pub fn serving_queue(&self, mode: SignalMode) -> u32 {
        saturating_total(
            mode.served_approaches()
                .iter()
                .map(|a| self.queues[a.index()]),
        )
    }

    pub fn queue_variance(&self) -> f64 {
        population_variance(&self.queue_values())
    }

    pub fn straight_fraction(&self) -> f64 {
        self.straight_fraction
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn history(&self) -> &[QueueSample] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(pairs: &[(&str, f64)]) -> RawReadings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_update_overwrites_known_and_ignores_unknown() {
        let mut state = IntersectionState::default();
        state.update(&readings(&[("N", 4.0), ("E_1", 2.0), ("Up", 99.0)]), None);
        assert_eq!(state.queue(Approach::North), 4);
        assert_eq!(state.queue(Approach::East), 2);
        assert_eq!(state.queue(Approach::South), 0);
        assert_eq!(state.total_queue(), 6);

        // Approaches absent from the snapshot keep their last value.
        state.update(&readings(&[("S", 1.0)]), None);
        assert_eq!(state.queue(Approach::North), 4);
        assert_eq!(state.queue(Approach::South), 1);
    }

    #[test]
    fn test_malformed_readings_become_zero() {
        let mut state = IntersectionState::default();
        state.update(
            &readings(&[("N", -3.0), ("S", f64::NAN), ("E", f64::INFINITY), ("W", 2.9)]),
            None,
        );
        assert_eq!(state.queue(Approach::North), 0);
        assert_eq!(state.queue(Approach::South), 0);
        assert_eq!(state.queue(Approach::East), 0);
        assert_eq!(state.queue(Approach::West), 2);
    }

    #[test]
    fn test_huge_readings_are_capped_and_sums_do_not_overflow() {
        let max = u32::MAX as f64;
        let mut state = IntersectionState::default();
        state.update(
            &readings(&[("N", max), ("S", max), ("E", 1e300), ("W", 3.0)]),
            Some(&readings(&[("N", max), ("S", max), ("E", max), ("W", max)])),
        );
        assert_eq!(state.queue(Approach::North), MAX_SENSOR_COUNT);
        assert_eq!(state.queue(Approach::East), MAX_SENSOR_COUNT);
        assert_eq!(state.total_queue(), 3 * MAX_SENSOR_COUNT + 3);
        assert_eq!(state.total_approaching(), 4 * MAX_SENSOR_COUNT);
        assert_eq!(state.serving_queue(SignalMode::NsStraight), 2 * MAX_SENSOR_COUNT);
        assert_eq!(state.history()[0].total_queue, 3 * MAX_SENSOR_COUNT + 3);
        assert!(state.queue_variance().is_finite());
    }

    #[test]
    fn test_saturating_total_stops_at_u32_max() {
        assert_eq!(saturating_total([u32::MAX, u32::MAX, 1].into_iter()), u32::MAX);
        assert_eq!(saturating_total([1, 2, 3].into_iter()), 6);
    }

    #[test]
    fn test_history_sample_per_update() {
        let mut state = IntersectionState::default();
        state.update(&readings(&[("N", 2.0), ("S", 4.0), ("E", 6.0), ("W", 8.0)]), None);
        let sample = state.history()[0];
        assert_eq!(sample.step, 1);
        assert_eq!(sample.total_queue, 20);
        assert!((sample.variance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_is_idempotent_apart_from_step() {
        let snapshot = readings(&[("N", 3.0), ("S", 1.0), ("E", 0.0), ("W", 7.0)]);
        let mut state = IntersectionState::default();
        state.update(&snapshot, None);
        let queues_after_first = state.queue_values();
        state.update(&snapshot, None);

        assert_eq!(state.queue_values(), queues_after_first);
        let history = state.history();
        assert_eq!(history.len(), 2);
        assert_ne!(history[0].step, history[1].step);
        assert_eq!(history[0].total_queue, history[1].total_queue);
        assert_eq!(history[0].variance, history[1].variance);
    }

    #[test]
    fn test_throughput_potential_per_mode() {
        let mut state = IntersectionState::default();
        state.update(&readings(&[("N", 10.0), ("S", 10.0), ("E", 4.0), ("W", 6.0)]), None);
        assert!((state.throughput_potential(SignalMode::NsStraight) - 14.0).abs() < 1e-9);
        assert!((state.throughput_potential(SignalMode::NsTurn) - 6.0).abs() < 1e-9);
        assert!((state.throughput_potential(SignalMode::EwStraight) - 7.0).abs() < 1e-9);
        assert!((state.throughput_potential(SignalMode::EwTurn) - 3.0).abs() < 1e-9);
        assert_eq!(state.throughput_potential(SignalMode::NorthOnly), 10.0);
        assert_eq!(state.throughput_potential(SignalMode::EastOnly), 4.0);
    }

    #[test]
    fn test_potential_monotone_in_served_and_blind_to_unserved() {
        let base = [3.0, 5.0, 2.0, 1.0];
        for mode in SignalMode::ALL {
            for approach in Approach::ALL {
                let mut bumped = base;
                bumped[approach.index()] += 4.0;
                let before = potential_from(&base, mode, 0.7);
                let after = potential_from(&bumped, mode, 0.7);
                if mode.serves(approach) {
                    assert!(after >= before, "{:?} not monotone in {:?}", mode, approach);
                } else {
                    assert_eq!(after, before, "{:?} depends on {:?}", mode, approach);
                }
            }
        }
    }

    #[test]
    fn test_blend_and_serving_queue() {
        let mut state = IntersectionState::default();
        state.update(
            &readings(&[("N", 20.0), ("S", 20.0), ("E", 2.0), ("W", 2.0)]),
            Some(&readings(&[("N", 10.0), ("S", 10.0)])),
        );
        let blended = state.blended_queues(0.5);
        assert_eq!(blended[Approach::North.index()], 15.0);
        assert_eq!(blended[Approach::East.index()], 1.0);
        assert_eq!(state.serving_queue(SignalMode::NsStraight), 40);
        assert_eq!(state.serving_queue(SignalMode::EastOnly), 2);
        assert_eq!(state.total_approaching(), 20);
    }

    #[test]
    fn test_straight_fraction_is_validated() {
        assert!(IntersectionState::new(0.7).is_ok());
        assert!(IntersectionState::new(1.2).is_err());
        assert!(IntersectionState::new(f64::NAN).is_err());
    }
}
