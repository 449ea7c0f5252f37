use serde::{Deserialize, Serialize};

use crate::data_structures::{Approach, VehicleType};
use crate::simulation_engine::interface::{SensorReader, TrafficSensors};
use crate::simulation_engine::lanes::IntersectionLayout;

/// A condition that overrides the normal optimization cycle, tagged with the approach it
/// concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSignal {
    Emergency(Approach),
    DilemmaZone(Approach),
    TransitPriority(Approach),
}

impl OverrideSignal {
    pub fn approach(self) -> Approach {
        match self {
            OverrideSignal::Emergency(a)
            | OverrideSignal::DilemmaZone(a)
            | OverrideSignal::TransitPriority(a) => a,
        }
    }
}

/// A pluggable check run by the controller. `served` lists the approaches that have
/// right-of-way, or will have it once a clearance completes; detectors that only care about
/// the green approaches look there.
pub trait OverrideDetector: Send {
    fn name(&self) -> &str;

    fn detect(
        &self,
        sensors: &dyn TrafficSensors,
        layout: &IntersectionLayout,
        served: &[Approach],
    ) -> Option<OverrideSignal>;
}

/// Emergency vans within `detection_range` meters of the stop line, on any approach. Approaches
/// outside `served` are scanned first, each group in N, S, E, W order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyDetector {
    pub detection_range: f64,
}

impl Default for EmergencyDetector {
    fn default() -> Self {
        Self {
            detection_range: 150.0,
        }
    }
}

impl OverrideDetector for EmergencyDetector {
    fn name(&self) -> &str {
        "emergency"
    }

    fn detect(
        &self,
        sensors: &dyn TrafficSensors,
        layout: &IntersectionLayout,
        served: &[Approach],
    ) -> Option<OverrideSignal> {
        let reader = SensorReader::new(sensors);
        let has_van = |approach: Approach| {
            reader.vehicles(layout.lane(approach)).iter().any(|v| {
                v.vehicle_type == VehicleType::EmergencyVan
                    && v.distance_to_stop_line <= self.detection_range
            })
        };
        // A van facing red outranks one that already has right-of-way.
        let (waiting, moving): (Vec<Approach>, Vec<Approach>) =
            Approach::ALL.iter().copied().partition(|a| !served.contains(a));
        waiting
            .into_iter()
            .chain(moving)
            .find(|&approach| has_van(approach))
            .map(OverrideSignal::Emergency)
    }
}

/// Fast vehicles on a green approach that could neither stop comfortably nor clear the
/// junction if the signal turned yellow now. The zone is expressed as travel time to the
/// stop line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DilemmaZoneDetector {
    /// m/s; slower vehicles can always stop.
    pub min_speed: f64,
    pub min_time_to_stop_line: f64,
    pub max_time_to_stop_line: f64,
}

impl Default for DilemmaZoneDetector {
    fn default() -> Self {
        Self {
            min_speed: 10.0,
            min_time_to_stop_line: 2.5,
            max_time_to_stop_line: 5.5,
        }
    }
}

impl DilemmaZoneDetector {
    pub fn in_zone(&self, speed: f64, distance_to_stop_line: f64) -> bool {
        if speed < self.min_speed || speed <= 0.0 {
            return false;
        }
        let time = distance_to_stop_line / speed;
        (self.min_time_to_stop_line..=self.max_time_to_stop_line).contains(&time)
    }
}

impl OverrideDetector for DilemmaZoneDetector {
    fn name(&self) -> &str {
        "dilemma_zone"
    }

    fn detect(
        &self,
        sensors: &dyn TrafficSensors,
        layout: &IntersectionLayout,
        served: &[Approach],
    ) -> Option<OverrideSignal> {
        let reader = SensorReader::new(sensors);
        served.iter().copied().find_map(|approach| {
            reader
                .vehicles(layout.lane(approach))
                .iter()
                .any(|v| self.in_zone(v.speed, v.distance_to_stop_line))
                .then_some(OverrideSignal::DilemmaZone(approach))
        })
    }
}

/// Buses within `detection_range` meters of the stop line on a green approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitPriorityDetector {
    pub detection_range: f64,
}

impl Default for TransitPriorityDetector {
    fn default() -> Self {
        Self {
            detection_range: 80.0,
        }
    }
}

impl OverrideDetector for TransitPriorityDetector {
    fn name(&self) -> &str {
        "transit_priority"
    }

    fn detect(
        &self,
        sensors: &dyn TrafficSensors,
        layout: &IntersectionLayout,
        served: &[Approach],
    ) -> Option<OverrideSignal> {
        let reader = SensorReader::new(sensors);
        served.iter().copied().find_map(|approach| {
            reader
                .vehicles(layout.lane(approach))
                .iter()
                .any(|v| {
                    v.vehicle_type == VehicleType::Bus
                        && v.distance_to_stop_line <= self.detection_range
                })
                .then_some(OverrideSignal::TransitPriority(approach))
        })
    }
}

/// The controller's detector slots, consulted in this fixed order: emergency, dilemma zone,
/// transit. An empty slot never fires.
#[derive(Default)]
pub struct DetectorSet {
    pub emergency: Option<Box<dyn OverrideDetector>>,
    pub dilemma_zone: Option<Box<dyn OverrideDetector>>,
    pub transit: Option<Box<dyn OverrideDetector>>,
}

impl DetectorSet {
    pub fn standard() -> Self {
        Self {
            emergency: Some(Box::new(EmergencyDetector::default())),
            dilemma_zone: Some(Box::new(DilemmaZoneDetector::default())),
            transit: Some(Box::new(TransitPriorityDetector::default())),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = |slot: &Option<Box<dyn OverrideDetector>>| slot.as_ref().map(|d| d.name().to_string());
        f.debug_struct("DetectorSet")
            .field("emergency", &name(&self.emergency))
            .field("dilemma_zone", &name(&self.dilemma_zone))
            .field("transit", &name(&self.transit))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dilemma_zone_band() {
        let detector = DilemmaZoneDetector::default();
        // 15 m/s, 60 m out: 4 s to the stop line
        assert!(detector.in_zone(15.0, 60.0));
        // Close enough to clear
        assert!(!detector.in_zone(15.0, 20.0));
        // Far enough to stop
        assert!(!detector.in_zone(15.0, 120.0));
        // Too slow to matter
        assert!(!detector.in_zone(5.0, 15.0));
        assert!(!detector.in_zone(0.0, 0.0));
    }

    #[test]
    fn test_signal_approach() {
        assert_eq!(
            OverrideSignal::TransitPriority(Approach::West).approach(),
            Approach::West
        );
    }
}
