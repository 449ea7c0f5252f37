//! The sensing and actuation surface the controller consumes from a traffic simulator.

use crate::data_structures::{Approach, SignalIndication, VehicleType};
use crate::errors::{ActuationFault, SensingFault, SimulationError};
use crate::flow_analyzer::traffic_state::RawReadings;
use crate::simulation_engine::lanes::IntersectionLayout;

pub type VehicleId = String;

/// Per-lane and per-vehicle sensor queries.
pub trait TrafficSensors {
    fn queue_length(&self, lane: &str) -> Result<u32, SensingFault>;
    fn waiting_time(&self, lane: &str) -> Result<f64, SensingFault>;
    fn approaching_volume(&self, edge: &str) -> Result<u32, SensingFault>;
    fn emission(&self, lane: &str) -> Result<f64, SensingFault>;
    fn lane_length(&self, lane: &str) -> Result<f64, SensingFault>;
    fn vehicle_ids(&self, lane: &str) -> Result<Vec<VehicleId>, SensingFault>;
    fn vehicle_type(&self, vehicle: &str) -> Result<VehicleType, SensingFault>;
    fn vehicle_speed(&self, vehicle: &str) -> Result<f64, SensingFault>;
    /// Distance travelled along the vehicle's current lane, in meters.
    fn vehicle_position(&self, vehicle: &str) -> Result<f64, SensingFault>;
}

pub trait SignalActuator {
    fn current_indication(&self) -> Result<SignalIndication, SensingFault>;
    fn set_indication(&mut self, indication: SignalIndication) -> Result<(), ActuationFault>;
}

/// A simulator the episode runner can step.
pub trait TrafficSimulation: TrafficSensors + SignalActuator {
    fn advance(&mut self, dt: f64) -> Result<(), SimulationError>;

    /// Simulated seconds since the start of the episode.
    fn elapsed(&self) -> f64;
}

/// What the override detectors see of one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub id: VehicleId,
    pub vehicle_type: VehicleType,
    pub speed: f64,
    pub distance_to_stop_line: f64,
}

/// Fault-tolerant view over [`TrafficSensors`]: every fault reads as zero or "nothing there".
pub struct SensorReader<'a, S: TrafficSensors + ?Sized> {
    sensors: &'a S,
}

impl<'a, S: TrafficSensors + ?Sized> SensorReader<'a, S> {
    pub fn new(sensors: &'a S) -> Self {
        Self { sensors }
    }

    fn or_zero<T: Default>(result: Result<T, SensingFault>, what: &str, id: &str) -> T {
        result.unwrap_or_else(|fault| {
            log::debug!("Sensing fault on {} '{}': {}; reading as zero", what, id, fault);
            T::default()
        })
    }

    pub fn queue_length(&self, lane: &str) -> u32 {
        Self::or_zero(self.sensors.queue_length(lane), "queue", lane)
    }

    pub fn waiting_time(&self, lane: &str) -> f64 {
        Self::or_zero(self.sensors.waiting_time(lane), "waiting time", lane)
    }

    pub fn approaching_volume(&self, edge: &str) -> u32 {
        Self::or_zero(self.sensors.approaching_volume(edge), "approaching volume", edge)
    }

    pub fn emission(&self, lane: &str) -> f64 {
        Self::or_zero(self.sensors.emission(lane), "emission", lane)
    }

    /// Vehicles on a lane with their distance to the stop line. A lane whose length is
    /// unknown reports no vehicles; so does any vehicle whose type cannot be read.
    pub fn vehicles(&self, lane: &str) -> Vec<VehicleObservation> {
        let length = match self.sensors.lane_length(lane) {
            Ok(length) => length,
            Err(fault) => {
                log::debug!("Sensing fault on lane length '{}': {}", lane, fault);
                return Vec::new();
            }
        };
        let ids = Self::or_zero(self.sensors.vehicle_ids(lane), "vehicle list", lane);

        ids.into_iter()
            .filter_map(|id| {
                let vehicle_type = self.sensors.vehicle_type(&id).ok()?;
                let speed = Self::or_zero(self.sensors.vehicle_speed(&id), "speed", &id);
                let position = Self::or_zero(self.sensors.vehicle_position(&id), "position", &id);
                Some(VehicleObservation {
                    id,
                    vehicle_type,
                    speed: speed.max(0.0),
                    distance_to_stop_line: (length - position).max(0.0),
                })
            })
            .collect()
    }

    pub fn queue_snapshot(&self, layout: &IntersectionLayout) -> RawReadings {
        Approach::ALL
            .iter()
            .map(|&a| (a.to_string(), self.queue_length(layout.lane(a)) as f64))
            .collect()
    }

    pub fn approaching_snapshot(&self, layout: &IntersectionLayout) -> RawReadings {
        Approach::ALL
            .iter()
            .map(|&a| (a.to_string(), self.approaching_volume(layout.edge(a)) as f64))
            .collect()
    }

    pub fn waiting_snapshot(&self, layout: &IntersectionLayout) -> RawReadings {
        Approach::ALL
            .iter()
            .map(|&a| (a.to_string(), self.waiting_time(layout.lane(a))))
            .collect()
    }

    pub fn total_emission(&self, layout: &IntersectionLayout) -> f64 {
        Approach::ALL
            .iter()
            .map(|&a| self.emission(layout.lane(a)))
            .sum()
    }
}
