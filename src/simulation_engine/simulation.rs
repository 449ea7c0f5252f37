// simulation.rs
use crate::data_structures::{Approach, SignalIndication, SignalMode, VehicleType};
use crate::errors::{ActuationFault, ConfigError, SensingFault, SimulationError};
use crate::simulation_engine::interface::{
    SignalActuator, TrafficSensors, TrafficSimulation, VehicleId,
};
use crate::simulation_engine::lanes::IntersectionLayout;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Tunables of the synthetic intersection. Rates are vehicles per second, emissions are
/// grams per vehicle per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSettings {
    pub seed: u64,
    /// Arrival rate per approach in N, S, E, W order.
    pub arrival_rates: [f64; 4],
    /// Share of arrivals that turn.
    pub turn_share: f64,
    /// Queue discharge rate of a protected movement.
    pub saturation_flow: f64,
    pub lane_length: f64,
    /// Front-to-front distance of stopped vehicles.
    pub vehicle_spacing: f64,
    pub truck_share: f64,
    pub bus_share: f64,
    pub emergency_share: f64,
    pub idle_emission: f64,
    pub moving_emission: f64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            arrival_rates: [0.25, 0.25, 0.12, 0.12],
            turn_share: 0.3,
            saturation_flow: 0.5,
            lane_length: 200.0,
            vehicle_spacing: 7.5,
            truck_share: 0.15,
            bus_share: 0.04,
            emergency_share: 0.003,
            idle_emission: 1.2,
            moving_emission: 2.4,
        }
    }
}

impl SyntheticSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rate in self.arrival_rates {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::invalid(
                    "arrival_rates",
                    rate,
                    "must be non-negative",
                ));
            }
        }
        let shares = [
            ("turn_share", self.turn_share),
            ("truck_share", self.truck_share),
            ("bus_share", self.bus_share),
            ("emergency_share", self.emergency_share),
        ];
        for (name, share) in shares {
            if !(0.0..=1.0).contains(&share) {
                return Err(ConfigError::invalid(name, share, "must lie in [0, 1]"));
            }
        }
        let mixed = self.truck_share + self.bus_share + self.emergency_share;
        if mixed > 1.0 {
            return Err(ConfigError::invalid(
                "truck_share",
                mixed,
                "vehicle type shares must not sum above 1",
            ));
        }
        if !self.saturation_flow.is_finite() || self.saturation_flow <= 0.0 {
            return Err(ConfigError::invalid(
                "saturation_flow",
                self.saturation_flow,
                "must be positive",
            ));
        }
        if self.vehicle_spacing <= 0.0 || self.lane_length <= self.vehicle_spacing {
            return Err(ConfigError::invalid(
                "lane_length",
                self.lane_length,
                "must exceed vehicle_spacing",
            ));
        }
        Ok(())
    }
}

/// How the displayed green treats a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    Protected,
    /// Turns yielding to opposing straight traffic; discharge at half rate.
    Permitted,
    Blocked,
}

fn movement(mode: SignalMode, turning: bool) -> Movement {
    match (turning, mode.releases_straight(), mode.releases_turns()) {
        (true, _, true) | (false, true, _) => Movement::Protected,
        (true, true, false) => Movement::Permitted,
        _ => Movement::Blocked,
    }
}

#[derive(Debug, Clone)]
struct SimVehicle {
    id: VehicleId,
    vehicle_type: VehicleType,
    turning: bool,
    /// Meters from the lane start.
    position: f64,
    speed: f64,
    queued: bool,
    waiting: f64,
}

/// Single-lane-per-approach stand-in for a microscopic simulator. Vehicles arrive at the
/// lane start, drive to the tail of the queue, and leave over the stop line while their
/// movement has green.
pub struct SyntheticIntersection {
    settings: SyntheticSettings,
    layout: IntersectionLayout,
    /// Per approach, ordered front (nearest the stop line) to back.
    lanes: [Vec<SimVehicle>; 4],
    indication: Option<SignalIndication>,
    elapsed: f64,
    next_vehicle_id: u64,
    rng: StdRng,
    discharge_credit: [f64; 4],
    discharged: [u64; 4],
    dropped: u64,
}

impl SyntheticIntersection {
    pub fn new(settings: SyntheticSettings, layout: IntersectionLayout) -> Result<Self, ConfigError> {
        settings.validate()?;
        let rng = StdRng::seed_from_u64(settings.seed);
        Ok(Self {
            settings,
            layout,
            lanes: Default::default(),
            indication: None,
            elapsed: 0.0,
            next_vehicle_id: 1,
            rng,
            discharge_credit: [0.0; 4],
            discharged: [0; 4],
            dropped: 0,
        })
    }

    pub fn settings(&self) -> &SyntheticSettings {
        &self.settings
    }

    pub fn layout(&self) -> &IntersectionLayout {
        &self.layout
    }

    pub fn indication(&self) -> Option<SignalIndication> {
        self.indication
    }

    /// Vehicles that have crossed the stop line, per approach.
    pub fn discharged(&self, approach: Approach) -> u64 {
        self.discharged[approach.index()]
    }

    pub fn total_discharged(&self) -> u64 {
        self.discharged.iter().sum()
    }

    /// Arrivals turned away because the lane was full back to its start.
    pub fn dropped_arrivals(&self) -> u64 {
        self.dropped
    }

    pub fn vehicle_count(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    /// Places a vehicle on an approach; a non-positive speed places it stopped in the queue.
    pub fn inject_vehicle(
        &mut self,
        approach: Approach,
        vehicle_type: VehicleType,
        distance_to_stop_line: f64,
        speed: f64,
        turning: bool,
    ) -> VehicleId {
        let length = self.settings.lane_length;
        let position = (length - distance_to_stop_line).clamp(0.0, length);
        let id = self.insert_vehicle(approach, vehicle_type, turning, position, speed.max(0.0));
        log::debug!(
            "Injected {:?} {} on {} at {:.1} m from the stop line",
            vehicle_type,
            id,
            approach,
            length - position
        );
        id
    }

    fn insert_vehicle(
        &mut self,
        approach: Approach,
        vehicle_type: VehicleType,
        turning: bool,
        position: f64,
        speed: f64,
    ) -> VehicleId {
        let id = format!("veh_{}", self.next_vehicle_id);
        self.next_vehicle_id += 1;
        let vehicle = SimVehicle {
            id: id.clone(),
            vehicle_type,
            turning,
            position,
            speed,
            queued: speed <= 0.0,
            waiting: 0.0,
        };
        let lane = &mut self.lanes[approach.index()];
        let slot = lane
            .iter()
            .position(|v| v.position < position)
            .unwrap_or(lane.len());
        lane.insert(slot, vehicle);
        id
    }

    fn green_mode_for(&self, approach: Approach) -> Option<SignalMode> {
        match self.indication {
            Some(SignalIndication::Green(mode)) if mode.serves(approach) => Some(mode),
            _ => None,
        }
    }

    fn sample_vehicle_type(&mut self) -> VehicleType {
        let rand_val: f64 = self.rng.random();
        let s = &self.settings;
        if rand_val < s.emergency_share {
            VehicleType::EmergencyVan
        } else if rand_val < s.emergency_share + s.bus_share {
            VehicleType::Bus
        } else if rand_val < s.emergency_share + s.bus_share + s.truck_share {
            VehicleType::Truck
        } else {
            VehicleType::Car
        }
    }

    /// Cruise speed in m/s, drawn from a km/h band per vehicle type.
    fn sample_speed(&mut self, vehicle_type: VehicleType) -> f64 {
        let kmh = match vehicle_type {
            VehicleType::Car => self.rng.random_range(40.0..60.0),
            VehicleType::Bus => self.rng.random_range(30.0..50.0),
            VehicleType::Truck => self.rng.random_range(30.0..50.0),
            VehicleType::EmergencyVan => self.rng.random_range(50.0..70.0),
        };
        kmh / 3.6
    }

    fn spawn_arrivals(&mut self, approach: Approach, dt: f64) {
        let expected = self.settings.arrival_rates[approach.index()] * dt;
        let mut count = expected.floor() as u32;
        if self.rng.random_bool((expected - expected.floor()).clamp(0.0, 1.0)) {
            count += 1;
        }
        for _ in 0..count {
            let tail_room = self.lanes[approach.index()]
                .last()
                .map(|v| v.position - self.settings.vehicle_spacing)
                .unwrap_or(self.settings.lane_length);
            if tail_room < 0.0 {
                self.dropped += 1;
                log::debug!("Lane on {} is full; arrival dropped", approach);
                continue;
            }
            let vehicle_type = self.sample_vehicle_type();
            let speed = self.sample_speed(vehicle_type);
            let turning = self.rng.random_bool(self.settings.turn_share);
            let id = self.insert_vehicle(approach, vehicle_type, turning, 0.0, speed);
            if vehicle_type != VehicleType::Car {
                log::debug!("Spawned {:?} {} on {}", vehicle_type, id, approach);
            }
        }
    }

    /// Releases queue heads at saturation flow while their movement has green.
    fn discharge_queue(&mut self, approach: Approach, dt: f64) {
        let i = approach.index();
        let mode = match self.green_mode_for(approach) {
            Some(mode) => mode,
            None => {
                self.discharge_credit[i] = 0.0;
                return;
            }
        };
        let mut credit = (self.discharge_credit[i] + self.settings.saturation_flow * dt).min(2.0);
        let lane = &mut self.lanes[i];
        while let Some(head) = lane.first().filter(|v| v.queued) {
            let cost = match movement(mode, head.turning) {
                Movement::Protected => 1.0,
                Movement::Permitted => 2.0,
                Movement::Blocked => break,
            };
            if credit < cost {
                break;
            }
            credit -= cost;
            lane.remove(0);
            self.discharged[i] += 1;
        }
        self.discharge_credit[i] = credit;
    }

    /// Advances moving vehicles; they either cross a green stop line unobstructed or join the
    /// queue. Stopped vehicles close up behind their leader.
    fn move_vehicles(&mut self, approach: Approach, dt: f64) {
        let i = approach.index();
        let mode = self.green_mode_for(approach);
        let spacing = self.settings.vehicle_spacing;
        let mut limit = self.settings.lane_length;
        let mut front_clear = true;
        let mut exited = 0;

        let vehicles = std::mem::take(&mut self.lanes[i]);
        let mut kept = Vec::with_capacity(vehicles.len());
        for mut vehicle in vehicles {
            if vehicle.queued {
                vehicle.position = limit;
                vehicle.waiting += dt;
            } else {
                let next = vehicle.position + vehicle.speed * dt;
                let passes = front_clear
                    && mode.map(|m| movement(m, vehicle.turning)) == Some(Movement::Protected);
                if next < limit {
                    vehicle.position = next;
                } else if passes {
                    exited += 1;
                    continue;
                } else {
                    vehicle.position = limit;
                    vehicle.speed = 0.0;
                    vehicle.queued = true;
                }
            }
            front_clear = false;
            limit = vehicle.position - spacing;
            kept.push(vehicle);
        }
        self.lanes[i] = kept;
        self.discharged[i] += exited;
    }

    fn lane_index(&self, lane: &str) -> Result<usize, SensingFault> {
        Approach::ALL
            .iter()
            .find(|&&a| self.layout.lane(a) == lane)
            .map(|a| a.index())
            .ok_or_else(|| SensingFault::UnknownLane(lane.to_string()))
    }

    fn find_vehicle(&self, id: &str) -> Result<&SimVehicle, SensingFault> {
        self.lanes
            .iter()
            .flatten()
            .find(|v| v.id == id)
            .ok_or_else(|| SensingFault::UnknownVehicle(id.to_string()))
    }
}

impl TrafficSensors for SyntheticIntersection {
    fn queue_length(&self, lane: &str) -> Result<u32, SensingFault> {
        let i = self.lane_index(lane)?;
        Ok(self.lanes[i].iter().filter(|v| v.queued).count() as u32)
    }

    fn waiting_time(&self, lane: &str) -> Result<f64, SensingFault> {
        let i = self.lane_index(lane)?;
        Ok(self.lanes[i].iter().map(|v| v.waiting).sum())
    }

    fn approaching_volume(&self, edge: &str) -> Result<u32, SensingFault> {
        let approach = Approach::ALL
            .iter()
            .copied()
            .find(|&a| self.layout.edge(a) == edge)
            .ok_or_else(|| SensingFault::UnknownEdge(edge.to_string()))?;
        Ok(self.lanes[approach.index()]
            .iter()
            .filter(|v| !v.queued)
            .count() as u32)
    }

    fn emission(&self, lane: &str) -> Result<f64, SensingFault> {
        let i = self.lane_index(lane)?;
        Ok(self.lanes[i]
            .iter()
            .map(|v| {
                if v.queued {
                    self.settings.idle_emission
                } else {
                    self.settings.moving_emission
                }
            })
            .sum())
    }

    fn lane_length(&self, lane: &str) -> Result<f64, SensingFault> {
        self.lane_index(lane)?;
        Ok(self.settings.lane_length)
    }

    fn vehicle_ids(&self, lane: &str) -> Result<Vec<VehicleId>, SensingFault> {
        let i = self.lane_index(lane)?;
        Ok(self.lanes[i].iter().map(|v| v.id.clone()).collect())
    }

    fn vehicle_type(&self, vehicle: &str) -> Result<VehicleType, SensingFault> {
        self.find_vehicle(vehicle).map(|v| v.vehicle_type)
    }

    fn vehicle_speed(&self, vehicle: &str) -> Result<f64, SensingFault> {
        self.find_vehicle(vehicle).map(|v| v.speed)
    }

    fn vehicle_position(&self, vehicle: &str) -> Result<f64, SensingFault> {
        self.find_vehicle(vehicle).map(|v| v.position)
    }
}

impl SignalActuator for SyntheticIntersection {
    fn current_indication(&self) -> Result<SignalIndication, SensingFault> {
        self.indication
            .ok_or_else(|| SensingFault::Backend("no signal program running".to_string()))
    }

    fn set_indication(&mut self, indication: SignalIndication) -> Result<(), ActuationFault> {
        log::debug!("[{:.1}s] Signal heads now {:?}", self.elapsed, indication);
        self.indication = Some(indication);
        Ok(())
    }
}

impl TrafficSimulation for SyntheticIntersection {
    fn advance(&mut self, dt: f64) -> Result<(), SimulationError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimulationError::Backend(format!("invalid time step {}", dt)));
        }
        for approach in Approach::ALL {
            self.discharge_queue(approach, dt);
            self.move_vehicles(approach, dt);
            self.spawn_arrivals(approach, dt);
        }
        self.elapsed += dt;
        Ok(())
    }

    fn elapsed(&self) -> f64 {
        self.elapsed
    }
}
