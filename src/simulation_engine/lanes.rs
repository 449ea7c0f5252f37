use serde::{Deserialize, Serialize};

use crate::data_structures::Approach;

/// Sensor identifiers for one approach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachLanes {
    /// Incoming lane whose stopped vehicles form the queue.
    pub lane: String,
    /// Upstream edge used for the approaching-volume count.
    pub edge: String,
}

impl ApproachLanes {
    pub fn new(lane: &str, edge: &str) -> Self {
        Self {
            lane: lane.to_string(),
            edge: edge.to_string(),
        }
    }
}

/// Maps each approach of the intersection to its lane and edge identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionLayout {
    pub north: ApproachLanes,
    pub south: ApproachLanes,
    pub east: ApproachLanes,
    pub west: ApproachLanes,
}

impl Default for IntersectionLayout {
    fn default() -> Self {
        Self {
            north: ApproachLanes::new("n_in_0", "n_in"),
            south: ApproachLanes::new("s_in_0", "s_in"),
            east: ApproachLanes::new("e_in_0", "e_in"),
            west: ApproachLanes::new("w_in_0", "w_in"),
        }
    }
}

impl IntersectionLayout {
    pub fn lanes(&self, approach: Approach) -> &ApproachLanes {
        match approach {
            Approach::North => &self.north,
            Approach::South => &self.south,
            Approach::East => &self.east,
            Approach::West => &self.west,
        }
    }

    pub fn lane(&self, approach: Approach) -> &str {
        &self.lanes(approach).lane
    }

    pub fn edge(&self, approach: Approach) -> &str {
        &self.lanes(approach).edge
    }

    /// Reverse lookup used by simulators that receive lane or edge ids.
    pub fn approach_of(&self, id: &str) -> Option<Approach> {
        Approach::ALL
            .iter()
            .copied()
            .find(|&a| self.lane(a) == id || self.edge(a) == id)
    }
}
