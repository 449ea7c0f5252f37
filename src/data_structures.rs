use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four compass-direction traffic streams entering the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Approach {
    North,
    South,
    East,
    West,
}

impl Approach {
    /// Fixed scan order used everywhere a deterministic walk over approaches is needed.
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::South,
        Approach::East,
        Approach::West,
    ];

    pub fn index(self) -> usize {
        match self {
            Approach::North => 0,
            Approach::South => 1,
            Approach::East => 2,
            Approach::West => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Approach::North => 'N',
            Approach::South => 'S',
            Approach::East => 'E',
            Approach::West => 'W',
        }
    }

    /// Lenient key parsing for sensor snapshots: "North", "n", or "N_1" all map to North.
    pub fn from_key(key: &str) -> Option<Self> {
        let head = key.split('_').next().unwrap_or(key).trim();
        match head.to_ascii_lowercase().as_str() {
            "n" | "north" => Some(Approach::North),
            "s" | "south" => Some(Approach::South),
            "e" | "east" => Some(Approach::East),
            "w" | "west" => Some(Approach::West),
            _ => None,
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Approach::North => "North",
            Approach::South => "South",
            Approach::East => "East",
            Approach::West => "West",
        };
        f.write_str(name)
    }
}

impl FromStr for Approach {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Approach::from_key(s).ok_or_else(|| s.to_string())
    }
}

/// Candidate right-of-way patterns. The numbering (1..=6) is also the tie-break order:
/// when a solver selects several modes, the lowest number wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalMode {
    NsStraight,
    NsTurn,
    EwStraight,
    EwTurn,
    NorthOnly,
    EastOnly,
}

impl SignalMode {
    pub const ALL: [SignalMode; 6] = [
        SignalMode::NsStraight,
        SignalMode::NsTurn,
        SignalMode::EwStraight,
        SignalMode::EwTurn,
        SignalMode::NorthOnly,
        SignalMode::EastOnly,
    ];

    pub fn number(self) -> u8 {
        match self {
            SignalMode::NsStraight => 1,
            SignalMode::NsTurn => 2,
            SignalMode::EwStraight => 3,
            SignalMode::EwTurn => 4,
            SignalMode::NorthOnly => 5,
            SignalMode::EastOnly => 6,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        SignalMode::ALL.iter().copied().find(|m| m.number() == number)
    }

    /// Approaches that receive right-of-way under this mode.
    pub fn served_approaches(self) -> &'static [Approach] {
        match self {
            SignalMode::NsStraight | SignalMode::NsTurn => &[Approach::North, Approach::South],
            SignalMode::EwStraight | SignalMode::EwTurn => &[Approach::East, Approach::West],
            SignalMode::NorthOnly => &[Approach::North],
            SignalMode::EastOnly => &[Approach::East],
        }
    }

    pub fn serves(self, approach: Approach) -> bool {
        self.served_approaches().contains(&approach)
    }

    /// Which movements are released. Single-approach modes release both.
    pub fn releases_straight(self) -> bool {
        !matches!(self, SignalMode::NsTurn | SignalMode::EwTurn)
    }

    pub fn releases_turns(self) -> bool {
        !matches!(self, SignalMode::NsStraight | SignalMode::EwStraight)
    }

    /// The mode an emergency preemption grants for a given approach.
    pub fn preemption_target(approach: Approach) -> Self {
        match approach {
            Approach::North | Approach::South => SignalMode::NsStraight,
            Approach::East | Approach::West => SignalMode::EwStraight,
        }
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

impl FromStr for SignalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        if let Ok(number) = normalized.parse::<u8>() {
            return SignalMode::from_number(number).ok_or_else(|| s.to_string());
        }
        match normalized.as_str() {
            "nsstraight" => Ok(SignalMode::NsStraight),
            "nsturn" => Ok(SignalMode::NsTurn),
            "ewstraight" => Ok(SignalMode::EwStraight),
            "ewturn" => Ok(SignalMode::EwTurn),
            "northonly" => Ok(SignalMode::NorthOnly),
            "eastonly" => Ok(SignalMode::EastOnly),
            _ => Err(s.to_string()),
        }
    }
}

/// Different types of vehicles the override detectors care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    EmergencyVan,
}

/// What the signal heads show. Yellow carries the mode being revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalIndication {
    Green(SignalMode),
    Yellow(SignalMode),
}

impl SignalIndication {
    pub fn mode(self) -> SignalMode {
        match self {
            SignalIndication::Green(mode) | SignalIndication::Yellow(mode) => mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approach_keys_are_lenient() {
        assert_eq!(Approach::from_key("N_1"), Some(Approach::North));
        assert_eq!(Approach::from_key("south"), Some(Approach::South));
        assert_eq!(Approach::from_key("E"), Some(Approach::East));
        assert_eq!(Approach::from_key("Northeast"), None);
        assert_eq!(Approach::from_key(""), None);
    }

    #[test]
    fn test_mode_numbers_round_trip() {
        for mode in SignalMode::ALL {
            assert_eq!(SignalMode::from_number(mode.number()), Some(mode));
        }
        assert_eq!(SignalMode::from_number(0), None);
        assert_eq!(SignalMode::from_number(7), None);
    }

    #[test]
    fn test_mode_parsing_accepts_common_spellings() {
        assert_eq!("NsStraight".parse::<SignalMode>(), Ok(SignalMode::NsStraight));
        assert_eq!("ew_turn".parse::<SignalMode>(), Ok(SignalMode::EwTurn));
        assert_eq!("6".parse::<SignalMode>(), Ok(SignalMode::EastOnly));
        assert!("diagonal".parse::<SignalMode>().is_err());
    }

    #[test]
    fn test_served_approaches() {
        assert!(SignalMode::NsTurn.serves(Approach::South));
        assert!(!SignalMode::NsTurn.serves(Approach::East));
        assert!(SignalMode::EastOnly.serves(Approach::East));
        assert!(!SignalMode::EastOnly.serves(Approach::West));
        assert_eq!(
            SignalMode::preemption_target(Approach::West),
            SignalMode::EwStraight
        );
    }
}
