// src/shared_data.rs

use serde::{Deserialize, Serialize};

/// One entry of the traffic state model's own history, appended on every `update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueSample {
    pub step: u64,
    pub total_queue: u32,
    pub variance: f64,
}

/// A record of the read-only history stream handed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub step: u64,
    pub time_seconds: f64,
    pub total_queue: u32,
    pub queue_variance: f64,
    pub total_emission: f64,
}

/// Population variance of a set of values; zero for an empty set.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_population_variance() {
        assert_eq!(population_variance(&[]), 0.0);
        assert_eq!(population_variance(&[3.0, 3.0, 3.0, 3.0]), 0.0);
        // mean 5, squared deviations 9 + 1 + 1 + 9 = 20, / 4
        assert!((population_variance(&[2.0, 4.0, 6.0, 8.0]) - 5.0).abs() < 1e-12);
    }
}
