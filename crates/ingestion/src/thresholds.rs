//! Alert threshold evaluation
//!
//! A reading breaches a threshold when its value is strictly below `min`
//! or strictly above `max`. Breaches are reported, never enforced.
//!
//! `AlertTracker` keeps one active alert per device and sensor type so a
//! sensor stuck out of range is reported once, not at its publish rate.

use std::collections::{HashMap, HashSet};
use std::fmt;

use contracts::{DeviceId, SensorReading, Severity, ThresholdConfig};

/// Which side of the permitted range was crossed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreachBound {
    BelowMin(f64),
    AboveMax(f64),
}

impl fmt::Display for BreachBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowMin(min) => write!(f, "below min {min}"),
            Self::AboveMax(max) => write!(f, "above max {max}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub sensor_type: String,
    pub value: f64,
    pub bound: BreachBound,
    pub severity: Severity,
    pub message: Option<String>,
}

/// Enabled thresholds indexed by sensor type
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    by_type: HashMap<String, Vec<ThresholdConfig>>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: &[ThresholdConfig]) -> Self {
        let mut by_type: HashMap<String, Vec<ThresholdConfig>> = HashMap::new();
        for threshold in thresholds.iter().filter(|t| t.enabled) {
            by_type
                .entry(threshold.sensor_type.clone())
                .or_default()
                .push(threshold.clone());
        }
        Self { by_type }
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn evaluate(&self, reading: &SensorReading) -> Vec<ThresholdBreach> {
        let Some(thresholds) = self.by_type.get(&reading.sensor_type) else {
            return Vec::new();
        };

        thresholds
            .iter()
            .filter_map(|t| {
                let bound = match (t.min, t.max) {
                    (Some(min), _) if reading.value < min => BreachBound::BelowMin(min),
                    (_, Some(max)) if reading.value > max => BreachBound::AboveMax(max),
                    _ => return None,
                };
                Some(ThresholdBreach {
                    sensor_type: reading.sensor_type.clone(),
                    value: reading.value,
                    bound,
                    severity: t.severity,
                    message: t.message.clone(),
                })
            })
            .collect()
    }
}

/// Alert state change caused by one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// In range, no alert was active
    Quiet,
    /// First breach since the sensor was last in range
    Raised,
    /// Still breaching while the alert is active
    Ongoing,
    /// Back in range after an active alert
    Cleared,
}

/// Active alerts keyed by device and sensor type
#[derive(Debug, Default)]
pub struct AlertTracker {
    active: HashSet<(DeviceId, String)>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, reading: &SensorReading, breaching: bool) -> AlertTransition {
        let key = (reading.device_id.clone(), reading.sensor_type.clone());
        match (breaching, self.active.contains(&key)) {
            (true, true) => AlertTransition::Ongoing,
            (true, false) => {
                self.active.insert(key);
                AlertTransition::Raised
            }
            (false, true) => {
                self.active.remove(&key);
                AlertTransition::Cleared
            }
            (false, false) => AlertTransition::Quiet,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
