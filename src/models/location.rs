use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{ACCURACY_FAIR_METERS, ACCURACY_GOOD_METERS, MAP_LINK_BASE};

/// One position fix. Produced only by the location service and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub captured_at_epoch_ms: i64,
}

/// Coarse quality bucket for a fix's reported accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyGrade {
    Good,
    Fair,
    Poor,
}

impl fmt::Display for AccuracyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccuracyGrade::Good => write!(f, "good"),
            AccuracyGrade::Fair => write!(f, "fair"),
            AccuracyGrade::Poor => write!(f, "poor"),
        }
    }
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at_epoch_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// `https://maps.google.com/?q={lat},{lng}`. Downstream consumers parse
    /// this exact shape.
    pub fn map_link(&self) -> String {
        format!("{}{},{}", MAP_LINK_BASE, self.latitude, self.longitude)
    }

    /// Coordinates with six decimals, as shown on confirmation screens.
    pub fn coordinates_display(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }

    pub fn accuracy_grade(&self) -> AccuracyGrade {
        if self.accuracy_meters <= ACCURACY_GOOD_METERS {
            AccuracyGrade::Good
        } else if self.accuracy_meters <= ACCURACY_FAIR_METERS {
            AccuracyGrade::Fair
        } else {
            AccuracyGrade::Poor
        }
    }
}
