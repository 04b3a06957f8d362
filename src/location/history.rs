//! Bounded, most-recent-first record of position fixes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::constants::LOCATION_HISTORY_CAPACITY;
use crate::models::LocationSample;

/// History shared between the alert state machine and whatever displays it.
pub type SharedHistory = Arc<Mutex<LocationHistory>>;

#[derive(Debug, Clone)]
pub struct LocationHistory {
    samples: VecDeque<LocationSample>,
    capacity: usize,
}

impl Default for LocationHistory {
    fn default() -> Self {
        Self::with_capacity(LOCATION_HISTORY_CAPACITY)
    }
}

impl LocationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn shared() -> SharedHistory {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Prepend a sample, evicting the oldest beyond capacity.
    pub fn push(&mut self, sample: LocationSample) {
        self.samples.push_front(sample);
        self.samples.truncate(self.capacity);
    }

    /// Push unless the sample is the one already at the front. A fix served
    /// from the position cache comes back identical and is kept once.
    /// Returns whether the sample was added.
    pub fn record(&mut self, sample: LocationSample) -> bool {
        if self.latest() == Some(&sample) {
            return false;
        }
        self.push(sample);
        true
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &LocationSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&LocationSample> {
        self.samples.front()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
