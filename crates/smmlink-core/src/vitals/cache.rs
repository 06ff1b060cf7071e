//! Insert gating for decoded vitals
//!
//! A respiration-rate packet marks the start of a new acquisition cycle and
//! arms the cache. The first evaluation afterwards that sees all three
//! vitals valid, with a patient selected, persists one measurement and
//! disarms until the next respiration-rate packet.

use tracing::{debug, warn};

use super::VitalsSnapshot;
use crate::storage::MeasurementStore;

/// Decides when the current vitals are persisted
pub struct MeasurementCache {
    store: Box<dyn MeasurementStore + Send>,
    ready: bool,
    inserted: u64,
}

impl std::fmt::Debug for MeasurementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementCache")
            .field("ready", &self.ready)
            .field("inserted", &self.inserted)
            .finish_non_exhaustive()
    }
}

impl MeasurementCache {
    /// Create a disarmed cache persisting into `store`
    pub fn new(store: Box<dyn MeasurementStore + Send>) -> Self {
        Self {
            store,
            ready: false,
            inserted: 0,
        }
    }

    /// Start a new acquisition cycle
    pub fn arm(&mut self) {
        self.ready = true;
    }

    /// Drop any pending cycle
    pub fn disarm(&mut self) {
        self.ready = false;
    }

    /// Whether a cycle is waiting to be persisted
    pub fn is_armed(&self) -> bool {
        self.ready
    }

    /// Number of measurements handed to the store
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Persist the snapshot if the cycle is armed, every vital is valid and
    /// a patient is selected. Returns whether the store accepted it.
    ///
    /// A store error leaves the cycle armed so the next packet retries.
    pub fn try_insert(&mut self, snapshot: &VitalsSnapshot, patient_id: &str) -> bool {
        if !self.ready {
            return false;
        }
        if patient_id.is_empty() {
            debug!("No patient selected, measurement not stored");
            return false;
        }
        if !(snapshot.heart_rate.is_valid()
            && snapshot.spo2.is_valid()
            && snapshot.resp_rate.is_valid())
        {
            return false;
        }

        let result = self.store.insert_measurement(
            patient_id,
            &snapshot.heart_rate.to_string(),
            &snapshot.spo2.to_string(),
            &snapshot.resp_rate.to_string(),
        );
        match result {
            Ok(()) => {
                debug!(
                    patient_id,
                    hr = %snapshot.heart_rate,
                    spo2 = %snapshot.spo2,
                    rr = %snapshot.resp_rate,
                    "Measurement stored"
                );
                self.ready = false;
                self.inserted += 1;
                true
            }
            Err(e) => {
                warn!("Failed to store measurement: {}", e);
                false
            }
        }
    }
}
