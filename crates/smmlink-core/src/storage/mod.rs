//! Measurement persistence
//!
//! The cache hands finished measurements to a [`MeasurementStore`]. Stores
//! compose: [`RateLimited`] spaces inserts out in time, [`FanOut`] feeds
//! several stores at once, and [`JsonlStore`], [`MemoryStore`] and
//! [`RemoteForwarder`] are the sinks.

mod forward;
mod jsonl;
mod rate_limit;

pub use forward::RemoteForwarder;
pub use jsonl::JsonlStore;
pub use rate_limit::RateLimited;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors raised by measurement stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded
    #[error("Failed to serialize measurement: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The store refused the record
    #[error("Measurement rejected: {0}")]
    Rejected(String),

    /// The store cannot accept records right now
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One persisted set of vitals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Patient the measurement belongs to
    pub patient_id: String,
    /// Pulse rate, or the invalid sentinel
    pub heart_rate: String,
    /// SpO2, or the invalid sentinel
    pub spo2: String,
    /// Respiration rate, or the invalid sentinel
    pub resp_rate: String,
    /// Local time the measurement was taken
    pub timestamp: DateTime<Local>,
}

impl Measurement {
    /// A measurement stamped with the current local time
    pub fn now(patient_id: &str, heart_rate: &str, spo2: &str, resp_rate: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            heart_rate: heart_rate.to_string(),
            spo2: spo2.to_string(),
            resp_rate: resp_rate.to_string(),
            timestamp: Local::now(),
        }
    }
}

/// Destination for finished measurements
pub trait MeasurementStore {
    /// Persist one measurement. Values are already formatted, with the
    /// invalid sentinel standing in for unusable readings.
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError>;
}

impl<S: MeasurementStore + ?Sized> MeasurementStore for Box<S> {
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        (**self).insert_measurement(patient_id, heart_rate, spo2, resp_rate)
    }
}

/// In-memory store; clones share the same records
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<Measurement>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Measurement>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of every stored measurement, oldest first
    pub fn measurements(&self) -> Vec<Measurement> {
        self.lock().clone()
    }

    /// Number of stored measurements
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl MeasurementStore for MemoryStore {
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .push(Measurement::now(patient_id, heart_rate, spo2, resp_rate));
        Ok(())
    }
}

/// Forwards each insert to every inner store
///
/// All stores are attempted; the first error is returned.
#[derive(Default)]
pub struct FanOut {
    stores: Vec<Box<dyn MeasurementStore + Send>>,
}

impl FanOut {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store
    pub fn with(mut self, store: impl MeasurementStore + Send + 'static) -> Self {
        self.stores.push(Box::new(store));
        self
    }

    /// Number of inner stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether there are no inner stores
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl MeasurementStore for FanOut {
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        let mut first_error = None;
        for store in &mut self.stores {
            if let Err(e) = store.insert_measurement(patient_id, heart_rate, spo2, resp_rate) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
