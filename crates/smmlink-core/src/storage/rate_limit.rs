//! Minimum spacing between physical inserts

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{MeasurementStore, StoreError};

/// Drops inserts that arrive within `min_spacing` of the last accepted one
///
/// A suppressed insert is not an error; the caller sees `Ok`.
#[derive(Debug)]
pub struct RateLimited<S> {
    inner: S,
    min_spacing: Duration,
    last_insert: Option<Instant>,
}

impl<S> RateLimited<S> {
    /// Wrap `inner`, allowing at most one insert per `min_spacing`
    pub fn new(inner: S, min_spacing: Duration) -> Self {
        Self {
            inner,
            min_spacing,
            last_insert: None,
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Time of the last insert that reached the inner store
    pub fn last_insert(&self) -> Option<Instant> {
        self.last_insert
    }
}

impl<S: MeasurementStore> MeasurementStore for RateLimited<S> {
    fn insert_measurement(
        &mut self,
        patient_id: &str,
        heart_rate: &str,
        spo2: &str,
        resp_rate: &str,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(last) = self.last_insert {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_spacing {
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Insert suppressed by rate limit"
                );
                return Ok(());
            }
        }

        self.inner
            .insert_measurement(patient_id, heart_rate, spo2, resp_rate)?;
        self.last_insert = Some(now);
        Ok(())
    }
}
