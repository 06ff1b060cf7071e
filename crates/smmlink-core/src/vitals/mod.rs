//! Decoded vitals
//!
//! Holds the last-known values reported by the monitor, the change events
//! published to observers, and the cache that decides when a measurement
//! is persisted.

mod cache;

pub use cache::MeasurementCache;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Text used for a reading the monitor flagged as unusable
pub const INVALID: &str = "invalid";

/// A numeric reading that may carry the monitor's "no sensor" sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading<T> {
    /// A usable value
    Valid(T),
    /// Sensor disconnected or value out of range
    Invalid,
}

impl<T> Default for Reading<T> {
    fn default() -> Self {
        Reading::Invalid
    }
}

impl<T: Copy> Reading<T> {
    /// Wrap `value` as valid when `accept` holds for it
    pub fn checked(value: T, accept: impl FnOnce(T) -> bool) -> Self {
        if accept(value) {
            Reading::Valid(value)
        } else {
            Reading::Invalid
        }
    }

    /// The value, if valid
    pub fn value(&self) -> Option<T> {
        match self {
            Reading::Valid(v) => Some(*v),
            Reading::Invalid => None,
        }
    }

    /// Whether this reading is usable
    pub fn is_valid(&self) -> bool {
        matches!(self, Reading::Valid(_))
    }
}

impl<T: fmt::Display> fmt::Display for Reading<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Valid(v) => v.fmt(f),
            Reading::Invalid => f.write_str(INVALID),
        }
    }
}

/// Change notification published to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VitalsEvent {
    /// Pulse rate changed
    HeartRate(Reading<u16>),
    /// SpO2 changed
    Spo2(Reading<u8>),
    /// Respiration rate changed
    RespirationRate(Reading<u8>),
    /// Live ECG sample (lead I) changed
    EcgSample(u8),
    /// Live respiration waveform sample changed
    RespWaveformSample(u8),
    /// Live plethysmographic waveform sample changed
    PlethSample(u8),
    /// Monitoring was started or stopped
    MonitoringChanged(bool),
    /// The patient measurements are tagged with changed
    PatientChanged(String),
}

/// Where a device publishes its events
///
/// A detached sink silently drops everything, so a device that is not the
/// active one can never leak events to observers.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<broadcast::Sender<VitalsEvent>>,
}

impl EventSink {
    /// Sink connected to a broadcast channel
    pub fn connected(tx: broadcast::Sender<VitalsEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether events currently reach anyone
    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: VitalsEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Last-known decoded values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VitalsSnapshot {
    /// Pulse rate in beats per minute
    pub heart_rate: Reading<u16>,
    /// Blood oxygen saturation percentage
    pub spo2: Reading<u8>,
    /// Respiration rate in breaths per minute
    pub resp_rate: Reading<u8>,
    /// Live ECG sample
    pub ecg_sample: u8,
    /// Live respiration waveform sample
    pub resp_waveform_sample: u8,
    /// Live plethysmographic waveform sample
    pub pleth_waveform_sample: u8,
}

/// Store `value` into `slot`, returning the event only when it changed
fn update<T: PartialEq + Copy>(
    slot: &mut T,
    value: T,
    event: impl FnOnce(T) -> VitalsEvent,
) -> Option<VitalsEvent> {
    if *slot == value {
        return None;
    }
    *slot = value;
    Some(event(value))
}

impl VitalsSnapshot {
    /// Update the pulse rate
    pub fn set_heart_rate(&mut self, value: Reading<u16>) -> Option<VitalsEvent> {
        update(&mut self.heart_rate, value, VitalsEvent::HeartRate)
    }

    /// Update SpO2
    pub fn set_spo2(&mut self, value: Reading<u8>) -> Option<VitalsEvent> {
        update(&mut self.spo2, value, VitalsEvent::Spo2)
    }

    /// Update the respiration rate
    pub fn set_resp_rate(&mut self, value: Reading<u8>) -> Option<VitalsEvent> {
        update(&mut self.resp_rate, value, VitalsEvent::RespirationRate)
    }

    /// Update the ECG sample
    pub fn set_ecg_sample(&mut self, value: u8) -> Option<VitalsEvent> {
        update(&mut self.ecg_sample, value, VitalsEvent::EcgSample)
    }

    /// Update the respiration waveform sample
    pub fn set_resp_waveform_sample(&mut self, value: u8) -> Option<VitalsEvent> {
        update(
            &mut self.resp_waveform_sample,
            value,
            VitalsEvent::RespWaveformSample,
        )
    }

    /// Update the pleth waveform sample
    pub fn set_pleth_waveform_sample(&mut self, value: u8) -> Option<VitalsEvent> {
        update(
            &mut self.pleth_waveform_sample,
            value,
            VitalsEvent::PlethSample,
        )
    }
}
