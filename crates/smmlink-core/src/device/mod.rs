//! Vitals sources
//!
//! A [`Device`] is anything that produces vitals: the real bedside monitor
//! behind a serial port ([`Monitor`]) or the synthetic [`VitalsSimulator`].
//! [`DeviceFacade`] keeps exactly one of them active.

mod facade;
mod monitor;
mod simulator;

pub use facade::{DeviceFacade, DeviceMode};
pub use monitor::Monitor;
pub use simulator::VitalsSimulator;

use std::sync::{Arc, RwLock};
use tokio::time::Instant;

use crate::protocol::ProtocolError;
use crate::vitals::{EventSink, VitalsSnapshot};

/// Common interface of every vitals source
///
/// Devices are driven from a single task: they never sleep, they report
/// their next timer deadline and expect [`Device::poll_timers`] once it
/// has passed.
pub trait Device {
    /// Begin monitoring; starting an active device is a no-op
    fn start(&mut self, now: Instant) -> Result<(), ProtocolError>;

    /// Stop monitoring; always succeeds and may be repeated
    fn stop(&mut self);

    /// Whether the device is monitoring
    fn is_monitoring(&self) -> bool;

    /// Last-known vitals
    fn snapshot(&self) -> VitalsSnapshot;

    /// Publish future events to `sink`
    fn attach(&mut self, sink: EventSink);

    /// Stop publishing events
    fn detach(&mut self);

    /// Earliest pending timer deadline
    fn next_deadline(&self) -> Option<Instant>;

    /// Run every timer due at `now`
    fn poll_timers(&mut self, now: Instant);
}

/// Patient id measurements are tagged with, shared between the facade and
/// the real monitor
#[derive(Debug, Clone, Default)]
pub struct PatientContext {
    id: Arc<RwLock<String>>,
}

impl PatientContext {
    /// Context with an initial patient id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Arc::new(RwLock::new(id.into())),
        }
    }

    /// Current patient id; empty when none is selected
    pub fn get(&self) -> String {
        self.id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the patient id, returning whether it changed
    pub fn set(&self, id: &str) -> bool {
        let mut current = self.id.write().unwrap_or_else(|e| e.into_inner());
        if *current == id {
            return false;
        }
        *current = id.to_string();
        true
    }
}
