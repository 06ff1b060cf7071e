//! Front door for observers
//!
//! Owns both vitals sources, keeps exactly one active, and republishes the
//! active one's events on a broadcast channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

use super::{Device, Monitor, PatientContext, VitalsSimulator};
use crate::protocol::{ProtocolError, Transport, TransportEvent};
use crate::vitals::{EventSink, VitalsEvent, VitalsSnapshot};

/// Capacity of the observer channel; slow observers lag rather than block
pub const EVENT_CAPACITY: usize = 1024;

/// Which source is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// The bedside monitor on the serial port
    #[default]
    Real,
    /// Synthetic vitals
    Simulated,
}

/// Arbitrates between the real monitor and the simulator
#[derive(Debug)]
pub struct DeviceFacade<T> {
    real: Monitor<T>,
    simulated: VitalsSimulator,
    mode: DeviceMode,
    patient: PatientContext,
    events: broadcast::Sender<VitalsEvent>,
}

impl<T: Transport> DeviceFacade<T> {
    /// Create a facade with the real monitor active
    ///
    /// `patient` should be the same context the monitor was built with, so
    /// measurements are tagged with the id set here.
    pub fn new(real: Monitor<T>, simulated: VitalsSimulator, patient: PatientContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut facade = Self {
            real,
            simulated,
            mode: DeviceMode::Real,
            patient,
            events,
        };
        facade.real.attach(EventSink::connected(facade.events.clone()));
        facade.simulated.detach();
        facade
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<VitalsEvent> {
        self.events.subscribe()
    }

    /// Sender side of the observer channel
    pub fn sender(&self) -> broadcast::Sender<VitalsEvent> {
        self.events.clone()
    }

    /// Active mode
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// The real monitor
    pub fn monitor(&self) -> &Monitor<T> {
        &self.real
    }

    /// Mutable access to the real monitor
    pub fn monitor_mut(&mut self) -> &mut Monitor<T> {
        &mut self.real
    }

    /// The simulator
    pub fn simulator(&self) -> &VitalsSimulator {
        &self.simulated
    }

    fn active(&self) -> &dyn Device {
        match self.mode {
            DeviceMode::Real => &self.real,
            DeviceMode::Simulated => &self.simulated,
        }
    }

    fn active_mut(&mut self) -> &mut dyn Device {
        match self.mode {
            DeviceMode::Real => &mut self.real,
            DeviceMode::Simulated => &mut self.simulated,
        }
    }

    /// Start the active device
    pub fn start(&mut self, now: Instant) -> Result<(), ProtocolError> {
        self.active_mut().start(now)
    }

    /// Stop the active device
    pub fn stop(&mut self) {
        self.active_mut().stop();
    }

    /// Switch the active device
    ///
    /// Both devices are stopped and the old one is disconnected from the
    /// observer channel before the new one is connected. Monitoring resumes
    /// on the new device if it was running; a failure to resume is returned
    /// with the switch already done.
    pub fn set_mode(&mut self, mode: DeviceMode, now: Instant) -> Result<(), ProtocolError> {
        if mode == self.mode {
            return Ok(());
        }

        let was_monitoring = self.is_monitoring();
        self.real.stop();
        self.simulated.stop();

        self.active_mut().detach();
        self.mode = mode;
        let sink = EventSink::connected(self.events.clone());
        self.active_mut().attach(sink);
        info!(?mode, "Active device switched");

        if was_monitoring {
            self.start(now)?;
        }
        Ok(())
    }

    /// Whether the active device is monitoring
    pub fn is_monitoring(&self) -> bool {
        self.active().is_monitoring()
    }

    /// Last-known vitals of the active device
    pub fn snapshot(&self) -> VitalsSnapshot {
        self.active().snapshot()
    }

    /// Pulse rate, or `"invalid"`
    pub fn heart_rate(&self) -> String {
        self.snapshot().heart_rate.to_string()
    }

    /// SpO2, or `"invalid"`
    pub fn spo2(&self) -> String {
        self.snapshot().spo2.to_string()
    }

    /// Respiration rate, or `"invalid"`
    pub fn resp_rate(&self) -> String {
        self.snapshot().resp_rate.to_string()
    }

    /// Live ECG sample
    pub fn ecg_sample(&self) -> u8 {
        self.snapshot().ecg_sample
    }

    /// Live respiration waveform sample
    pub fn resp_waveform_sample(&self) -> u8 {
        self.snapshot().resp_waveform_sample
    }

    /// Live pleth waveform sample
    pub fn pleth_waveform_sample(&self) -> u8 {
        self.snapshot().pleth_waveform_sample
    }

    /// Patient measurements are tagged with
    pub fn current_patient_id(&self) -> String {
        self.patient.get()
    }

    /// Select the patient; observers are told when it changes
    pub fn set_current_patient_id(&mut self, id: &str) {
        if self.patient.set(id) {
            info!(patient_id = id, "Patient changed");
            let _ = self.events.send(VitalsEvent::PatientChanged(id.to_string()));
        }
    }

    /// Route a transport notification to the real monitor
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        self.real.handle_event(event, now);
    }

    /// Earliest pending timer of either device
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.real.next_deadline(), self.simulated.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run due timers of both devices
    pub fn poll_timers(&mut self, now: Instant) {
        self.real.poll_timers(now);
        self.simulated.poll_timers(now);
    }
}
