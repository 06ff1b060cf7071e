//! The real bedside monitor
//!
//! Glues the pieces of the protocol together: bytes from the transport go
//! through the assembler and decoder into the snapshot and the measurement
//! cache, while the sequencer writes the handshake and request bursts.

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{Device, PatientContext};
use crate::config::MonitorConfig;
use crate::protocol::{
    decode, ConnectionSequencer, Frame, FrameAssembler, Lead, Packet, ProtocolError, Transport,
    TransportErrorKind, TransportEvent,
};
use crate::storage::MeasurementStore;
use crate::vitals::{EventSink, MeasurementCache, VitalsEvent, VitalsSnapshot};

/// SMM monitor reached through a [`Transport`]
#[derive(Debug)]
pub struct Monitor<T> {
    transport: T,
    sequencer: ConnectionSequencer,
    assembler: FrameAssembler,
    snapshot: VitalsSnapshot,
    cache: MeasurementCache,
    patient: PatientContext,
    sink: EventSink,
}

impl<T: Transport> Monitor<T> {
    /// Create a stopped monitor that persists into `store`
    pub fn new(
        transport: T,
        config: &MonitorConfig,
        store: Box<dyn MeasurementStore + Send>,
        patient: PatientContext,
    ) -> Self {
        Self {
            transport,
            sequencer: ConnectionSequencer::new(config),
            assembler: FrameAssembler::new(),
            snapshot: VitalsSnapshot::default(),
            cache: MeasurementCache::new(store),
            patient,
            sink: EventSink::detached(),
        }
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The connection state machine
    pub fn sequencer(&self) -> &ConnectionSequencer {
        &self.sequencer
    }

    /// The measurement cache
    pub fn cache(&self) -> &MeasurementCache {
        &self.cache
    }

    /// Frames dropped by the assembler so far
    pub fn dropped_frames(&self) -> u64 {
        self.assembler.dropped_frames()
    }

    /// Route one transport notification
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Data(bytes) => self.handle_bytes(&bytes),
            TransportEvent::Error { kind, message } => {
                self.handle_transport_error(kind, &message, now)
            }
        }
    }

    /// Feed received bytes; ignored while not monitoring
    pub fn handle_bytes(&mut self, bytes: &[u8]) {
        if !self.sequencer.is_monitoring() {
            return;
        }
        trace!("RX {:02X?}", bytes);
        for frame in self.assembler.feed(bytes) {
            self.dispatch(&frame);
        }
    }

    /// React to a transport error
    pub fn handle_transport_error(
        &mut self,
        kind: TransportErrorKind,
        message: &str,
        now: Instant,
    ) {
        self.sequencer
            .handle_error(&mut self.transport, kind, message, now);
    }

    fn dispatch(&mut self, frame: &Frame) {
        match decode(frame) {
            Ok(Some(packet)) => self.apply(packet),
            Ok(None) => trace!(code = frame.code, "Ignoring unhandled packet"),
            Err(e) => debug!("Packet dropped: {}", e),
        }
    }

    fn apply(&mut self, packet: Packet) {
        match packet {
            Packet::Ecg(ecg) => {
                for lead in Lead::ALL {
                    trace!(lead = lead.name(), samples = ?ecg.lead(lead), "ECG");
                }
                let event = self.snapshot.set_ecg_sample(ecg.live_sample());
                self.emit(event);
            }
            Packet::RespWaveform(sample) => {
                let event = self.snapshot.set_resp_waveform_sample(sample);
                self.emit(event);
            }
            Packet::RespRate(rate) => {
                let event = self.snapshot.set_resp_rate(rate);
                self.emit(event);
                self.cache.arm();
                self.evaluate_insert();
            }
            Packet::Oximetry { pleth, spo2, pulse } => {
                let events = [
                    self.snapshot.set_pleth_waveform_sample(pleth),
                    self.snapshot.set_spo2(spo2),
                    self.snapshot.set_heart_rate(pulse),
                ];
                for event in events {
                    self.emit(event);
                }
                self.evaluate_insert();
            }
        }
    }

    fn evaluate_insert(&mut self) {
        let patient_id = self.patient.get();
        self.cache.try_insert(&self.snapshot, &patient_id);
    }

    fn emit(&self, event: Option<VitalsEvent>) {
        if let Some(event) = event {
            self.sink.emit(event);
        }
    }
}

impl<T: Transport> Device for Monitor<T> {
    fn start(&mut self, now: Instant) -> Result<(), ProtocolError> {
        if self.sequencer.is_monitoring() {
            return Ok(());
        }
        self.assembler.clear();
        self.sequencer.start(&mut self.transport, now)?;
        info!("Monitoring started");
        self.sink.emit(VitalsEvent::MonitoringChanged(true));
        Ok(())
    }

    fn stop(&mut self) {
        let was_monitoring = self.sequencer.is_monitoring();
        self.sequencer.stop(&mut self.transport);
        self.assembler.clear();
        self.cache.disarm();
        if was_monitoring {
            self.sink.emit(VitalsEvent::MonitoringChanged(false));
        }
    }

    fn is_monitoring(&self) -> bool {
        self.sequencer.is_monitoring()
    }

    fn snapshot(&self) -> VitalsSnapshot {
        self.snapshot
    }

    fn attach(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    fn detach(&mut self) {
        self.sink = EventSink::detached();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.sequencer.next_deadline()
    }

    fn poll_timers(&mut self, now: Instant) {
        self.sequencer.poll_timers(&mut self.transport, now);
    }
}
