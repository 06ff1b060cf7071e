//! Connection sequencing
//!
//! Drives the monitor through open → handshake → periodic request bursts.
//! The link has no acknowledgements, so every step is timer driven:
//!
//! - after the port opens, a recurring handshake timer writes the
//!   handshake once and stops itself
//! - a one-shot delay later, a recurring poll timer starts
//! - each poll tick restarts the burst cursor and sends the requests one
//!   at a time, spaced by a one-shot burst timer
//!
//! The sequencer owns no I/O. Callers hand it a [`Transport`] and the
//! current time; it writes through the transport and arms timers that the
//! runtime reports back through [`ConnectionSequencer::poll_timers`].

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{commands::Request, ProtocolError, Transport, TransportErrorKind, HANDSHAKE};
use crate::config::{MonitorConfig, SerialSettings, TimingConfig};
use crate::timer::Scheduler;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not monitoring, port closed
    Disconnected,
    /// Port open, waiting for the handshake timer
    PortOpen,
    /// Handshake written, waiting for the first poll tick
    HandshakeSent,
    /// Request bursts are being sent
    Polling,
    /// Recovering from a transport error
    ErrorBackoff,
}

/// Timers owned by the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Recurring handshake attempt
    Handshake,
    /// One-shot delay between handshake and arming the poll timer
    PostHandshake,
    /// Recurring poll tick that starts a burst
    Poll,
    /// One-shot spacing between requests within a burst
    Burst,
}

/// State machine owning the connect → handshake → poll cadence
#[derive(Debug)]
pub struct ConnectionSequencer {
    state: ConnectionState,
    monitoring: bool,
    handshake_sent: bool,
    cursor: usize,
    burst: Vec<Vec<u8>>,
    ports: Vec<String>,
    active_port: Option<String>,
    serial: SerialSettings,
    timing: TimingConfig,
    timers: Scheduler<TimerKind>,
    tx_bytes: u64,
    tx_frames: u64,
}

impl ConnectionSequencer {
    /// Create a sequencer for the given configuration
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            monitoring: false,
            handshake_sent: false,
            cursor: 0,
            burst: Request::burst_bytes(),
            ports: config.ports.clone(),
            active_port: None,
            serial: config.serial.clone(),
            timing: config.timing.clone(),
            timers: Scheduler::new(),
            tx_bytes: 0,
            tx_frames: 0,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether monitoring is active
    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Whether the handshake was sent for the current connection attempt
    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }

    /// Index of the next request in the current burst
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Port that was opened by the last successful start
    pub fn active_port(&self) -> Option<&str> {
        self.active_port.as_deref()
    }

    /// Whether a given timer is pending
    pub fn timer_active(&self, kind: TimerKind) -> bool {
        self.timers.is_active(kind)
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Cumulative bytes and request frames written
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.tx_frames)
    }

    /// Open the first candidate port that works and arm the handshake timer
    ///
    /// Starting while already monitoring is a no-op.
    pub fn start<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        if self.monitoring {
            return Ok(());
        }

        let mut tried = Vec::with_capacity(self.ports.len());
        for port in &self.ports {
            match transport.open(port, &self.serial) {
                Ok(()) => {
                    info!(port = port.as_str(), "Connection successful");
                    self.active_port = Some(port.clone());
                    self.monitoring = true;
                    self.handshake_sent = false;
                    self.cursor = 0;
                    self.state = ConnectionState::PortOpen;
                    self.timers.cancel_all();
                    self.timers.start_every(
                        TimerKind::Handshake,
                        now,
                        self.timing.handshake_interval(),
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(port = port.as_str(), "Port could not be opened: {}", e);
                    tried.push(port.clone());
                }
            }
        }

        warn!("Could not connect to any port");
        self.state = ConnectionState::Disconnected;
        Err(ProtocolError::NoPortAvailable { tried })
    }

    /// Cancel every timer, close the transport and reset all flags
    ///
    /// Safe to call in any state, any number of times.
    pub fn stop<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.timers.cancel_all();
        if transport.is_open() {
            transport.close();
        }
        if self.monitoring {
            info!("Monitoring stopped");
        }
        self.monitoring = false;
        self.handshake_sent = false;
        self.cursor = 0;
        self.active_port = None;
        self.state = ConnectionState::Disconnected;
    }

    /// React to a runtime transport error
    ///
    /// Resource and device-not-found errors while monitoring close the port
    /// and retry the handshake (reopening the port first) every
    /// `reconnect_delay`. Other errors are only logged.
    pub fn handle_error<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        kind: TransportErrorKind,
        message: &str,
        now: Instant,
    ) {
        warn!(?kind, "Serial port error: {}", message);
        if !kind.is_recoverable() || !self.monitoring {
            return;
        }

        self.handshake_sent = false;
        self.cursor = 0;
        self.timers.cancel(TimerKind::PostHandshake);
        self.timers.cancel(TimerKind::Poll);
        self.timers.cancel(TimerKind::Burst);
        transport.close();
        self.state = ConnectionState::ErrorBackoff;
        self.timers.start_every(
            TimerKind::Handshake,
            now,
            self.timing.reconnect_delay(),
        );
    }

    /// Run every timer that is due at `now`
    pub fn poll_timers<T: Transport + ?Sized>(&mut self, transport: &mut T, now: Instant) {
        while let Some((kind, due)) = self.timers.pop_expired(now) {
            match kind {
                TimerKind::Handshake => self.send_handshake(transport, due),
                TimerKind::PostHandshake => {
                    if self.monitoring {
                        self.timers
                            .start_every(TimerKind::Poll, due, self.timing.poll_interval());
                    }
                }
                TimerKind::Poll => self.start_burst(transport, due),
                TimerKind::Burst => self.send_next(transport, due),
            }
        }
    }

    fn send_handshake<T: Transport + ?Sized>(&mut self, transport: &mut T, due: Instant) {
        if self.handshake_sent || !self.monitoring {
            return;
        }
        if !transport.is_open() && !self.reopen(transport) {
            return;
        }

        match transport.write(&HANDSHAKE) {
            Ok(()) => {
                info!("Handshake sent");
                self.tx_bytes += HANDSHAKE.len() as u64;
                self.handshake_sent = true;
                self.state = ConnectionState::HandshakeSent;
                self.timers.cancel(TimerKind::Handshake);
                self.timers.start_once(
                    TimerKind::PostHandshake,
                    due,
                    self.timing.post_handshake_delay(),
                );
            }
            Err(e) => warn!("Handshake write failed: {}", e),
        }
    }

    fn reopen<T: Transport + ?Sized>(&mut self, transport: &mut T) -> bool {
        let Some(port) = self.active_port.clone() else {
            return false;
        };
        match transport.open(&port, &self.serial) {
            Ok(()) => {
                info!(port = port.as_str(), "Reconnected");
                self.state = ConnectionState::PortOpen;
                true
            }
            Err(e) => {
                warn!(port = port.as_str(), "Reconnect failed: {}", e);
                false
            }
        }
    }

    fn start_burst<T: Transport + ?Sized>(&mut self, transport: &mut T, due: Instant) {
        if !transport.is_open() || !self.monitoring {
            return;
        }
        debug!("Starting request burst");
        self.state = ConnectionState::Polling;
        self.cursor = 0;
        self.send_next(transport, due);
    }

    fn send_next<T: Transport + ?Sized>(&mut self, transport: &mut T, due: Instant) {
        if !transport.is_open() || !self.monitoring || self.cursor >= self.burst.len() {
            return;
        }

        let request = &self.burst[self.cursor];
        match transport.write(request) {
            Ok(()) => {
                self.tx_bytes += request.len() as u64;
                self.tx_frames += 1;
            }
            Err(e) => warn!(index = self.cursor, "Request write failed: {}", e),
        }

        self.cursor += 1;
        if self.cursor < self.burst.len() {
            self.timers
                .start_once(TimerKind::Burst, due, self.timing.burst_spacing());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn config() -> MonitorConfig {
        MonitorConfig {
            ports: vec!["/dev/missing".to_string(), "/dev/monitor".to_string()],
            ..MonitorConfig::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn started() -> (ConnectionSequencer, MockTransport, Instant) {
        let mut transport = MockTransport::new().failing_port("/dev/missing");
        let mut seq = ConnectionSequencer::new(&config());
        let t0 = Instant::now();
        seq.start(&mut transport, t0).unwrap();
        (seq, transport, t0)
    }

    #[test]
    fn test_start_tries_candidates_in_order() {
        let (seq, transport, _) = started();
        assert_eq!(transport.opened, vec!["/dev/missing", "/dev/monitor"]);
        assert_eq!(seq.active_port(), Some("/dev/monitor"));
        assert_eq!(seq.state(), ConnectionState::PortOpen);
        assert!(seq.timer_active(TimerKind::Handshake));
    }

    #[test]
    fn test_start_fails_when_no_port_opens() {
        let mut transport = MockTransport::new()
            .failing_port("/dev/missing")
            .failing_port("/dev/monitor");
        let mut seq = ConnectionSequencer::new(&config());
        let err = seq.start(&mut transport, Instant::now()).unwrap_err();
        assert!(matches!(err, ProtocolError::NoPortAvailable { ref tried } if tried.len() == 2));
        assert!(!seq.is_monitoring());
        assert_eq!(seq.state(), ConnectionState::Disconnected);
        assert_eq!(seq.next_deadline(), None);
    }

    #[test]
    fn test_handshake_then_poll_cadence() {
        let (mut seq, mut transport, t0) = started();

        seq.poll_timers(&mut transport, t0 + ms(999));
        assert!(transport.written.is_empty());

        seq.poll_timers(&mut transport, t0 + ms(1000));
        assert_eq!(transport.written, vec![HANDSHAKE.to_vec()]);
        assert_eq!(seq.state(), ConnectionState::HandshakeSent);
        assert!(!seq.timer_active(TimerKind::Handshake));

        // Poll timer is armed 2 s after the handshake, first tick 5 s later
        seq.poll_timers(&mut transport, t0 + ms(7999));
        assert_eq!(transport.written.len(), 1);

        seq.poll_timers(&mut transport, t0 + ms(8000));
        assert_eq!(seq.state(), ConnectionState::Polling);
        assert_eq!(transport.written.len(), 2);
        assert_eq!(seq.cursor(), 1);

        seq.poll_timers(&mut transport, t0 + ms(11_000));
        let burst = Request::burst_bytes();
        assert_eq!(transport.written[1..].to_vec(), burst);
        assert_eq!(seq.cursor(), 4);
        assert!(!seq.timer_active(TimerKind::Burst));

        // Next burst at 13 s restarts from the first request
        seq.poll_timers(&mut transport, t0 + ms(13_000));
        assert_eq!(transport.written.last(), Some(&burst[0]));
        assert_eq!(seq.cursor(), 1);
    }

    #[test]
    fn test_stalled_poll_sends_one_burst() {
        let (mut seq, mut transport, t0) = started();
        seq.poll_timers(&mut transport, t0 + ms(11_000));
        assert_eq!(transport.written.len(), 5);

        // An hour without polling: one burst, not one per missed tick
        let late = t0 + ms(3_611_500);
        seq.poll_timers(&mut transport, late);
        assert_eq!(transport.written[5..].to_vec(), Request::burst_bytes());
        assert_eq!(seq.next_deadline(), Some(t0 + ms(3_613_000)));

        seq.poll_timers(&mut transport, t0 + ms(3_613_000));
        assert_eq!(transport.written.len(), 10);
        assert_eq!(seq.cursor(), 1);
    }

    #[test]
    fn test_stalled_backoff_reopens_once() {
        let (mut seq, mut transport, t0) = started();
        seq.handle_error(&mut transport, TransportErrorKind::Resource, "unplugged", t0);
        transport.fail_ports.push("/dev/monitor".to_string());
        let opens = transport.opened.len();

        seq.poll_timers(&mut transport, t0 + ms(600_000));
        assert_eq!(transport.opened.len(), opens + 1);
        assert_eq!(seq.state(), ConnectionState::ErrorBackoff);
    }

    #[test]
    fn test_handshake_sent_once() {
        let (mut seq, mut transport, t0) = started();
        seq.poll_timers(&mut transport, t0 + ms(30_000));
        let handshakes = transport
            .written
            .iter()
            .filter(|w| w.as_slice() == HANDSHAKE)
            .count();
        assert_eq!(handshakes, 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut seq, mut transport, t0) = started();
        seq.poll_timers(&mut transport, t0 + ms(9000));

        seq.stop(&mut transport);
        seq.stop(&mut transport);

        assert_eq!(seq.state(), ConnectionState::Disconnected);
        assert!(!transport.is_open());
        assert_eq!(transport.closes, 1);
        assert_eq!(seq.next_deadline(), None);
        assert_eq!(seq.cursor(), 0);
        assert!(!seq.handshake_sent());
    }

    #[test]
    fn test_post_handshake_delay_does_not_fire_after_stop() {
        let (mut seq, mut transport, t0) = started();
        seq.poll_timers(&mut transport, t0 + ms(1000));
        seq.stop(&mut transport);

        let written = transport.written.len();
        seq.poll_timers(&mut transport, t0 + ms(60_000));
        assert_eq!(transport.written.len(), written);
    }

    #[test]
    fn test_recoverable_error_reconnects() {
        let (mut seq, mut transport, t0) = started();
        seq.poll_timers(&mut transport, t0 + ms(9000));

        let t1 = t0 + ms(9500);
        seq.handle_error(&mut transport, TransportErrorKind::Resource, "unplugged", t1);
        assert_eq!(seq.state(), ConnectionState::ErrorBackoff);
        assert!(!transport.is_open());
        assert!(!seq.handshake_sent());
        assert!(!seq.timer_active(TimerKind::Poll));

        let before = transport.written.len();
        seq.poll_timers(&mut transport, t1 + ms(2000));
        assert!(transport.is_open());
        assert_eq!(transport.written[before..].to_vec(), vec![HANDSHAKE.to_vec()]);
        assert_eq!(seq.state(), ConnectionState::HandshakeSent);
    }

    #[test]
    fn test_reconnect_keeps_retrying() {
        let (mut seq, mut transport, t0) = started();
        seq.handle_error(&mut transport, TransportErrorKind::DeviceNotFound, "gone", t0);

        transport.fail_ports.push("/dev/monitor".to_string());
        seq.poll_timers(&mut transport, t0 + ms(2000));
        assert_eq!(seq.state(), ConnectionState::ErrorBackoff);
        assert!(seq.timer_active(TimerKind::Handshake));

        transport.fail_ports.clear();
        seq.poll_timers(&mut transport, t0 + ms(4000));
        assert_eq!(seq.state(), ConnectionState::HandshakeSent);
    }

    #[test]
    fn test_other_errors_are_ignored() {
        let (mut seq, mut transport, t0) = started();
        seq.handle_error(&mut transport, TransportErrorKind::Timeout, "slow", t0);
        assert_eq!(seq.state(), ConnectionState::PortOpen);
        assert!(transport.is_open());
    }

    #[test]
    fn test_error_while_stopped_is_ignored() {
        let mut transport = MockTransport::new();
        let mut seq = ConnectionSequencer::new(&config());
        seq.handle_error(&mut transport, TransportErrorKind::Resource, "x", Instant::now());
        assert_eq!(seq.state(), ConnectionState::Disconnected);
        assert_eq!(seq.next_deadline(), None);
    }
}
