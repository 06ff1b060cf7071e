//! Byte transport to the monitor
//!
//! The sequencer writes through [`Transport`]. Incoming bytes and errors
//! travel the other way as [`TransportEvent`]s on a channel, so the
//! engine only ever reacts to them from its own event loop.

use serialport::SerialPort;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::{serial::open_port, ProtocolError, READ_POLL_TIMEOUT_MS};
use crate::config::SerialSettings;

/// Classification of runtime transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The device went away underneath an open handle (unplugged adapter)
    Resource,
    /// The device node no longer exists
    DeviceNotFound,
    /// Permission to the device was lost
    Permission,
    /// A read or write timed out
    Timeout,
    /// Anything else
    Other,
}

impl TransportErrorKind {
    /// Whether monitoring should retry the connection after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::Resource | TransportErrorKind::DeviceNotFound
        )
    }

    /// Classify an I/O error from the port
    pub fn from_io(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => TransportErrorKind::DeviceNotFound,
            ErrorKind::PermissionDenied => TransportErrorKind::Permission,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset => TransportErrorKind::Resource,
            _ => TransportErrorKind::Other,
        }
    }
}

/// Notification delivered from the transport to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of bytes arrived
    Data(Vec<u8>),
    /// The transport reported an error
    Error {
        /// Error class
        kind: TransportErrorKind,
        /// Human-readable detail
        message: String,
    },
}

/// Write side of a connection to the monitor
pub trait Transport {
    /// Open the named port; an already open port is closed first
    fn open(&mut self, port: &str, settings: &SerialSettings) -> Result<(), ProtocolError>;

    /// Whether a port is currently open
    fn is_open(&self) -> bool;

    /// Write all bytes and wait (bounded) for them to drain
    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Close the port; closing a closed transport is a no-op
    fn close(&mut self);
}

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Transport over a real serial port
///
/// Reads happen on a dedicated OS thread with a short poll timeout; writes
/// happen on the caller's thread through a separate handle.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
    events: UnboundedSender<TransportEvent>,
    port_name: Option<String>,
}

impl SerialTransport {
    /// Create a closed transport and the receiver its events arrive on
    pub fn new() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                port: None,
                reader: None,
                events: tx,
                port_name: None,
            },
            rx,
        )
    }

    /// Name of the open port, if any
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn spawn_reader(&mut self, mut port: Box<dyn SerialPort>) -> io::Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let events = self.events.clone();

        let thread = thread::Builder::new()
            .name("smm-serial-reader".to_string())
            .spawn(move || {
                read_loop(
                    &mut port,
                    &stop_flag,
                    &events,
                    Duration::from_millis(READ_POLL_TIMEOUT_MS),
                );
                debug!("Serial reader thread exiting");
            })?;

        self.reader = Some(Reader { stop, thread });
        Ok(())
    }
}

/// Read outcomes that only mean nothing arrived yet
fn is_idle(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Forward everything read from `port` until `stop` is raised
///
/// Disconnect-class errors are reported and end the loop; the sequencer
/// closes the port and reopens it. Any other error is reported once per
/// streak and reading resumes after `pause`.
fn read_loop<R: Read + ?Sized>(
    port: &mut R,
    stop: &AtomicBool,
    events: &UnboundedSender<TransportEvent>,
    pause: Duration,
) {
    let mut buf = [0u8; 1024];
    let mut failing: Option<ErrorKind> = None;
    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                failing = None;
                if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if is_idle(e.kind()) => continue,
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let kind = TransportErrorKind::from_io(e.kind());
                if failing != Some(e.kind()) || kind.is_recoverable() {
                    let event = TransportEvent::Error {
                        kind,
                        message: e.to_string(),
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                if kind.is_recoverable() {
                    return;
                }
                failing = Some(e.kind());
                thread::sleep(pause);
            }
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, port: &str, settings: &SerialSettings) -> Result<(), ProtocolError> {
        if self.is_open() {
            self.close();
            // Give the adapter a moment before reopening
            thread::sleep(Duration::from_millis(100));
        }

        let handle = open_port(port, settings)?;
        let mut read_handle = handle
            .try_clone()
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
        read_handle
            .set_timeout(Duration::from_millis(READ_POLL_TIMEOUT_MS))
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        self.spawn_reader(read_handle)?;
        self.port = Some(handle);
        self.port_name = Some(port.to_string());
        info!(port, "Serial port opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let port = self.port.as_mut().ok_or(ProtocolError::PortNotOpen)?;
        let result = port.write_all(data).and_then(|_| port.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(ProtocolError::WriteTimeout),
            Err(e) => Err(ProtocolError::IoError(e)),
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.thread.join().is_err() {
                warn!("Serial reader thread panicked");
            }
        }
        if self.port.take().is_some() {
            info!(port = self.port_name.as_deref().unwrap_or("?"), "Serial port closed");
        }
        self.port_name = None;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// In-memory transport recording every call
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub port: Option<String>,
        pub opened: Vec<String>,
        pub written: Vec<Vec<u8>>,
        pub fail_ports: Vec<String>,
        pub fail_writes: bool,
        pub closes: usize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_port(mut self, port: &str) -> Self {
            self.fail_ports.push(port.to_string());
            self
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self, port: &str, _settings: &SerialSettings) -> Result<(), ProtocolError> {
            self.opened.push(port.to_string());
            if self.fail_ports.iter().any(|p| p == port) {
                return Err(ProtocolError::SerialError(format!("{port}: no such device")));
            }
            self.port = Some(port.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn write(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
            if self.port.is_none() {
                return Err(ProtocolError::PortNotOpen);
            }
            if self.fail_writes {
                return Err(ProtocolError::WriteTimeout);
            }
            self.written.push(data.to_vec());
            Ok(())
        }

        fn close(&mut self) {
            if self.port.take().is_some() {
                self.closes += 1;
            }
        }
    }
}
