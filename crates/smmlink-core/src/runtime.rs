//! Async driver
//!
//! All device state lives on one tokio task. The task waits on transport
//! notifications, control commands and the next timer deadline, and hands
//! each to the facade in arrival order. Callers talk to it through a
//! [`MonitorHandle`].

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::device::{DeviceFacade, DeviceMode};
use crate::protocol::{ProtocolError, Transport, TransportEvent};
use crate::vitals::{VitalsEvent, VitalsSnapshot};

/// Errors returned through a [`MonitorHandle`]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The device rejected the request
    #[error(transparent)]
    Device(#[from] ProtocolError),

    /// The driver task is no longer running
    #[error("Monitor task has stopped")]
    Stopped,
}

type Reply<T> = oneshot::Sender<T>;

/// Requests handled by the driver task
#[derive(Debug)]
pub enum Command {
    /// Start the active device
    Start(Reply<Result<(), ProtocolError>>),
    /// Stop the active device
    Stop,
    /// Select the patient measurements are tagged with
    SetPatient(String),
    /// Switch between the real monitor and the simulator
    SetMode(DeviceMode, Reply<Result<(), ProtocolError>>),
    /// Read the active device's last-known vitals
    Snapshot(Reply<VitalsSnapshot>),
    /// Stop monitoring and end the task
    Shutdown,
}

/// Handle to a running driver task
#[derive(Debug)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<VitalsEvent>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .map_err(|_| RuntimeError::Stopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Start monitoring on the active device
    pub async fn start(&self) -> Result<(), RuntimeError> {
        Ok(self.request(Command::Start).await??)
    }

    /// Stop monitoring
    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.send(Command::Stop)
    }

    /// Select the current patient
    pub fn set_patient(&self, id: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(Command::SetPatient(id.into()))
    }

    /// Switch the active device
    pub async fn set_mode(&self, mode: DeviceMode) -> Result<(), RuntimeError> {
        Ok(self.request(|reply| Command::SetMode(mode, reply)).await??)
    }

    /// Last-known vitals of the active device
    pub async fn snapshot(&self) -> Result<VitalsSnapshot, RuntimeError> {
        self.request(Command::Snapshot).await
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<VitalsEvent> {
        self.events.subscribe()
    }

    /// Stop monitoring and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

/// Spawn the driver task for `facade`, fed by `transport_events`
///
/// Must be called from within a tokio runtime.
pub fn spawn<T>(
    facade: DeviceFacade<T>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> MonitorHandle
where
    T: Transport + Send + 'static,
{
    let (commands, command_rx) = mpsc::unbounded_channel();
    let events = facade.sender();
    let task = tokio::spawn(run(facade, transport_events, command_rx));
    MonitorHandle {
        commands,
        events,
        task,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive `facade` until a shutdown command arrives or every handle is gone
pub async fn run<T: Transport>(
    mut facade: DeviceFacade<T>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    info!("Monitor task started");
    loop {
        let deadline = facade.next_deadline();
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(facade.start(Instant::now()));
                    }
                    Some(Command::Stop) => facade.stop(),
                    Some(Command::SetPatient(id)) => facade.set_current_patient_id(&id),
                    Some(Command::SetMode(mode, reply)) => {
                        let _ = reply.send(facade.set_mode(mode, Instant::now()));
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(facade.snapshot());
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
            Some(event) = transport_events.recv() => {
                facade.handle_transport_event(event, Instant::now());
            }
            _ = sleep_until_deadline(deadline) => {
                facade.poll_timers(Instant::now());
            }
        }
    }

    facade.stop();
    debug!("Monitor task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::device::{Monitor, PatientContext, VitalsSimulator};
    use crate::protocol::transport::mock::MockTransport;
    use crate::protocol::Frame;
    use crate::storage::MemoryStore;
    use crate::vitals::Reading;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn spawn_mock(store: &MemoryStore) -> (MonitorHandle, mpsc::UnboundedSender<TransportEvent>) {
        let config = MonitorConfig {
            ports: vec!["/dev/monitor".to_string()],
            ..MonitorConfig::default()
        };
        let patient = PatientContext::default();
        let monitor = Monitor::new(
            MockTransport::new(),
            &config,
            Box::new(store.clone()),
            patient.clone(),
        );
        let facade = DeviceFacade::new(monitor, VitalsSimulator::with_seed(2), patient);
        let (tx, rx) = mpsc::unbounded_channel();
        (spawn(facade, rx), tx)
    }

    fn wire(code: u8, payload: Vec<u8>) -> Vec<u8> {
        Frame::new(code, payload).unwrap().to_bytes()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bytes_flow_to_observers() {
        let store = MemoryStore::new();
        let (handle, transport) = spawn_mock(&store);
        let mut events = handle.subscribe();

        handle.start().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), VitalsEvent::MonitoringChanged(true));

        transport
            .send(TransportEvent::Data(wire(0x04, vec![0, 0, 0, 0, 18, 0])))
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            VitalsEvent::RespirationRate(Reading::Valid(18))
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_measurement_stored_for_selected_patient() {
        let store = MemoryStore::new();
        let (handle, transport) = spawn_mock(&store);
        handle.set_patient("P-1").unwrap();
        handle.start().await.unwrap();

        transport
            .send(TransportEvent::Data(wire(0x15, vec![0, 0, 0, 97, 0, 70])))
            .unwrap();
        transport
            .send(TransportEvent::Data(wire(0x04, vec![0, 0, 0, 0, 16, 0])))
            .unwrap();
        // Let the task drain the transport channel before querying
        tokio::time::sleep(Duration::from_millis(1)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.resp_rate, Reading::Valid(16));
        assert_eq!(store.len(), 1);
        assert_eq!(store.measurements()[0].patient_id, "P-1");

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_mode_ticks_on_its_own() {
        let store = MemoryStore::new();
        let (handle, _transport) = spawn_mock(&store);
        handle.set_mode(DeviceMode::Simulated).await.unwrap();
        handle.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.heart_rate.is_valid());
        assert!(store.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let store = MemoryStore::new();
        let (handle, _transport) = spawn_mock(&store);
        let commands = handle.commands.clone();
        handle.shutdown().await;
        assert!(commands.send(Command::Stop).is_err());
    }
}
