//! Facade and driver task behaviour under a paused clock

mod common;

use common::{config, oximetry, resp_rate, MockTransport};
use pretty_assertions::assert_eq;
use smmlink_core::device::{DeviceFacade, DeviceMode, Monitor, PatientContext, VitalsSimulator};
use smmlink_core::protocol::{Request, TransportEvent, HANDSHAKE};
use smmlink_core::runtime::{self, MonitorHandle};
use smmlink_core::storage::MemoryStore;
use smmlink_core::vitals::{Reading, VitalsEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct Harness {
    handle: MonitorHandle,
    wire: Arc<Mutex<common::Wire>>,
    transport: mpsc::UnboundedSender<TransportEvent>,
    store: MemoryStore,
}

fn harness() -> Harness {
    let (mock, wire) = MockTransport::new();
    let store = MemoryStore::new();
    let patient = PatientContext::default();
    let monitor = Monitor::new(mock, &config(), Box::new(store.clone()), patient.clone());
    let facade = DeviceFacade::new(monitor, VitalsSimulator::with_seed(9), patient);
    let (tx, rx) = mpsc::unbounded_channel();
    Harness {
        handle: runtime::spawn(facade, rx),
        wire,
        transport: tx,
        store,
    }
}

fn drain(rx: &mut broadcast::Receiver<VitalsEvent>) -> Vec<VitalsEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_wire_cadence() {
    let h = harness();
    h.handle.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.wire.lock().unwrap().written, vec![HANDSHAKE.to_vec()]);

    // Handshake at 1 s, poll armed at 3 s, bursts at 8 s and 13 s
    tokio::time::sleep(Duration::from_millis(10_000)).await;
    let written = h.wire.lock().unwrap().written.clone();
    let mut expected = vec![HANDSHAKE.to_vec()];
    expected.extend(Request::burst_bytes());
    assert_eq!(written, expected);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let written = h.wire.lock().unwrap().written.clone();
    assert_eq!(written.len(), 6);
    assert_eq!(written[5], Request::burst_bytes()[0]);

    h.handle.shutdown().await;
    assert_eq!(h.wire.lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_observers_see_vitals_and_patient() {
    let h = harness();
    let mut rx = h.handle.subscribe();
    h.handle.set_patient("P-7").unwrap();
    h.handle.start().await.unwrap();

    h.transport.send(TransportEvent::Data(oximetry(97, 72))).unwrap();
    h.transport.send(TransportEvent::Data(resp_rate(18))).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            VitalsEvent::PatientChanged("P-7".to_string()),
            VitalsEvent::MonitoringChanged(true),
            VitalsEvent::PlethSample(0x60),
            VitalsEvent::Spo2(Reading::Valid(97)),
            VitalsEvent::HeartRate(Reading::Valid(72)),
            VitalsEvent::RespirationRate(Reading::Valid(18)),
        ]
    );
    assert_eq!(h.store.len(), 1);

    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mode_switch_hands_over_cleanly() {
    let h = harness();
    let mut rx = h.handle.subscribe();
    h.handle.set_patient("P-7").unwrap();
    h.handle.start().await.unwrap();

    h.handle.set_mode(DeviceMode::Simulated).await.unwrap();
    assert_eq!(h.wire.lock().unwrap().closes, 1);

    // Real-device bytes are ignored once the simulator is active
    h.transport.send(TransportEvent::Data(resp_rate(30))).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let events = drain(&mut rx);
    assert!(!events.contains(&VitalsEvent::RespirationRate(Reading::Valid(30))));
    let monitoring: Vec<&VitalsEvent> = events
        .iter()
        .filter(|e| matches!(e, VitalsEvent::MonitoringChanged(_)))
        .collect();
    assert_eq!(
        monitoring,
        vec![
            &VitalsEvent::MonitoringChanged(true),
            &VitalsEvent::MonitoringChanged(false),
            &VitalsEvent::MonitoringChanged(true),
        ]
    );

    // Simulated vitals never reach the store, and the serial side stays quiet
    assert!(h.store.is_empty());
    assert_eq!(h.wire.lock().unwrap().written.len(), 0);

    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.heart_rate.is_valid());

    h.handle.stop().unwrap();
    h.handle.set_mode(DeviceMode::Real).await.unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.resp_rate, Reading::Invalid);

    h.handle.shutdown().await;
}
