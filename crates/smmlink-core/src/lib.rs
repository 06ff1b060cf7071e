//! # SMM Link Core Library
//!
//! Core functionality for talking to SMM bedside vital-signs monitors.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - SMM frame assembly and checksum validation over a raw serial byte stream
//! - Packet decoding for ECG, respiration and pulse oximetry payloads
//! - The connect / handshake / poll state machine that drives the monitor
//! - A measurement cache that gates persistence of decoded vitals
//! - A device facade that arbitrates between the real monitor and a simulator
//!
//! ## Example
//!
//! ```rust,ignore
//! use smmlink_core::prelude::*;
//!
//! let config = MonitorConfig::default();
//! let (transport, events) = SerialTransport::new();
//! let jsonl = JsonlStore::open(&config.storage.path)?;
//! let store = RateLimited::new(jsonl, config.storage.min_spacing());
//! let patient = PatientContext::new("P-0001");
//! let monitor = Monitor::new(transport, &config, Box::new(store), patient.clone());
//! let facade = DeviceFacade::new(monitor, VitalsSimulator::new(), patient);
//!
//! let handle = smmlink_core::runtime::spawn(facade, events);
//! let mut vitals = handle.subscribe();
//! handle.start().await?;
//! while let Ok(event) = vitals.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod config;
pub mod device;
pub mod protocol;
pub mod runtime;
pub mod storage;
pub mod timer;
pub mod vitals;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{MonitorConfig, SerialSettings, StorageConfig, TimingConfig};
    pub use crate::device::{
        Device, DeviceFacade, DeviceMode, Monitor, PatientContext, VitalsSimulator,
    };
    pub use crate::protocol::{
        ConnectionSequencer, ConnectionState, Frame, FrameAssembler, Packet, ProtocolError,
        SerialTransport, Transport, TransportErrorKind, TransportEvent,
    };
    pub use crate::storage::{
        FanOut, JsonlStore, Measurement, MeasurementStore, MemoryStore, RateLimited,
        RemoteForwarder, StoreError,
    };
    pub use crate::vitals::{MeasurementCache, Reading, VitalsEvent, VitalsSnapshot};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
