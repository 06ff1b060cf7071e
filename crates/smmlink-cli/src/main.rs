use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use smmlink_core::prelude::*;
use smmlink_core::protocol::list_ports;
use smmlink_core::runtime;

/// Talk to an SMM bedside vital-signs monitor
#[derive(Parser, Debug)]
#[command(name = "smmlink", version, about, long_about = None)]
struct Cli {
    /// Log filter (e.g. "info", "debug", "smmlink_core=trace")
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and stream vitals as JSON lines until Ctrl+C
    Monitor {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Patient id measurements are stored under
        #[arg(short, long)]
        patient: Option<String>,

        /// Use synthetic vitals instead of the serial port
        #[arg(long)]
        simulate: bool,

        /// Candidate port, tried in order; replaces the configured list
        #[arg(long = "port")]
        ports: Vec<String>,

        /// Also print live waveform samples
        #[arg(long)]
        waveforms: bool,
    },

    /// List serial ports
    Ports,

    /// Show stored measurements for a patient, newest first
    History {
        /// Patient id
        #[arg(short, long)]
        patient: String,

        /// Maximum number of rows
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Configuration file naming the measurement log
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Destination path
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Monitor {
            config,
            patient,
            simulate,
            ports,
            waveforms,
        } => monitor(config.as_deref(), patient, simulate, ports, waveforms).await,
        Command::Ports => {
            print_ports();
            Ok(())
        }
        Command::History {
            patient,
            limit,
            config,
        } => history(config.as_deref(), &patient, limit),
        Command::InitConfig { file } => {
            MonitorConfig::default()
                .save(&file)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Wrote {}", file.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

fn build_store(storage: &StorageConfig) -> Result<Box<dyn MeasurementStore + Send>> {
    let log = JsonlStore::open(&storage.path)
        .with_context(|| format!("Failed to open {}", storage.path.display()))?;
    let mut sinks = FanOut::new().with(log);
    if let Some(url) = &storage.forward_url {
        info!(url = url.as_str(), "Forwarding measurements");
        sinks = sinks.with(RemoteForwarder::new(url.as_str(), storage.device_id.as_str()));
    }
    Ok(Box::new(RateLimited::new(sinks, storage.min_spacing())))
}

fn is_waveform(event: &VitalsEvent) -> bool {
    matches!(
        event,
        VitalsEvent::EcgSample(_) | VitalsEvent::RespWaveformSample(_) | VitalsEvent::PlethSample(_)
    )
}

async fn monitor(
    config_path: Option<&Path>,
    patient: Option<String>,
    simulate: bool,
    ports: Vec<String>,
    waveforms: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !ports.is_empty() {
        config.ports = ports;
    }

    let store = build_store(&config.storage)?;
    let (transport, transport_events) = SerialTransport::new();
    let context = PatientContext::default();
    let device = Monitor::new(transport, &config, store, context.clone());
    let facade = DeviceFacade::new(device, VitalsSimulator::new(), context);

    let handle = runtime::spawn(facade, transport_events);
    let mut events = handle.subscribe();

    if let Some(id) = patient {
        handle.set_patient(id)?;
    }
    if simulate {
        handle.set_mode(DeviceMode::Simulated).await?;
    }
    if let Err(e) = handle.start().await {
        handle.shutdown().await;
        return Err(e).context("Monitoring could not start");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if waveforms || !is_waveform(&event) {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => {
                    error!("Monitor task ended unexpectedly");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        let marker = if port.is_monitor_adapter() { "*" } else { " " };
        match port.usb_id {
            Some((vid, pid)) => println!(
                "{marker} {}  [{vid:04x}:{pid:04x}] {}",
                port.name,
                port.description.as_deref().unwrap_or("")
            ),
            None => println!("{marker} {}", port.name),
        }
    }
}

fn history(config_path: Option<&Path>, patient: &str, limit: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let store = JsonlStore::open(&config.storage.path)
        .with_context(|| format!("Failed to open {}", config.storage.path.display()))?;
    let rows = store.recent(patient, limit)?;
    if rows.is_empty() {
        println!("No measurements for {patient}");
        return Ok(());
    }

    println!("{:<20} {:>8} {:>8} {:>8}", "time", "HR", "SpO2", "RR");
    for m in rows {
        println!(
            "{:<20} {:>8} {:>8} {:>8}",
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            m.heart_rate,
            m.spo2,
            m.resp_rate
        );
    }
    Ok(())
}
