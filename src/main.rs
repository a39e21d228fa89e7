//! Temperature Monitor - Main Entry Point
//!
//! Headless console front end: resolves the sensor, runs one acquisition
//! session and prints every core event until Enter is pressed.

use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tempmon::{
    acquisition::Acquisition,
    config::{ensure_output_folder, AppConfig},
    error::ErrorClass,
    events::{event_bus, CoreEvent, EventReceiver, Severity, StatusKind},
    external::{host_factory, ExternalSinkWorker},
    serial::{PortEnumerator, PortResolver, SerialOpener, SystemPorts},
    sinks::SampleWindow,
    types::DeviceIdentifier,
};

/// Presentation loop tick
const TICK: Duration = Duration::from_millis(100);

/// Serial temperature logger
#[derive(Parser, Debug)]
#[command(name = "tempmon")]
#[command(about = "Log a serial temperature sensor to CSV and, optionally, a spreadsheet")]
#[command(version)]
struct Cli {
    /// Mirror samples into the spreadsheet application
    #[arg(long)]
    external: bool,

    /// Use this serial port instead of resolving one
    #[arg(long, value_name = "NAME")]
    port: Option<String>,

    /// Load configuration from PATH
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    // Keep the guard alive so buffered log lines reach the file
    let _log_guard = tempmon::logging::init(&config.logging);
    tracing::info!("Starting Temperature Monitor");

    if cli.config.is_none() {
        match config.save_default() {
            Ok(true) => tracing::info!("Wrote default config to {:?}", AppConfig::config_path()),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not write default config: {}", e),
        }
    }

    if cli.list_ports {
        return list_ports();
    }

    let output_folder = config.output_folder();
    ensure_output_folder(&output_folder)?;

    let (bus, rx) = event_bus();

    // One worker for the whole process; sessions borrow it through clients
    let worker = ExternalSinkWorker::spawn(
        host_factory(config.external_sink.backend, None),
        config.adapter_options(),
        bus.clone(),
        config.external_sink.reply_timeout(),
    )?;

    let opener = SerialOpener {
        read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
        max_line_bytes: config.serial.max_line_bytes,
    };
    let mut acquisition = Acquisition::new(
        Box::new(opener),
        config.acquisition_settings(),
        SampleWindow::new(config.window_capacity),
        bus,
    )
    .with_external_sink(worker.client());

    let device = match cli.port.as_deref() {
        Some(name) => Some(DeviceIdentifier::new(name, "")),
        None => {
            let resolver = PortResolver::new(&config.serial.known_chip_ids);
            match resolver.resolve(&SystemPorts) {
                Ok(device) => Some(device),
                Err(e) => {
                    tracing::warn!("{}", e);
                    None
                }
            }
        }
    };

    let sinks = config.sink_config(cli.external || config.external_sink.enabled);
    let started = acquisition.start(device, &sinks).map(|_| ());

    let stop_requested = spawn_stdin_watcher();
    if started.is_ok() {
        println!("Recording. Press Enter to stop.");
    }

    loop {
        render(&rx, cli.json);

        let finished = acquisition
            .session()
            .map_or(true, |session| !session.state().is_active());
        if finished || stop_requested.recv_timeout(TICK).is_ok() {
            break;
        }
    }

    acquisition.stop();
    drop(acquisition);
    worker.shutdown();
    render(&rx, cli.json);

    if let Err(e) = started {
        bail!(e);
    }
    Ok(())
}

/// Fires once when a line is entered or stdin closes
fn spawn_stdin_watcher() -> Receiver<()> {
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        // Enter and EOF both mean stop
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = tx.send(());
    });
    rx
}

fn list_ports() -> anyhow::Result<()> {
    let ports = SystemPorts.list()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<16} {}", port.port_name, port.description);
    }
    Ok(())
}

fn render(rx: &EventReceiver, json: bool) {
    for event in rx.drain() {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        } else {
            println!("{}", describe(&event));
        }
    }
}

/// Compose the console line for one event
fn describe(event: &CoreEvent) -> String {
    match event {
        CoreEvent::SampleProduced(s) => format!(
            "{:>10.3} s  {:>8.2} °C  {:>+8.3} °C/s",
            s.elapsed_secs(),
            s.temperature,
            s.rate_of_change
        ),
        CoreEvent::StatusChanged {
            kind,
            severity,
            detail,
        } => {
            let text = match kind {
                StatusKind::Connected => format!("Connected: {}", detail),
                StatusKind::Stopped => format!("Stopped ({})", detail),
                StatusKind::ExternalAttached => format!("Attached to running spreadsheet ({})", detail),
                StatusKind::ExternalLaunched => format!("Launched spreadsheet ({})", detail),
                StatusKind::ExternalResourceCreated => format!("Created worksheet {}", detail),
                StatusKind::ExternalUnavailable => {
                    format!("Spreadsheet export disabled: {}", detail)
                }
                StatusKind::ExternalWriteFailed => format!("Spreadsheet write failed: {}", detail),
                StatusKind::ExternalRowSkipped => format!("Spreadsheet row skipped: {}", detail),
                StatusKind::ExternalDisconnected => format!("Spreadsheet released ({})", detail),
            };
            format!("[{}] {}", severity_tag(*severity), text)
        }
        CoreEvent::ErrorRaised { class, detail } => match class {
            ErrorClass::Configuration => format!("[error] {}. Check the device and settings.", detail),
            ErrorClass::FatalSession => format!("[error] Session ended: {}", detail),
            _ => format!("[warn] {}", detail),
        },
    }
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Warning => "warn",
        Severity::Error => "error",
    }
}
