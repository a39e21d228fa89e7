//! # tempmon: Serial Temperature Logger
//!
//! Samples a temperature sensor over a serial link, derives the rate of
//! change, and fans every sample out to a CSV file, a bounded in-memory
//! window for live plots, and optionally a sheet of a running spreadsheet
//! application driven through its automation interface.
//!
//! ## Architecture
//!
//! - **Serial**: resolves the sensor's port and reads newline-terminated readings
//! - **Acquisition**: one session at a time, sampling on its own thread
//! - **Sinks**: CSV (mandatory), sample window, external sheet (best effort)
//! - **External**: single-affinity worker probing ordered write strategies
//! - **Communication**: crossbeam channels from the core to the presentation loop
//!
//! ## Configuration
//!
//! Settings are stored in the platform-appropriate data directory under
//! `dev.tempmon.tempmon`:
//!
//! - **Linux**: `~/.local/share/dev.tempmon.tempmon/`
//! - **macOS**: `~/Library/Application Support/dev.tempmon.tempmon/`
//! - **Windows**: `%APPDATA%\dev.tempmon.tempmon\`
//!
//! ## Example
//!
//! ```ignore
//! use tempmon::{
//!     acquisition::Acquisition,
//!     config::AppConfig,
//!     events::event_bus,
//!     serial::{PortResolver, SerialOpener, SystemPorts},
//!     sinks::SampleWindow,
//! };
//!
//! let config = AppConfig::load_or_default();
//! let (bus, rx) = event_bus();
//! let device = PortResolver::new(&config.serial.known_chip_ids)
//!     .resolve(&SystemPorts)
//!     .ok();
//!
//! let mut acquisition = Acquisition::new(
//!     Box::new(SerialOpener::default()),
//!     config.acquisition_settings(),
//!     SampleWindow::new(config.window_capacity),
//!     bus,
//! );
//! acquisition.start(device, &config.sink_config(false))?;
//!
//! for event in rx.drain() {
//!     println!("{:?}", event);
//! }
//! acquisition.stop();
//! ```

pub mod acquisition;
pub mod config;
pub mod error;
pub mod events;
pub mod external;
pub mod logging;
pub mod serial;
pub mod sinks;
pub mod types;

// Re-export commonly used types
pub use acquisition::{Acquisition, AcquisitionSettings, SessionHandle, SinkConfig, StartError};
pub use config::AppConfig;
pub use error::{ErrorClass, Result, TempMonError};
pub use events::{event_bus, CoreEvent, EventBus, EventReceiver, Severity, StatusKind};
pub use types::{DeviceIdentifier, Sample, SessionState, SessionStats};
