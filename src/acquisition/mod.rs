//! Acquisition loop
//!
//! Owns the lifecycle of one acquisition session at a time. `start` opens the
//! serial link, waits for the remote board to settle, opens the sinks and
//! spawns the sampling loop; `stop` ends it and releases everything the
//! session held.
//!
//! # Components
//!
//! - [`derive`] - elapsed time and rate-of-change computation
//! - [`session`] - the sampling loop thread and its [`SessionHandle`]
//!
//! # Example
//!
//! ```ignore
//! use tempmon::acquisition::{Acquisition, AcquisitionSettings, SinkConfig};
//! use tempmon::events::event_bus;
//! use tempmon::serial::SerialOpener;
//! use tempmon::sinks::SampleWindow;
//!
//! let (bus, rx) = event_bus();
//! let mut acquisition = Acquisition::new(
//!     Box::new(SerialOpener::default()),
//!     AcquisitionSettings::default(),
//!     SampleWindow::default(),
//!     bus,
//! );
//! acquisition.start(Some(device), &SinkConfig::new("/tmp/measurements"))?;
//! // ... drain `rx` ...
//! let stats = acquisition.stop();
//! ```

pub mod derive;
pub mod session;

pub use derive::RateTracker;
pub use session::SessionHandle;

use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SETTLE_DELAY_MS};
use crate::error::ErrorClass;
use crate::events::{EventBus, Severity, StatusKind};
use crate::external::{resource_name, ExternalSinkClient};
use crate::serial::{LinkError, LinkOpener};
use crate::sinks::{CsvSink, ExternalSessionSink, SampleWindow, SinkError};
use crate::types::{DeviceIdentifier, SessionStats};
use chrono::Local;
use session::SessionResources;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Link and loop timing for every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSettings {
    pub baud_rate: u32,
    /// Wait after opening the port before the first read
    pub settle_delay: Duration,
    /// Sleep when no complete line is available
    pub poll_interval: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Sink parameters supplied at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Folder receiving the session's CSV file
    pub output_folder: PathBuf,
    /// Mirror samples into the external spreadsheet application
    pub use_external_sink: bool,
}

impl SinkConfig {
    pub fn new(output_folder: impl Into<PathBuf>) -> Self {
        Self {
            output_folder: output_folder.into(),
            use_external_sink: false,
        }
    }

    pub fn with_external_sink(mut self, enabled: bool) -> Self {
        self.use_external_sink = enabled;
        self
    }
}

/// Reasons a session could not start
#[derive(Error, Debug)]
pub enum StartError {
    /// No device was resolved
    #[error("No sensor device: {0}")]
    Configuration(String),

    #[error("A session is already running")]
    SessionActive,

    #[error("Serial port unavailable: {0}")]
    PortUnavailable(#[source] LinkError),

    /// The mandatory CSV sink could not be created
    #[error("Sink initialization failed: {0}")]
    SinkInitFailed(#[source] SinkError),

    #[error("Failed to spawn sampling thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl StartError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StartError::Configuration(_) | StartError::SessionActive => ErrorClass::Configuration,
            StartError::PortUnavailable(_) | StartError::SinkInitFailed(_) | StartError::Spawn(_) => {
                ErrorClass::FatalSession
            }
        }
    }
}

/// Starts and stops acquisition sessions, at most one at a time
pub struct Acquisition {
    opener: Box<dyn LinkOpener>,
    external: Option<ExternalSinkClient>,
    settings: AcquisitionSettings,
    window: SampleWindow,
    events: EventBus,
    session: Option<SessionHandle>,
}

impl Acquisition {
    pub fn new(
        opener: Box<dyn LinkOpener>,
        settings: AcquisitionSettings,
        window: SampleWindow,
        events: EventBus,
    ) -> Self {
        Self {
            opener,
            external: None,
            settings,
            window,
            events,
            session: None,
        }
    }

    /// Attach the client of the process-wide external sink worker
    pub fn with_external_sink(mut self, client: ExternalSinkClient) -> Self {
        self.external = Some(client);
        self
    }

    /// Shared view of the live sample window
    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// The current (or last) session
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Whether a session exists that `stop` has not released yet
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_released())
    }

    /// Start a session on `device`.
    ///
    /// A `None` device is reported as a configuration error without touching
    /// any sink. The external sink is optional: failing to open it only emits
    /// a warning.
    pub fn start(
        &mut self,
        device: Option<DeviceIdentifier>,
        sinks: &SinkConfig,
    ) -> Result<&SessionHandle, StartError> {
        if self.is_running() {
            return Err(StartError::SessionActive);
        }

        let Some(device) = device else {
            let err = StartError::Configuration("no matching serial device found".to_string());
            tracing::warn!("{}", err);
            self.events.error(err.class(), err.to_string());
            return Err(err);
        };

        let link = self
            .opener
            .open(&device, self.settings.baud_rate)
            .map_err(|e| self.report(StartError::PortUnavailable(e)))?;

        if !self.settings.settle_delay.is_zero() {
            tracing::debug!("Waiting {:?} for {} to settle", self.settings.settle_delay, device);
            std::thread::sleep(self.settings.settle_delay);
        }

        let started = Local::now();
        let csv = CsvSink::create(&sinks.output_folder, &started)
            .map_err(|e| self.report(StartError::SinkInitFailed(e)))?;

        let external = if sinks.use_external_sink {
            self.open_external(&resource_name(&started))
        } else {
            None
        };

        self.window.clear();
        self.events.status(
            StatusKind::Connected,
            Severity::Success,
            format!("{} -> {}", device.port_name, csv.file_name()),
        );
        tracing::info!("Session started on {} writing {}", device, csv.path().display());

        let resources = SessionResources {
            link,
            csv,
            window: self.window.clone(),
            external,
        };
        let handle = SessionHandle::spawn(
            device,
            resources,
            self.events.clone(),
            Instant::now(),
            self.settings.poll_interval,
        )
        .map_err(|e| self.report(StartError::Spawn(e)))?;

        Ok(self.session.insert(handle))
    }

    /// Stop the current session. Without one, or when it is already stopped,
    /// nothing is released again.
    pub fn stop(&mut self) -> Option<SessionStats> {
        self.session.as_mut().map(SessionHandle::stop)
    }

    fn open_external(&self, name: &str) -> Option<ExternalSessionSink> {
        let Some(client) = self.external.clone() else {
            tracing::warn!("External sink requested but no worker is running");
            self.events.status(
                StatusKind::ExternalUnavailable,
                Severity::Warning,
                "external sink worker not running",
            );
            return None;
        };

        match ExternalSessionSink::open(client, name) {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::warn!("External sink unavailable: {}", e);
                self.events
                    .status(StatusKind::ExternalUnavailable, Severity::Warning, e.to_string());
                None
            }
        }
    }

    fn report(&self, err: StartError) -> StartError {
        tracing::error!("Failed to start session: {}", err);
        self.events.error(err.class(), err.to_string());
        err
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_bus, CoreEvent};
    use crate::serial::link::MockLinkOpener;
    use crate::serial::{RawLine, SensorLink};
    use crate::types::SessionState;
    use std::collections::VecDeque;

    struct QueuedLink {
        lines: VecDeque<&'static str>,
        fail_when_empty: bool,
    }

    impl SensorLink for QueuedLink {
        fn poll_line(&mut self) -> Result<Option<RawLine>, LinkError> {
            match self.lines.pop_front() {
                Some(line) => Ok(Some(RawLine::new(line))),
                None if self.fail_when_empty => {
                    Err(LinkError::Disconnected("device removed".to_string()))
                }
                None => Ok(None),
            }
        }

        fn name(&self) -> &str {
            "queued"
        }
    }

    fn fast_settings() -> AcquisitionSettings {
        AcquisitionSettings {
            baud_rate: 9600,
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(2),
        }
    }

    fn opener_with(lines: Vec<&'static str>, fail_when_empty: bool) -> MockLinkOpener {
        let mut opener = MockLinkOpener::new();
        let mut lines = Some(lines);
        opener.expect_open().times(1).returning(move |_, _| {
            Ok(Box::new(QueuedLink {
                lines: lines.take().unwrap_or_default().into(),
                fail_when_empty,
            }) as Box<dyn SensorLink>)
        });
        opener
    }

    fn wait_for<F: Fn() -> bool>(check: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_without_device_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut opener = MockLinkOpener::new();
        opener.expect_open().times(0);

        let (bus, rx) = event_bus();
        let mut acq = Acquisition::new(Box::new(opener), fast_settings(), SampleWindow::default(), bus);

        let err = acq.start(None, &SinkConfig::new(dir.path())).unwrap_err();
        assert!(matches!(err, StartError::Configuration(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(
            rx.try_recv(),
            Some(CoreEvent::ErrorRaised { class: ErrorClass::Configuration, .. })
        ));
    }

    #[test]
    fn test_port_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut opener = MockLinkOpener::new();
        opener
            .expect_open()
            .returning(|_, _| Err(LinkError::Disconnected("busy".to_string())));

        let (bus, _rx) = event_bus();
        let mut acq = Acquisition::new(Box::new(opener), fast_settings(), SampleWindow::default(), bus);

        let err = acq
            .start(Some(DeviceIdentifier::new("COM9", "")), &SinkConfig::new(dir.path()))
            .unwrap_err();
        assert!(matches!(err, StartError::PortUnavailable(_)));
        assert!(!acq.is_running());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sink_init_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let (bus, _rx) = event_bus();
        let mut acq = Acquisition::new(
            Box::new(opener_with(vec![], false)),
            fast_settings(),
            SampleWindow::default(),
            bus,
        );

        let err = acq
            .start(Some(DeviceIdentifier::new("COM3", "")), &SinkConfig::new(missing))
            .unwrap_err();
        assert!(matches!(err, StartError::SinkInitFailed(_)));
    }

    #[test]
    fn test_session_samples_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, rx) = event_bus();
        let window = SampleWindow::default();
        let mut acq = Acquisition::new(
            Box::new(opener_with(vec!["21.5", "oops", "", "21.6"], false)),
            fast_settings(),
            window.clone(),
            bus,
        );

        acq.start(Some(DeviceIdentifier::new("COM3", "")), &SinkConfig::new(dir.path()))
            .unwrap();
        wait_for(|| window.len() == 2);
        let stats = acq.stop().unwrap();

        assert_eq!(stats.samples, 2);
        assert_eq!(stats.discarded_lines, 1);

        let events = rx.drain();
        assert_eq!(events[0].status_kind(), Some(StatusKind::Connected));
        let samples: Vec<_> = events.iter().filter_map(CoreEvent::as_sample).collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].rate_of_change, 0.0);
        assert_eq!(events.last().and_then(CoreEvent::status_kind), Some(StatusKind::Stopped));
    }

    #[test]
    fn test_second_start_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _rx) = event_bus();
        let mut acq = Acquisition::new(
            Box::new(opener_with(vec![], false)),
            fast_settings(),
            SampleWindow::default(),
            bus,
        );

        let device = DeviceIdentifier::new("COM3", "");
        acq.start(Some(device.clone()), &SinkConfig::new(dir.path())).unwrap();
        assert!(matches!(
            acq.start(Some(device), &SinkConfig::new(dir.path())),
            Err(StartError::SessionActive)
        ));
        acq.stop();
    }

    #[test]
    fn test_disconnect_stops_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, rx) = event_bus();
        let mut acq = Acquisition::new(
            Box::new(opener_with(vec!["20.0"], true)),
            fast_settings(),
            SampleWindow::default(),
            bus,
        );

        acq.start(Some(DeviceIdentifier::new("COM3", "")), &SinkConfig::new(dir.path()))
            .unwrap();
        wait_for(|| acq.session().map(SessionHandle::state) == Some(SessionState::StoppedOnError));

        let stats = acq.stop().unwrap();
        assert_eq!(stats.samples, 1);
        assert_eq!(acq.session().unwrap().state(), SessionState::StoppedOnError);
        assert!(rx
            .drain()
            .iter()
            .any(|e| matches!(e, CoreEvent::ErrorRaised { class: ErrorClass::FatalSession, .. })));
    }

    #[test]
    fn test_external_requested_without_worker_warns() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, rx) = event_bus();
        let mut acq = Acquisition::new(
            Box::new(opener_with(vec![], false)),
            fast_settings(),
            SampleWindow::default(),
            bus,
        );

        acq.start(
            Some(DeviceIdentifier::new("COM3", "")),
            &SinkConfig::new(dir.path()).with_external_sink(true),
        )
        .unwrap();
        acq.stop();

        let kinds: Vec<_> = rx.drain().iter().filter_map(CoreEvent::status_kind).collect();
        assert_eq!(
            kinds,
            vec![StatusKind::ExternalUnavailable, StatusKind::Connected, StatusKind::Stopped]
        );
    }
}
