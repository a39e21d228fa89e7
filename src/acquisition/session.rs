//! Sampling loop and session handle

use super::derive::RateTracker;
use crate::error::ErrorClass;
use crate::events::{EventBus, Severity, StatusKind};
use crate::serial::{decode_reading, SensorLink};
use crate::sinks::{CsvSink, ExternalSessionSink, SampleSink, SampleWindow, SinkError};
use crate::types::{DeviceIdentifier, Sample, SessionState, SessionStats};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Everything a session owns exclusively; moved into the loop thread and
/// handed back when it exits
pub(crate) struct SessionResources {
    pub link: Box<dyn SensorLink>,
    pub csv: CsvSink,
    pub window: SampleWindow,
    pub external: Option<ExternalSessionSink>,
}

impl SessionResources {
    fn sinks_mut(&mut self) -> Vec<&mut dyn SampleSink> {
        let mut sinks: Vec<&mut dyn SampleSink> = vec![&mut self.csv, &mut self.window];
        if let Some(external) = self.external.as_mut() {
            sinks.push(external);
        }
        sinks
    }

    /// Hand a sample to every sink.
    ///
    /// A mandatory sink failure is returned; an optional sink that fails is
    /// dropped for the rest of the session.
    fn publish(&mut self, sample: &Sample, events: &EventBus) -> Result<(), SinkError> {
        let mut lost_optional = false;

        for sink in self.sinks_mut() {
            if let Err(e) = sink.write(sample) {
                if sink.is_mandatory() {
                    return Err(e);
                }
                tracing::warn!("Dropping {} sink: {}", sink.name(), e);
                events.status(
                    StatusKind::ExternalUnavailable,
                    Severity::Warning,
                    format!("{}: {}", sink.name(), e),
                );
                lost_optional = true;
            }
        }

        if lost_optional {
            self.external = None;
        }
        Ok(())
    }
}

/// Counters and state readable while the loop runs
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    samples: AtomicU64,
    discarded: AtomicU64,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

/// The sampling loop of one session
struct SamplingLoop {
    resources: SessionResources,
    tracker: RateTracker,
    events: EventBus,
    shared: Arc<SessionShared>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SamplingLoop {
    fn run(mut self) -> SessionResources {
        tracing::debug!("Sampling loop started on {}", self.resources.link.name());

        while !self.stop.load(Ordering::Acquire) {
            match self.resources.link.poll_line() {
                Ok(Some(line)) => match decode_reading(&line) {
                    Ok(Some(temperature)) => {
                        let sample = self.tracker.sample(temperature, Instant::now());
                        if let Err(e) = self.resources.publish(&sample, &self.events) {
                            self.fail(e.class(), e.to_string());
                            break;
                        }
                        self.shared.samples.fetch_add(1, Ordering::Relaxed);
                        self.events.sample(sample);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::trace!("Discarding line: {}", e);
                        self.shared.discarded.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    self.fail(e.class(), e.to_string());
                    break;
                }
            }
        }

        tracing::debug!("Sampling loop exited");
        self.resources
    }

    fn fail(&self, class: ErrorClass, detail: String) {
        tracing::error!("Session terminated: {}", detail);
        self.shared.set_state(SessionState::StoppedOnError);
        self.events.error(class, detail);
    }
}

/// Handle to a running (or finished) session
pub struct SessionHandle {
    device: DeviceIdentifier,
    csv_path: PathBuf,
    events: EventBus,
    stop: Arc<AtomicBool>,
    shared: Arc<SessionShared>,
    thread: Option<JoinHandle<SessionResources>>,
    final_stats: Option<SessionStats>,
}

impl SessionHandle {
    /// Spawn the sampling loop over `resources`
    pub(crate) fn spawn(
        device: DeviceIdentifier,
        resources: SessionResources,
        events: EventBus,
        start: Instant,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let csv_path = resources.csv.path().to_path_buf();
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(SessionShared::default());

        let sampling = SamplingLoop {
            resources,
            tracker: RateTracker::new(start),
            events: events.clone(),
            shared: Arc::clone(&shared),
            stop: Arc::clone(&stop),
            poll_interval,
        };
        let thread = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || sampling.run())?;

        Ok(Self {
            device,
            csv_path,
            events,
            stop,
            shared,
            thread: Some(thread),
            final_stats: None,
        })
    }

    pub fn device(&self) -> &DeviceIdentifier {
        &self.device
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether `stop` has released the session's resources
    pub fn is_released(&self) -> bool {
        self.final_stats.is_some()
    }

    /// Live counters (external counts are only known after `stop`)
    pub fn stats(&self) -> SessionStats {
        self.final_stats.unwrap_or_else(|| SessionStats {
            samples: self.shared.samples.load(Ordering::Relaxed),
            discarded_lines: self.shared.discarded.load(Ordering::Relaxed),
            ..Default::default()
        })
    }

    /// Stop the loop and release every resource.
    ///
    /// Waits for the current iteration to finish. Calling it again returns the
    /// same statistics without releasing anything twice.
    pub fn stop(&mut self) -> SessionStats {
        if let Some(stats) = self.final_stats {
            return stats;
        }

        if self.shared.state() == SessionState::Running {
            self.shared.set_state(SessionState::Stopping);
        }
        self.stop.store(true, Ordering::Release);

        let resources = match self.thread.take().map(JoinHandle::join) {
            Some(Ok(resources)) => Some(resources),
            Some(Err(_)) => {
                tracing::error!("Sampling loop panicked");
                self.shared.set_state(SessionState::StoppedOnError);
                self.events
                    .error(ErrorClass::FatalSession, "sampling loop panicked");
                None
            }
            None => None,
        };

        let mut stats = self.stats();
        if let Some(resources) = resources {
            self.release(resources, &mut stats);
        }

        if self.shared.state() != SessionState::StoppedOnError {
            self.shared.set_state(SessionState::Stopped);
        }

        tracing::info!("Session on {} stopped: {}", self.device.port_name, stats);
        self.events
            .status(StatusKind::Stopped, Severity::Info, stats.to_string());
        self.final_stats = Some(stats);
        stats
    }

    fn release(&self, mut resources: SessionResources, stats: &mut SessionStats) {
        if let Err(e) = resources.csv.close() {
            tracing::error!("Closing CSV failed: {}", e);
            self.events.error(e.class(), e.to_string());
        }

        if let Some(mut external) = resources.external.take() {
            match external.close() {
                Ok(()) => {
                    if let Some(ext) = external.final_stats() {
                        stats.external_written = ext.written;
                        stats.external_failed = ext.failed;
                    }
                }
                Err(e) => {
                    tracing::warn!("Closing external session failed: {}", e);
                    self.events
                        .status(StatusKind::ExternalUnavailable, Severity::Warning, e.to_string());
                }
            }
        }

        drop(resources.link);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.is_released() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("device", &self.device)
            .field("csv_path", &self.csv_path)
            .field("state", &self.state())
            .finish()
    }
}
