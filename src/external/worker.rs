//! Single-affinity worker for the external sink
//!
//! The automation surface must only ever be called from one execution
//! context. This worker is that context: it is spawned once per process, builds
//! the [`AutomationHost`] on its own thread through a factory, and is the only
//! code that holds application or sheet handles. Everybody else talks to it
//! through an [`ExternalSinkClient`], whose requests are queued on a crossbeam
//! channel and served strictly in arrival order.
//!
//! Writes are fire-and-forget so the sampling loop never waits on the foreign
//! application. Opening and closing a session wait for an answer, bounded by
//! the reply timeout.

use super::adapter::{AdapterOptions, ExternalSinkAdapter, WriteResult};
use super::connect::{AppHandle, ConnectError, ConnectMethod};
use super::dispatch::AutomationHost;
use super::resource::{CreateError, ExternalResource};
use crate::error::{ErrorClass, Result, ResultExt};
use crate::events::{EventBus, Severity, StatusKind};
use crate::types::Sample;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Builds the host on the worker thread
pub type HostFactory = Box<dyn FnOnce() -> Box<dyn AutomationHost> + Send>;

/// External sink errors seen by callers of the client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalSinkError {
    /// The worker thread is no longer running
    #[error("external sink worker is not running")]
    WorkerGone,

    #[error("external sink did not answer within {0:?}")]
    Timeout(Duration),

    #[error("could not connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("could not create worksheet: {0}")]
    Create(#[from] CreateError),
}

impl ExternalSinkError {
    /// Never fatal to acquisition
    pub fn class(&self) -> ErrorClass {
        ErrorClass::OptionalIntegration
    }
}

/// What an opened session resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOpened {
    pub resource_name: String,
    pub sheet_path: String,
    pub prog_id: String,
    pub method: ConnectMethod,
    pub created_by: &'static str,
}

/// Write counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExternalWriteStats {
    pub written: u64,
    pub failed: u64,
    /// Failed rows the cursor moved past (`SkipFailedRow` only)
    pub skipped: u64,
}

enum Request {
    OpenSession {
        name: String,
        reply: Sender<std::result::Result<SessionOpened, ExternalSinkError>>,
    },
    Write(Sample),
    CloseSession {
        reply: Sender<ExternalWriteStats>,
    },
    Shutdown,
}

/// Handle for queueing work on the external sink worker
#[derive(Debug, Clone)]
pub struct ExternalSinkClient {
    tx: Sender<Request>,
    reply_timeout: Duration,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::OpenSession { name, .. } => write!(f, "OpenSession({})", name),
            Request::Write(sample) => write!(f, "Write({:?})", sample),
            Request::CloseSession { .. } => write!(f, "CloseSession"),
            Request::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl ExternalSinkClient {
    fn wait<T>(&self, rx: Receiver<T>) -> std::result::Result<T, ExternalSinkError> {
        match rx.recv_timeout(self.reply_timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(ExternalSinkError::Timeout(self.reply_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ExternalSinkError::WorkerGone),
        }
    }

    /// Connect to the application and create the sheet for session `name`.
    ///
    /// A session still open from an earlier call is closed first.
    pub fn open_session(&self, name: &str) -> std::result::Result<SessionOpened, ExternalSinkError> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Request::OpenSession {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| ExternalSinkError::WorkerGone)?;
        self.wait(rx)?
    }

    /// Queue one sample; never waits for the write itself
    pub fn write(&self, sample: Sample) -> std::result::Result<(), ExternalSinkError> {
        self.tx
            .send(Request::Write(sample))
            .map_err(|_| ExternalSinkError::WorkerGone)
    }

    /// Release the session's handles once every queued write has been served
    pub fn close_session(&self) -> std::result::Result<ExternalWriteStats, ExternalSinkError> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Request::CloseSession { reply })
            .map_err(|_| ExternalSinkError::WorkerGone)?;
        self.wait(rx)
    }
}

/// Owner of the worker thread
pub struct ExternalSinkWorker {
    client: ExternalSinkClient,
    handle: Option<JoinHandle<()>>,
}

impl ExternalSinkWorker {
    /// Spawn the worker. Call once per process.
    pub fn spawn(
        factory: HostFactory,
        options: AdapterOptions,
        events: EventBus,
        reply_timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();

        let handle = thread::Builder::new()
            .name("external-sink".to_string())
            .spawn(move || {
                let adapter = ExternalSinkAdapter::new(factory(), options);
                WorkerLoop::new(adapter, events).run(rx);
            })
            .context("Failed to spawn external sink worker")?;

        Ok(Self {
            client: ExternalSinkClient { tx, reply_timeout },
            handle: Some(handle),
        })
    }

    pub fn client(&self) -> ExternalSinkClient {
        self.client.clone()
    }

    /// Close any open session and join the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.client.tx.send(Request::Shutdown);
        if handle.join().is_err() {
            tracing::error!("External sink worker panicked");
        }
    }
}

impl Drop for ExternalSinkWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ActiveSession {
    app: AppHandle,
    resource: ExternalResource,
    stats: ExternalWriteStats,
}

/// State living on the worker thread
// Fields drop in order: session objects go before the host that made them
struct WorkerLoop {
    session: Option<ActiveSession>,
    adapter: ExternalSinkAdapter,
    events: EventBus,
}

impl WorkerLoop {
    fn new(adapter: ExternalSinkAdapter, events: EventBus) -> Self {
        Self {
            session: None,
            adapter,
            events,
        }
    }

    fn run(mut self, rx: Receiver<Request>) {
        tracing::debug!("External sink worker started");

        while let Ok(request) = rx.recv() {
            match request {
                Request::OpenSession { name, reply } => {
                    let result = self.open(&name);
                    let _ = reply.send(result);
                }
                Request::Write(sample) => self.write(&sample),
                Request::CloseSession { reply } => {
                    let stats = self.close();
                    let _ = reply.send(stats);
                }
                Request::Shutdown => break,
            }
        }

        self.close();
        tracing::debug!("External sink worker stopped");
    }

    fn open(&mut self, name: &str) -> std::result::Result<SessionOpened, ExternalSinkError> {
        if self.session.is_some() {
            tracing::warn!("Opening {} while a session is still open; closing it", name);
            self.close();
        }

        let app = self.adapter.connect()?;
        let kind = match app.method {
            ConnectMethod::Attach => StatusKind::ExternalAttached,
            ConnectMethod::Launch => StatusKind::ExternalLaunched,
        };
        self.events.status(kind, Severity::Success, app.prog_id.clone());

        let resource = match self.adapter.create_resource(&app, name) {
            Ok(resource) => resource,
            Err(e) => {
                self.adapter.disconnect(app, None);
                return Err(e.into());
            }
        };

        let opened = SessionOpened {
            resource_name: resource.name().to_string(),
            sheet_path: resource.sheet_path(),
            prog_id: app.prog_id.clone(),
            method: app.method,
            created_by: resource.created_by(),
        };
        self.events.status(
            StatusKind::ExternalResourceCreated,
            Severity::Success,
            opened.sheet_path.clone(),
        );

        self.session = Some(ActiveSession {
            app,
            resource,
            stats: ExternalWriteStats::default(),
        });
        Ok(opened)
    }

    fn write(&mut self, sample: &Sample) {
        let Some(session) = self.session.as_mut() else {
            tracing::trace!("Dropping sample at {} ms: no external session", sample.elapsed_ms);
            return;
        };

        match self.adapter.write(&session.app, &mut session.resource, sample) {
            WriteResult::Written { .. } => session.stats.written += 1,
            WriteResult::AllStrategiesFailed {
                row,
                skipped,
                failures,
            } => {
                session.stats.failed += 1;
                let detail = format!("row {}: {} strategies failed", row, failures.len());
                if skipped {
                    session.stats.skipped += 1;
                    self.events
                        .status(StatusKind::ExternalRowSkipped, Severity::Warning, detail);
                } else {
                    self.events
                        .status(StatusKind::ExternalWriteFailed, Severity::Warning, detail);
                }
            }
        }
    }

    fn close(&mut self) -> ExternalWriteStats {
        let Some(session) = self.session.take() else {
            return ExternalWriteStats::default();
        };

        let stats = session.stats;
        let detail = session.resource.sheet_path();
        self.adapter.disconnect(session.app, Some(session.resource));
        self.events
            .status(StatusKind::ExternalDisconnected, Severity::Info, detail);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_bus, CoreEvent};
    use crate::external::dispatch::UnavailableHost;
    use crate::external::memory::MemorySurface;

    fn spawn(surface: &MemorySurface, bus: EventBus) -> ExternalSinkWorker {
        let host = surface.host();
        ExternalSinkWorker::spawn(
            Box::new(move || Box::new(host) as Box<dyn AutomationHost>),
            AdapterOptions::default(),
            bus,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_session_roundtrip() {
        let surface = MemorySurface::new();
        let (bus, rx) = event_bus();
        let worker = spawn(&surface, bus);
        let client = worker.client();

        let opened = client.open_session("Measurement_1").unwrap();
        assert_eq!(opened.method, ConnectMethod::Launch);
        assert_eq!(opened.created_by, "worksheets-add");

        client.write(Sample::new(0, 21.5, 0.0)).unwrap();
        client.write(Sample::new(1000, 21.6, 0.1)).unwrap();
        let stats = client.close_session().unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(surface.used_rows("Measurement_1"), vec![1, 2]);

        let kinds: Vec<_> = rx.drain().iter().filter_map(CoreEvent::status_kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatusKind::ExternalLaunched,
                StatusKind::ExternalResourceCreated,
                StatusKind::ExternalDisconnected
            ]
        );
        worker.shutdown();
    }

    #[test]
    fn test_unavailable_platform() {
        let (bus, _rx) = event_bus();
        let worker = ExternalSinkWorker::spawn(
            Box::new(|| Box::new(UnavailableHost) as Box<dyn AutomationHost>),
            AdapterOptions::default(),
            bus,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = worker.client().open_session("M").unwrap_err();
        assert_eq!(err, ExternalSinkError::Connect(ConnectError::Unavailable));
        assert_eq!(err.class(), ErrorClass::OptionalIntegration);
    }

    #[test]
    fn test_failed_write_emits_warning() {
        let surface = MemorySurface::new()
            .raising("Worksheet.Execute")
            .raising("Worksheet.Cols")
            .raising("Worksheet.NewDataRange")
            .raising("Worksheet.SetBinaryStorageData")
            .raising("Worksheet.Range")
            .raising("Worksheet.SetData")
            .raising("Worksheet.Cells")
            .raising("Application.PutWorksheet")
            .raising("Worksheet.PutWorksheet")
            .raising("Worksheet.SetCell")
            .raising("Worksheet.PutCell")
            .raising("Worksheet.Columns");
        let (bus, rx) = event_bus();
        let worker = spawn(&surface, bus);
        let client = worker.client();

        client.open_session("M").unwrap();
        client.write(Sample::new(0, 21.5, 0.0)).unwrap();
        let stats = client.close_session().unwrap();
        assert_eq!(stats, ExternalWriteStats { written: 0, failed: 1, skipped: 0 });

        let events = rx.drain();
        assert!(events
            .iter()
            .any(|e| e.status_kind() == Some(StatusKind::ExternalWriteFailed)));
    }

    #[test]
    fn test_client_after_shutdown_reports_worker_gone() {
        let surface = MemorySurface::new();
        let (bus, _rx) = event_bus();
        let worker = spawn(&surface, bus);
        let client = worker.client();
        worker.shutdown();

        assert_eq!(client.write(Sample::new(0, 1.0, 0.0)), Err(ExternalSinkError::WorkerGone));
        assert_eq!(client.close_session(), Err(ExternalSinkError::WorkerGone));
    }
}
