//! Sample sinks
//!
//! Every sample produced by a session is handed to each active sink in turn:
//!
//! - [`CsvSink`] - mandatory durable record; a failure ends the session
//! - [`SampleWindow`] - bounded in-memory window for live plots
//! - [`ExternalSessionSink`] - best-effort mirror into the spreadsheet worker

pub mod csv;
pub mod external;
pub mod window;

pub use self::csv::{format_record, session_file_stem, CsvSink};
pub use external::ExternalSessionSink;
pub use window::SampleWindow;

use crate::error::ErrorClass;
use crate::types::Sample;
use std::path::PathBuf;
use thiserror::Error;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Write after close
    #[error("Sink '{0}' is closed")]
    Closed(String),

    #[error("External sink: {0}")]
    External(#[from] crate::external::ExternalSinkError),
}

impl SinkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SinkError::External(_) => ErrorClass::OptionalIntegration,
            _ => ErrorClass::FatalSession,
        }
    }
}

/// A destination for samples
pub trait SampleSink: Send {
    /// Short name for logs and events
    fn name(&self) -> &str;

    /// Whether a failure of this sink must end the session
    fn is_mandatory(&self) -> bool;

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError>;

    /// Flush and release; calling it again is a no-op
    fn close(&mut self) -> Result<(), SinkError>;
}
