//! Session-side bridge to the external sink worker

use super::{SampleSink, SinkError};
use crate::external::{ExternalSinkClient, ExternalWriteStats, SessionOpened};
use crate::types::Sample;

/// Forwards samples to the external sink worker for one session
///
/// Writes are queued without waiting. Closing waits until the worker has
/// served every queued write and released its handles.
#[derive(Debug)]
pub struct ExternalSessionSink {
    client: ExternalSinkClient,
    opened: SessionOpened,
    final_stats: Option<ExternalWriteStats>,
}

impl ExternalSessionSink {
    /// Open the external session named `name`
    pub fn open(client: ExternalSinkClient, name: &str) -> Result<Self, SinkError> {
        let opened = client.open_session(name)?;
        Ok(Self {
            client,
            opened,
            final_stats: None,
        })
    }

    pub fn opened(&self) -> &SessionOpened {
        &self.opened
    }

    /// Counters reported by the worker on close
    pub fn final_stats(&self) -> Option<ExternalWriteStats> {
        self.final_stats
    }
}

impl SampleSink for ExternalSessionSink {
    fn name(&self) -> &str {
        "external"
    }

    fn is_mandatory(&self) -> bool {
        false
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        if self.final_stats.is_some() {
            return Err(SinkError::Closed("external".to_string()));
        }
        self.client.write(*sample)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.final_stats.is_some() {
            return Ok(());
        }
        let stats = self.client.close_session()?;
        self.final_stats = Some(stats);
        Ok(())
    }
}

impl Drop for ExternalSessionSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close external session: {}", e);
        }
    }
}
