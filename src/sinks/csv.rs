//! Durable per-session CSV record
//!
//! One file per session, no header, one `elapsed_ms,temperature,rate_of_change`
//! line per sample. Every line is flushed and synced before `write` returns so
//! a crash mid-session loses at most the sample being written.

use super::{SampleSink, SinkError};
use crate::types::Sample;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Give up looking for a free file name after this many suffixes
const MAX_NAME_SUFFIX: u32 = 1000;

/// File stem for a session started at `started`
pub fn session_file_stem(started: &DateTime<Local>) -> String {
    format!("measurement_{}", started.format("%Y%m%d_%H%M%S"))
}

/// CSV writer owned by one session
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

impl CsvSink {
    /// Create the session file inside `folder`.
    ///
    /// The file is created exclusively; if `measurement_<stamp>.csv` already
    /// exists a `_1`, `_2`, ... suffix is appended.
    pub fn create(folder: &Path, started: &DateTime<Local>) -> Result<Self, SinkError> {
        let stem = session_file_stem(started);

        for suffix in 0..MAX_NAME_SUFFIX {
            let name = if suffix == 0 {
                format!("{}.csv", stem)
            } else {
                format!("{}_{}.csv", stem, suffix)
            };
            let path = folder.join(name);

            match Self::open(&path) {
                Ok(sink) => return Ok(sink),
                Err(SinkError::Create { source, .. }) if source.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!("{} exists, trying next name", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        Err(SinkError::Create {
            path: folder.join(format!("{}.csv", stem)),
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
        })
    }

    /// Create `path`, failing if it already exists
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| SinkError::Create {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::info!("Recording samples to {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory, for status messages
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn write_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Format one record; `{:?}` keeps a trailing `.0` on whole numbers and
/// round-trips every finite value
pub fn format_record(sample: &Sample) -> String {
    format!(
        "{},{:?},{:?}",
        sample.elapsed_ms, sample.temperature, sample.rate_of_change
    )
}

impl SampleSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn is_mandatory(&self) -> bool {
        true
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let line = format_record(sample);
        let result = match self.writer.as_mut() {
            Some(writer) => writeln!(writer, "{}", line)
                .and_then(|_| writer.flush())
                .and_then(|_| writer.get_ref().sync_data()),
            None => return Err(SinkError::Closed("csv".to_string())),
        };
        result.map_err(|e| self.write_err(e))?;

        self.rows_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer
            .flush()
            .and_then(|_| writer.get_ref().sync_all())
            .map_err(|e| self.write_err(e))?;

        tracing::info!(
            "Closed {} ({} record(s))",
            self.path.display(),
            self.rows_written
        );
        Ok(())
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close CSV sink: {}", e);
        }
    }
}
