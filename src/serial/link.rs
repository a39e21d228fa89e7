//! Polled line link to the sensor
//!
//! The sensor prints one ASCII floating-point reading per line. The link is
//! polled without blocking: bytes already waiting in the driver are appended
//! to a line buffer and at most one complete line is handed out per poll.

use crate::error::ErrorClass;
use crate::types::DeviceIdentifier;
use serialport::SerialPort;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for a single driver read
const READ_CHUNK: usize = 1024;

/// Serial link errors
#[derive(Error, Debug)]
pub enum LinkError {
    /// The port could not be opened
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// The device went away while the session was running
    #[error("Serial device disconnected: {0}")]
    Disconnected(String),

    /// Any other read failure
    #[error("Serial read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Link failures end the session
    pub fn class(&self) -> ErrorClass {
        ErrorClass::FatalSession
    }
}

/// Why a line was rejected as a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadingError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("line exceeded the maximum length")]
    Overlong,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("'{0}' is not a finite number")]
    NotFinite(String),
}

impl ReadingError {
    /// Malformed lines are dropped and acquisition continues
    pub fn class(&self) -> ErrorClass {
        ErrorClass::TransientIo
    }
}

/// One line taken off the link, terminator removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub bytes: Vec<u8>,
    /// Set when the buffer hit its limit before a terminator arrived
    pub overlong: bool,
}

impl RawLine {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            overlong: false,
        }
    }
}

/// Decode a line into a temperature reading.
///
/// Returns `Ok(None)` for blank lines, which carry no reading and are not
/// counted as malformed.
pub fn decode_reading(line: &RawLine) -> Result<Option<f64>, ReadingError> {
    if line.overlong {
        return Err(ReadingError::Overlong);
    }
    let text = std::str::from_utf8(&line.bytes).map_err(|_| ReadingError::InvalidUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: f64 = text
        .parse()
        .map_err(|_| ReadingError::NotANumber(text.to_string()))?;
    if !value.is_finite() {
        return Err(ReadingError::NotFinite(text.to_string()));
    }
    Ok(Some(value))
}

/// Accumulates raw bytes and splits them into newline-terminated lines.
///
/// A line longer than `max_line_bytes` is reported once as overlong; the rest
/// of it, up to and including its terminator, is dropped.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_line_bytes),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<RawLine> {
        let newline = self.pending.iter().position(|&b| b == b'\n');

        if self.discarding {
            let pos = match newline {
                Some(pos) => pos,
                None => {
                    self.pending.clear();
                    return None;
                }
            };
            self.pending.drain(..=pos);
            self.discarding = false;
            return self.next_line();
        }

        if let Some(pos) = newline {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let overlong = line.len() > self.max_line_bytes;
            return Some(RawLine {
                bytes: line,
                overlong,
            });
        }

        if self.pending.len() > self.max_line_bytes {
            self.discarding = true;
            let bytes = std::mem::take(&mut self.pending);
            return Some(RawLine {
                bytes,
                overlong: true,
            });
        }

        None
    }

    /// Whether the tail of an overlong line is still being dropped
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// A non-blocking source of sensor lines
pub trait SensorLink: Send {
    /// Return the next complete line without waiting for one to arrive
    fn poll_line(&mut self) -> Result<Option<RawLine>, LinkError>;

    /// Port name, for logging
    fn name(&self) -> &str;
}

/// Opens sensor links; abstracted so sessions can run against scripted links
#[cfg_attr(test, mockall::automock)]
pub trait LinkOpener: Send {
    fn open(&self, device: &DeviceIdentifier, baud_rate: u32) -> Result<Box<dyn SensorLink>, LinkError>;
}

/// Sensor link over a real serial port
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    name: String,
    buffer: LineBuffer,
}

impl SerialLink {
    pub fn open(
        device: &DeviceIdentifier,
        baud_rate: u32,
        read_timeout: Duration,
        max_line_bytes: usize,
    ) -> Result<Self, LinkError> {
        let port = serialport::new(&device.port_name, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| LinkError::Open {
                port: device.port_name.clone(),
                source,
            })?;

        tracing::info!("Opened {} at {} baud", device.port_name, baud_rate);

        Ok(Self {
            port,
            name: device.port_name.clone(),
            buffer: LineBuffer::new(max_line_bytes),
        })
    }
}

impl SensorLink for SerialLink {
    fn poll_line(&mut self) -> Result<Option<RawLine>, LinkError> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(Some(line));
        }

        let waiting = self
            .port
            .bytes_to_read()
            .map_err(|e| LinkError::Disconnected(e.to_string()))? as usize;
        if waiting == 0 {
            return Ok(None);
        }

        let mut chunk = vec![0u8; waiting.min(READ_CHUNK)];
        match self.port.read(&mut chunk) {
            Ok(0) => return Ok(None),
            Ok(n) => self.buffer.extend(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(LinkError::Io(e)),
        }

        Ok(self.buffer.next_line())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        tracing::debug!("Closing serial port {}", self.name);
    }
}

/// Opens [`SerialLink`]s
#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub read_timeout: Duration,
    pub max_line_bytes: usize,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            max_line_bytes: 256,
        }
    }
}

impl LinkOpener for SerialOpener {
    fn open(&self, device: &DeviceIdentifier, baud_rate: u32) -> Result<Box<dyn SensorLink>, LinkError> {
        let link = SerialLink::open(device, baud_rate, self.read_timeout, self.max_line_bytes)?;
        Ok(Box::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_reading() {
        assert_eq!(decode_reading(&RawLine::new("21.50")), Ok(Some(21.5)));
        assert_eq!(decode_reading(&RawLine::new("  -3.25 ")), Ok(Some(-3.25)));
    }

    #[test]
    fn test_decode_blank_line_is_ignored() {
        assert_eq!(decode_reading(&RawLine::new("")), Ok(None));
        assert_eq!(decode_reading(&RawLine::new(" \t")), Ok(None));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            decode_reading(&RawLine::new("garbage")),
            Err(ReadingError::NotANumber("garbage".to_string()))
        );
        assert!(matches!(decode_reading(&RawLine::new("nan")), Err(ReadingError::NotFinite(_))));
        assert_eq!(
            decode_reading(&RawLine::new(vec![0xff, 0xfe, b'1'])),
            Err(ReadingError::InvalidUtf8)
        );
        assert_eq!(ReadingError::InvalidUtf8.class(), ErrorClass::TransientIo);
    }

    #[test]
    fn test_line_buffer_splits_and_strips_crlf() {
        let mut buf = LineBuffer::new(64);
        buf.extend(b"21.5\r\n21.");
        assert_eq!(buf.next_line(), Some(RawLine::new("21.5")));
        assert_eq!(buf.next_line(), None);

        buf.extend(b"6\n");
        assert_eq!(buf.next_line(), Some(RawLine::new("21.6")));
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_line_buffer_flags_overlong_input() {
        let mut buf = LineBuffer::new(8);
        buf.extend(b"123456789");
        let line = buf.next_line().unwrap();
        assert!(line.overlong);
        assert_eq!(decode_reading(&line), Err(ReadingError::Overlong));
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_overlong_tail_split_across_reads_is_dropped() {
        let mut buf = LineBuffer::new(8);
        buf.extend(b"garbage!!");
        assert!(buf.next_line().unwrap().overlong);
        assert!(buf.is_discarding());

        // Same malformed line continues; its numeric-looking tail must not surface
        buf.extend(b"21.5\n");
        assert_eq!(buf.next_line(), None);
        assert!(!buf.is_discarding());

        buf.extend(b"22.0\n");
        let next = buf.next_line().unwrap();
        assert_eq!(decode_reading(&next), Ok(Some(22.0)));
    }

    #[test]
    fn test_overlong_tail_without_terminator_keeps_dropping() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"xxxxxx");
        assert!(buf.next_line().unwrap().overlong);

        buf.extend(b"1234");
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending_len(), 0);

        buf.extend(b"5\n7.5\n");
        assert_eq!(buf.next_line(), Some(RawLine::new("7.5")));
    }

    #[test]
    fn test_complete_line_over_limit_is_overlong() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"123456\n1.0\n");
        assert!(buf.next_line().unwrap().overlong);
        assert_eq!(buf.next_line(), Some(RawLine::new("1.0")));
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut buf = LineBuffer::new(4);
        buf.extend(b"21.5");
        assert_eq!(buf.next_line(), None);
        buf.extend(b"\r\n");
        assert_eq!(buf.next_line(), Some(RawLine::new("21.5")));
    }
}
