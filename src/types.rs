//! Core data types shared by the acquisition loop, the sinks and the
//! presentation layer

use serde::{Deserialize, Serialize};

/// One sensor reading plus its derived rate of change
///
/// Samples are created by the acquisition loop and never mutated afterwards;
/// every sink receives a copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the session started (truncated)
    pub elapsed_ms: u64,
    /// Temperature as reported by the sensor
    pub temperature: f64,
    /// Signed change per second relative to the previous sample, 0.0 for the first one
    pub rate_of_change: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(elapsed_ms: u64, temperature: f64, rate_of_change: f64) -> Self {
        Self {
            elapsed_ms,
            temperature,
            rate_of_change,
        }
    }

    /// Elapsed time in seconds (for plotting)
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms as f64 / 1000.0
    }
}

/// Serial device selected by the port resolver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// OS-level port name (e.g. `COM3`, `/dev/ttyUSB0`)
    pub port_name: String,
    /// Human-readable description the device matched on
    pub description: String,
}

impl DeviceIdentifier {
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
        }
    }
}

impl std::fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.port_name)
        } else {
            write!(f, "{} ({})", self.port_name, self.description)
        }
    }
}

/// Lifecycle of one acquisition session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Sampling loop is running
    #[default]
    Running,
    /// Stop was requested, the loop has not exited yet
    Stopping,
    /// Loop exited after a stop request and resources were released
    Stopped,
    /// Loop terminated on a fatal error; `stop()` still has to release resources
    StoppedOnError,
}

impl SessionState {
    /// Whether the sampling loop may still produce samples
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Stopping)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Running => write!(f, "Running"),
            SessionState::Stopping => write!(f, "Stopping..."),
            SessionState::Stopped => write!(f, "Stopped"),
            SessionState::StoppedOnError => write!(f, "Stopped (error)"),
        }
    }
}

/// Counters accumulated over one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Samples produced and fanned out
    pub samples: u64,
    /// Serial lines dropped because they did not parse as a reading
    pub discarded_lines: u64,
    /// Rows the external sink confirmed
    pub external_written: u64,
    /// Samples for which every external write strategy failed
    pub external_failed: u64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sample(s), {} discarded line(s)",
            self.samples, self.discarded_lines
        )?;
        if self.external_written > 0 || self.external_failed > 0 {
            write!(
                f,
                ", external {} written / {} failed",
                self.external_written, self.external_failed
            )?;
        }
        Ok(())
    }
}
