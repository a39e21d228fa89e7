//! Port resolution
//!
//! Picks the sensor's serial device among the enumerated ports by matching
//! descriptive metadata against known USB-serial chip identifiers.

use crate::error::ErrorClass;
use crate::types::DeviceIdentifier;
use serialport::SerialPortType;
use thiserror::Error;

/// One enumerated serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// OS-level port name
    pub port_name: String,
    /// Descriptive metadata (product / manufacturer / port kind)
    pub description: String,
}

impl PortDescriptor {
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
        }
    }
}

/// Port resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No enumerated port matched a known chip identifier
    #[error("No serial device matching {known:?} among {scanned} port(s)")]
    NotFound { known: Vec<String>, scanned: usize },

    /// The OS refused to enumerate ports
    #[error("Failed to enumerate serial ports: {0}")]
    Enumeration(String),
}

impl ResolveError {
    /// Both cases need user action; neither is retried automatically
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Source of the available serial ports
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator {
    fn list(&self) -> Result<Vec<PortDescriptor>, ResolveError>;
}

/// Enumerates the ports present on this machine through `serialport`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list(&self) -> Result<Vec<PortDescriptor>, ResolveError> {
        let ports = serialport::available_ports()
            .map_err(|e| ResolveError::Enumeration(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|info| {
                let description = describe_port_type(&info.port_type);
                PortDescriptor::new(info.port_name, description)
            })
            .collect())
    }
}

/// Flatten the port type into one searchable description string
fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut parts = Vec::new();
            if let Some(product) = usb.product.as_deref() {
                parts.push(product.to_string());
            }
            if let Some(manufacturer) = usb.manufacturer.as_deref() {
                parts.push(manufacturer.to_string());
            }
            parts.push(format!("VID:PID={:04X}:{:04X}", usb.vid, usb.pid));
            parts.join(" ")
        }
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => String::new(),
    }
}

/// Resolves the sensor's device from a set of known chip identifiers
#[derive(Debug, Clone)]
pub struct PortResolver {
    known_chip_ids: Vec<String>,
}

impl PortResolver {
    pub fn new<I, S>(known_chip_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_chip_ids: known_chip_ids
                .into_iter()
                .map(|id| id.into().to_lowercase())
                .collect(),
        }
    }

    /// Return the first enumerated port whose description contains a known
    /// identifier (case-insensitive).
    pub fn resolve(&self, ports: &dyn PortEnumerator) -> Result<DeviceIdentifier, ResolveError> {
        let candidates = ports.list()?;

        for port in &candidates {
            let description = port.description.to_lowercase();
            if self.known_chip_ids.iter().any(|id| description.contains(id.as_str())) {
                tracing::info!("Resolved sensor port {} ({})", port.port_name, port.description);
                return Ok(DeviceIdentifier::new(&port.port_name, &port.description));
            }
        }

        tracing::warn!(
            "No serial device matched {:?} ({} port(s) scanned)",
            self.known_chip_ids,
            candidates.len()
        );
        Err(ResolveError::NotFound {
            known: self.known_chip_ids.clone(),
            scanned: candidates.len(),
        })
    }
}
