//! Serial side of the acquisition pipeline
//!
//! - [`port`]: picks the sensor's device among the enumerated ports
//! - [`link`]: polled, line-buffered reads from the opened port

pub mod link;
pub mod port;

pub use link::{
    decode_reading, LineBuffer, LinkError, LinkOpener, RawLine, ReadingError, SensorLink, SerialLink,
    SerialOpener,
};
pub use port::{PortDescriptor, PortEnumerator, PortResolver, ResolveError, SystemPorts};
