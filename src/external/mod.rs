//! External spreadsheet sink
//!
//! Best-effort mirror of every sample into a sheet of a running spreadsheet
//! application, driven through its late-bound automation surface.
//!
//! # Components
//!
//! - [`dispatch`] - `Variant`/`Dispatch` model of the automation surface and
//!   the [`AutomationHost`] entry point
//! - [`connect`] - attach-then-launch connection chain
//! - [`resource`] - per-session sheet creation chain and row cursor
//! - [`strategies`] - ordered write tactics for one row
//! - [`adapter`] - probing write with cursor rules
//! - [`worker`] - the one thread allowed to touch the surface
//! - [`memory`] - in-process surface for dry runs and tests
//! - `com` - `IDispatch` bridge used by the platform backend on Windows
//!
//! # Example
//!
//! ```ignore
//! use tempmon::events::event_bus;
//! use tempmon::external::{AdapterOptions, ExternalSinkWorker, MemorySurface};
//!
//! let (bus, _rx) = event_bus();
//! let surface = MemorySurface::new();
//! let host = surface.host();
//! let worker = ExternalSinkWorker::spawn(
//!     Box::new(move || Box::new(host) as _),
//!     AdapterOptions::default(),
//!     bus,
//!     std::time::Duration::from_secs(30),
//! )?;
//!
//! let client = worker.client();
//! client.open_session("Measurement_20240309_140507")?;
//! client.write(sample)?;
//! client.close_session()?;
//! ```

pub mod adapter;
#[cfg(windows)]
pub mod com;
pub mod connect;
pub mod dispatch;
pub mod memory;
pub mod resource;
pub mod strategies;
pub mod worker;

pub use adapter::{AdapterOptions, ExternalSinkAdapter, WriteResult};
pub use connect::{AppHandle, ConnectAttempt, ConnectError, ConnectMethod};
pub use dispatch::{AutomationHost, Dispatch, DispatchError, DispatchResult, UnavailableHost, Variant};
pub use memory::{MemoryHost, MemorySurface};
pub use resource::{resource_name, CreateError, CreateStrategy, CreatedSheet, ExternalResource};
pub use strategies::{default_write_strategies, WriteContext, WriteStrategy};
pub use worker::{
    ExternalSinkClient, ExternalSinkError, ExternalSinkWorker, ExternalWriteStats, HostFactory,
    SessionOpened,
};

use crate::config::SurfaceBackend;

/// Host factory for the configured backend
pub fn host_factory(backend: SurfaceBackend, surface: Option<MemorySurface>) -> HostFactory {
    match backend {
        SurfaceBackend::Platform => Box::new(platform_host),
        SurfaceBackend::Memory => {
            let host = surface.unwrap_or_default().host();
            Box::new(move || Box::new(host) as Box<dyn AutomationHost>)
        }
    }
}

#[cfg(windows)]
fn platform_host() -> Box<dyn AutomationHost> {
    match com::ComHost::new() {
        Ok(host) => Box::new(host),
        Err(e) => {
            tracing::warn!("COM initialization failed: {}", e);
            Box::new(UnavailableHost)
        }
    }
}

#[cfg(not(windows))]
fn platform_host() -> Box<dyn AutomationHost> {
    Box::new(UnavailableHost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_shares_surface() {
        let surface = MemorySurface::new();
        let host = host_factory(SurfaceBackend::Memory, Some(surface))();
        assert!(host.is_available());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_platform_backend_unavailable_off_windows() {
        let host = host_factory(SurfaceBackend::Platform, None)();
        assert!(!host.is_available());
        assert_eq!(host.name(), "unavailable");
    }

    #[cfg(windows)]
    #[test]
    fn test_platform_backend_uses_com_on_windows() {
        let host = host_factory(SurfaceBackend::Platform, None)();
        assert!(host.is_available());
        assert_eq!(host.name(), "com");
    }
}
