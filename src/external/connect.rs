//! Connection chain to the spreadsheet application

use super::dispatch::{AutomationHost, Dispatch, DispatchError};
use crate::error::ErrorClass;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// How a handle was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMethod {
    /// Attached to an instance that was already running
    Attach,
    /// Started a new instance
    Launch,
}

impl fmt::Display for ConnectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMethod::Attach => write!(f, "attach"),
            ConnectMethod::Launch => write!(f, "launch"),
        }
    }
}

/// One failed connection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectAttempt {
    pub method: ConnectMethod,
    pub prog_id: String,
    pub error: DispatchError,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    /// No automation bridge in this environment
    #[error("automation is not available on this platform")]
    Unavailable,

    #[error("all {} connection attempt(s) failed", attempts.len())]
    AllAttemptsFailed { attempts: Vec<ConnectAttempt> },
}

impl ConnectError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::OptionalIntegration
    }
}

/// Live handle to the application
///
/// Dropping it releases the reference; the application itself keeps running.
#[derive(Clone)]
pub struct AppHandle {
    pub app: Rc<dyn Dispatch>,
    pub prog_id: String,
    pub method: ConnectMethod,
}

impl fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppHandle")
            .field("prog_id", &self.prog_id)
            .field("method", &self.method)
            .finish()
    }
}

/// Attempt order for `prog_ids`: attach to each id in turn, then launch each.
pub fn attempt_order(prog_ids: &[String]) -> Vec<(ConnectMethod, &str)> {
    let attach = prog_ids.iter().map(|id| (ConnectMethod::Attach, id.as_str()));
    let launch = prog_ids.iter().map(|id| (ConnectMethod::Launch, id.as_str()));
    attach.chain(launch).collect()
}

/// Obtain a handle to the application, returning the first attempt that works
pub fn connect(host: &dyn AutomationHost, prog_ids: &[String]) -> Result<AppHandle, ConnectError> {
    if !host.is_available() {
        return Err(ConnectError::Unavailable);
    }

    let mut attempts = Vec::new();
    for (method, prog_id) in attempt_order(prog_ids) {
        let result = match method {
            ConnectMethod::Attach => host.attach(prog_id),
            ConnectMethod::Launch => host.launch(prog_id),
        };

        match result {
            Ok(app) => {
                tracing::info!("Connected to {} via {} ({})", prog_id, method, host.name());
                return Ok(AppHandle {
                    app,
                    prog_id: prog_id.to_string(),
                    method,
                });
            }
            Err(error) => {
                tracing::debug!("{} {} failed: {}", method, prog_id, error);
                attempts.push(ConnectAttempt {
                    method,
                    prog_id: prog_id.to_string(),
                    error,
                });
            }
        }
    }

    Err(ConnectError::AllAttemptsFailed { attempts })
}
