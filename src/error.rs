//! Error handling for the temperature monitor
//!
//! This module defines the crate-wide error type, a Result alias, and the
//! classification every component error is mapped onto before it reaches the
//! presentation layer.

use serde::Serialize;
use thiserror::Error;

/// Main error type for tempmon operations
#[derive(Error, Debug)]
pub enum TempMonError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TempMonError>,
    },
}

impl TempMonError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TempMonError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for tempmon operations
pub type Result<T> = std::result::Result<T, TempMonError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| TempMonError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| TempMonError::Io(e).with_context(f()))
    }
}

/// How a failure is handled once it leaves the component that raised it
///
/// - `Configuration`: surfaced to the user, never retried automatically
/// - `TransientIo`: absorbed locally, acquisition continues
/// - `FatalSession`: terminates the session, requires an explicit restart
/// - `OptionalIntegration`: downgraded to a warning, mandatory sinks continue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Configuration,
    TransientIo,
    FatalSession,
    OptionalIntegration,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::TransientIo => write!(f, "transient"),
            ErrorClass::FatalSession => write!(f, "fatal"),
            ErrorClass::OptionalIntegration => write!(f, "optional integration"),
        }
    }
}
