//! External sink adapter
//!
//! Ties the connect, creation and write chains together and owns the row
//! cursor rules:
//!
//! - a write tries the strategies in order against the current cursor and
//!   stops at the first one that does not raise;
//! - on success the cursor advances by exactly one, whichever strategy won;
//! - when every strategy fails the cursor stays put (`RetryRow`) so the next
//!   sample reuses the row, or advances with the row reported as skipped
//!   (`SkipFailedRow`).
//!
//! Under `RetryRow` a strategy that wrote some cells before raising leaves
//! them in place; the next successful write to the same row overwrites them.
//!
//! Every method here touches the automation surface and must run on the
//! thread that owns the host; see [`worker`](super::worker).

use super::connect::{connect, AppHandle, ConnectError};
use super::dispatch::{AutomationHost, DispatchError};
use super::resource::{create_resource, default_create_strategies, CreateError, CreateStrategy, ExternalResource};
use super::strategies::{default_write_strategies, WriteContext, WriteStrategy};
use crate::config::{RowPolicy, DEFAULT_PROG_IDS};
use crate::types::Sample;

/// Adapter behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Automation prog ids, most preferred first
    pub prog_ids: Vec<String>,
    /// Try the strategy that last succeeded for this resource first
    pub cache_winning_strategy: bool,
    /// Cursor handling after a write where every strategy failed
    pub row_policy: RowPolicy,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            prog_ids: DEFAULT_PROG_IDS.iter().map(|s| s.to_string()).collect(),
            cache_winning_strategy: false,
            row_policy: RowPolicy::RetryRow,
        }
    }
}

/// Outcome of writing one sample
#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    Written {
        strategy: &'static str,
        /// Position of the strategy in the chain
        index: usize,
        row: u32,
    },
    AllStrategiesFailed {
        row: u32,
        /// The row was given up (`SkipFailedRow` only)
        skipped: bool,
        failures: Vec<(&'static str, DispatchError)>,
    },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

pub struct ExternalSinkAdapter {
    host: Box<dyn AutomationHost>,
    options: AdapterOptions,
    create_strategies: Vec<Box<dyn CreateStrategy>>,
    write_strategies: Vec<Box<dyn WriteStrategy>>,
}

impl ExternalSinkAdapter {
    /// Adapter with the built-in creation and write chains
    pub fn new(host: Box<dyn AutomationHost>, options: AdapterOptions) -> Self {
        Self::with_strategies(host, options, default_create_strategies(), default_write_strategies())
    }

    pub fn with_strategies(
        host: Box<dyn AutomationHost>,
        options: AdapterOptions,
        create_strategies: Vec<Box<dyn CreateStrategy>>,
        write_strategies: Vec<Box<dyn WriteStrategy>>,
    ) -> Self {
        Self {
            host,
            options,
            create_strategies,
            write_strategies,
        }
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn is_available(&self) -> bool {
        self.host.is_available()
    }

    /// Names of the write strategies in probe order
    pub fn write_strategy_names(&self) -> Vec<&'static str> {
        self.write_strategies.iter().map(|s| s.name()).collect()
    }

    pub fn connect(&self) -> Result<AppHandle, ConnectError> {
        connect(self.host.as_ref(), &self.options.prog_ids)
    }

    /// Create the session sheet; its row cursor starts at 1
    pub fn create_resource(&self, app: &AppHandle, name: &str) -> Result<ExternalResource, CreateError> {
        create_resource(app, name, &self.create_strategies)
    }

    /// Probe order for this write: the cached winner first when enabled
    fn probe_order(&self, resource: &ExternalResource) -> Vec<usize> {
        let all = 0..self.write_strategies.len();
        match resource.winning_strategy() {
            Some(first) if self.options.cache_winning_strategy && first < self.write_strategies.len() => {
                std::iter::once(first).chain(all.filter(|&i| i != first)).collect()
            }
            _ => all.collect(),
        }
    }

    /// Write `sample` to the row under the cursor
    pub fn write(&self, app: &AppHandle, resource: &mut ExternalResource, sample: &Sample) -> WriteResult {
        let row = resource.row_cursor();
        let mut failures = Vec::new();
        let mut winner = None;
        let order = self.probe_order(resource);

        {
            let ctx = WriteContext {
                app: app.app.as_ref(),
                resource: &*resource,
                row,
            };
            for index in order {
                let strategy = &self.write_strategies[index];
                match strategy.write(&ctx, sample) {
                    Ok(()) => {
                        winner = Some((index, strategy.name()));
                        break;
                    }
                    Err(e) => {
                        tracing::trace!("Row {} via {} failed: {}", row, strategy.name(), e);
                        failures.push((strategy.name(), e));
                    }
                }
            }
        }

        if let Some((index, strategy)) = winner {
            resource.advance();
            if self.options.cache_winning_strategy {
                resource.set_winning_strategy(index);
            }
            return WriteResult::Written { strategy, index, row };
        }

        let skipped = self.options.row_policy == RowPolicy::SkipFailedRow;
        if skipped {
            resource.advance();
        }
        tracing::warn!(
            "All {} write strategies failed for row {}{}",
            failures.len(),
            row,
            if skipped { ", row skipped" } else { "" }
        );
        WriteResult::AllStrategiesFailed { row, skipped, failures }
    }

    /// Release the application and sheet references.
    ///
    /// The application itself is left running.
    pub fn disconnect(&self, app: AppHandle, resource: Option<ExternalResource>) {
        if let Some(resource) = resource {
            tracing::info!(
                "Released {} after {} row(s)",
                resource.sheet_path(),
                resource.row_cursor() - 1
            );
        }
        tracing::debug!("Released handle to {}", app.prog_id);
        drop(app);
    }
}
