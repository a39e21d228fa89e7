//! Bounded retention window feeding live visualization

use super::{SampleSink, SinkError};
use crate::config::DEFAULT_WINDOW_CAPACITY;
use crate::types::Sample;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// The most recent samples of the running session, oldest first
///
/// Clones share the same buffer: the acquisition thread pushes through its
/// copy while the presentation thread takes snapshots through another. The
/// lock is held only for a single `push_back`/`pop_front` pair or for the copy
/// made by [`snapshot`](Self::snapshot), so a reader never sees a partially
/// evicted window.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    inner: Arc<Mutex<VecDeque<Sample>>>,
    capacity: usize,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a sample, evicting the oldest one once the window is full
    pub fn push(&self, sample: Sample) {
        let mut points = self.lock();
        if points.len() >= self.capacity {
            points.pop_front();
        }
        points.push_back(sample);
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<Sample> {
        self.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every sample, e.g. when a new session starts
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Get the window as plot points (time in seconds, temperature)
    pub fn as_plot_points(&self) -> Vec<[f64; 2]> {
        self.lock()
            .iter()
            .map(|s| [s.elapsed_secs(), s.temperature])
            .collect()
    }
}

impl SampleSink for SampleWindow {
    fn name(&self) -> &str {
        "window"
    }

    fn is_mandatory(&self) -> bool {
        false
    }

    fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        self.push(*sample);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
