//! Elapsed time and rate-of-change computation
//!
//! Kept free of I/O and of the clock itself so it can be driven with
//! synthetic instants.

use crate::types::Sample;
use std::time::Instant;

/// Turns raw readings into [`Sample`]s for one session
#[derive(Debug, Clone)]
pub struct RateTracker {
    start: Instant,
    previous: Option<(f64, Instant)>,
}

impl RateTracker {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            previous: None,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Build the sample for a reading taken at `now`.
    ///
    /// The rate is `(t - t_prev) / dt` in units per second when a previous
    /// reading exists and `dt > 0`, otherwise `0.0`.
    pub fn sample(&mut self, temperature: f64, now: Instant) -> Sample {
        let elapsed_ms =
            u64::try_from(now.saturating_duration_since(self.start).as_millis()).unwrap_or(u64::MAX);

        let rate_of_change = match self.previous {
            Some((prev_temp, prev_at)) => {
                let dt = now.saturating_duration_since(prev_at).as_secs_f64();
                if dt > 0.0 {
                    (temperature - prev_temp) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.previous = Some((temperature, now));
        Sample::new(elapsed_ms, temperature, rate_of_change)
    }
}
