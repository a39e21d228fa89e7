//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod scripted_link;

use std::path::Path;
use std::time::{Duration, Instant};
use tempmon::events::{CoreEvent, EventReceiver, StatusKind};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Poll `check` until it holds or the test timeout expires
pub fn wait_until<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Status kinds among `events`, in order
pub fn status_kinds(events: &[CoreEvent]) -> Vec<StatusKind> {
    events.iter().filter_map(CoreEvent::status_kind).collect()
}

/// Drain everything currently queued on `rx`
pub fn drain(rx: &EventReceiver) -> Vec<CoreEvent> {
    rx.drain()
}

/// Parsed rows of a session CSV file
pub fn read_csv_rows(path: &Path) -> Vec<(u64, f64, f64)> {
    let content = std::fs::read_to_string(path).expect("CSV file readable");
    content
        .lines()
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 3, "malformed CSV row {:?}", line);
            (
                fields[0].parse().expect("elapsed_ms"),
                fields[1].parse().expect("temperature"),
                fields[2].parse().expect("rate_of_change"),
            )
        })
        .collect()
}

/// The single CSV file written into `folder`
pub fn only_csv_in(folder: &Path) -> std::path::PathBuf {
    let files: Vec<_> = std::fs::read_dir(folder)
        .expect("folder readable")
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    assert_eq!(files.len(), 1, "expected one CSV file, found {:?}", files);
    files[0].clone()
}
