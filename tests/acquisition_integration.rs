//! Integration tests for the acquisition loop
//!
//! These tests drive whole sessions against scripted serial links:
//! - Timing and derivative of the produced samples
//! - CSV durability and record count
//! - Stop semantics and fatal link errors

mod common;

use common::builders::{test_device, AcquisitionBuilder};
use common::scripted_link::{AfterScript, ScriptedOpener};
use common::{assert_float_eq, only_csv_in, read_csv_rows, status_kinds, wait_until};
use proptest::prelude::*;
use serial_test::serial;
use std::time::{Duration, Instant};
use tempmon::acquisition::{SinkConfig, StartError};
use tempmon::error::ErrorClass;
use tempmon::events::{event_bus, CoreEvent, StatusKind};
use tempmon::serial::{decode_reading, RawLine};
use tempmon::types::SessionState;

#[test]
#[serial]
fn test_one_second_readings_with_garbage_line() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::new(
        vec![
            (Duration::ZERO, "21.50"),
            (Duration::from_secs(1), "21.60"),
            (Duration::from_secs(2), "garbage"),
            (Duration::from_secs(3), "21.80"),
        ],
        AfterScript::Idle,
    );
    let probe = opener.probe();
    let (bus, rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| probe.is_exhausted()));
    let stats = acq.stop().unwrap();

    assert_eq!(stats.samples, 3);
    assert_eq!(stats.discarded_lines, 1);

    let rows = read_csv_rows(&only_csv_in(dir.path()));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].2, 0.0);
    assert_float_eq(rows[1].2, 0.1, 0.01);
    assert!(rows[2].0.abs_diff(3000) <= 50, "third sample at {} ms", rows[2].0);
    assert_float_eq(rows[2].2, 0.1, 0.01);

    let samples: Vec<_> = rx.drain().iter().filter_map(CoreEvent::as_sample).copied().collect();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[2].temperature, 21.8);
}

#[test]
#[serial]
fn test_first_sample_has_zero_rate() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(vec!["37.0", "12.0"], AfterScript::Idle);
    let probe = opener.probe();
    let (bus, _rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| probe.is_exhausted()));
    acq.stop();

    let first = acq.window().snapshot()[0];
    assert_eq!(first.rate_of_change, 0.0);
    assert_eq!(first.temperature, 37.0);
}

#[test]
#[serial]
fn test_connected_is_observed_before_samples() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(vec!["20.0", "20.5", "21.0"], AfterScript::Idle);
    let probe = opener.probe();
    let (bus, rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| probe.is_exhausted()));
    acq.stop();

    let events = rx.drain();
    let connected = events
        .iter()
        .position(|e| e.status_kind() == Some(StatusKind::Connected))
        .unwrap();
    let first_sample = events.iter().position(|e| e.as_sample().is_some()).unwrap();
    assert!(connected < first_sample);

    match &events[connected] {
        CoreEvent::StatusChanged { detail, .. } => {
            assert!(detail.starts_with("COM3"));
            assert!(detail.ends_with(".csv"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
#[serial]
fn test_start_waits_for_settle_delay() {
    let settle = Duration::from_millis(300);
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(vec!["20.0", "20.5"], AfterScript::Idle);
    let probe = opener.probe();
    let (bus, _rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().settle_delay(settle).build(opener, bus);

    let begun = Instant::now();
    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(begun.elapsed() >= settle, "start returned after {:?}", begun.elapsed());
    assert_eq!(probe.times_opened(), 1);

    assert!(wait_until(|| probe.is_exhausted()));
    acq.stop();

    // The session clock starts once the board has settled
    let rows = read_csv_rows(&only_csv_in(dir.path()));
    assert_eq!(rows.len(), 2);
    assert!(rows[0].0 < 300, "first sample at {} ms", rows[0].0);
}

#[test]
#[serial]
fn test_stop_twice_releases_once() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(vec!["20.0"], AfterScript::Idle);
    let probe = opener.probe();
    let (bus, rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| probe.is_exhausted()));

    let first = acq.stop().unwrap();
    let second = acq.stop().unwrap();
    assert_eq!(first, second);
    assert!(!acq.is_running());
    assert_eq!(acq.session().unwrap().state(), SessionState::Stopped);

    let stops = status_kinds(&rx.drain())
        .into_iter()
        .filter(|k| *k == StatusKind::Stopped)
        .count();
    assert_eq!(stops, 1);
    assert_eq!(read_csv_rows(&only_csv_in(dir.path())).len(), 1);
}

#[test]
#[serial]
fn test_restart_after_stop_creates_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let (bus, _rx) = event_bus();

    // Two sessions need two scripts, so each gets its own controller
    let mut first = AcquisitionBuilder::new()
        .build(ScriptedOpener::immediate(vec!["20.0"], AfterScript::Idle), bus.clone());
    first.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    let first_path = first.session().unwrap().csv_path().to_path_buf();
    first.stop();

    let mut second = AcquisitionBuilder::new()
        .build(ScriptedOpener::immediate(vec!["20.0"], AfterScript::Idle), bus);
    second.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    let second_path = second.session().unwrap().csv_path().to_path_buf();
    second.stop();

    assert_ne!(first_path, second_path);
    assert!(first_path.exists() && second_path.exists());
}

#[test]
#[serial]
fn test_no_device_reports_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(Vec::<&str>::new(), AfterScript::Idle);
    let probe = opener.probe();
    let (bus, rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    let err = acq.start(None, &SinkConfig::new(dir.path())).unwrap_err();
    assert!(matches!(err, StartError::Configuration(_)));
    assert_eq!(probe.times_opened(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(matches!(
        rx.try_recv(),
        Some(CoreEvent::ErrorRaised {
            class: ErrorClass::Configuration,
            ..
        })
    ));
}

#[test]
#[serial]
fn test_disconnect_ends_session_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let opener = ScriptedOpener::immediate(vec!["20.0", "20.1"], AfterScript::Disconnect);
    let (bus, rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| {
        acq.session().map(|s| s.state()) == Some(SessionState::StoppedOnError)
    }));
    assert!(acq.is_running(), "resources are held until stop");

    let stats = acq.stop().unwrap();
    assert_eq!(stats.samples, 2);
    assert_eq!(acq.session().unwrap().state(), SessionState::StoppedOnError);
    assert_eq!(read_csv_rows(&only_csv_in(dir.path())).len(), 2);

    let events = rx.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        CoreEvent::ErrorRaised {
            class: ErrorClass::FatalSession,
            ..
        }
    )));
    assert_eq!(status_kinds(&events).last(), Some(&StatusKind::Stopped));
}

#[test]
#[serial]
fn test_window_keeps_latest_hundred() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..150).map(|i| format!("{}.0", i)).collect();
    let opener = ScriptedOpener::immediate(lines, AfterScript::Idle);
    let probe = opener.probe();
    let (bus, _rx) = event_bus();
    let mut acq = AcquisitionBuilder::new().build(opener, bus);

    acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
    assert!(wait_until(|| probe.is_exhausted()));
    acq.stop();

    let window = acq.window().snapshot();
    assert_eq!(window.len(), 100);
    assert_eq!(window[0].temperature, 50.0);
    assert_eq!(window[99].temperature, 149.0);
    assert_eq!(read_csv_rows(&only_csv_in(dir.path())).len(), 150);
}

fn sensor_line() -> impl Strategy<Value = String> {
    prop_oneof![
        (-40.0f64..125.0).prop_map(|t| format!("{:.2}", t)),
        "[a-z]{1,6}",
        Just(String::new()),
        Just("1.2.3".to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    #[serial]
    fn test_csv_rows_match_valid_readings(lines in prop::collection::vec(sensor_line(), 0..40)) {
        let valid = lines
            .iter()
            .filter(|l| matches!(decode_reading(&RawLine::new(l.as_str())), Ok(Some(_))))
            .count();

        let dir = tempfile::tempdir().unwrap();
        let opener = ScriptedOpener::immediate(lines, AfterScript::Idle);
        let probe = opener.probe();
        let (bus, _rx) = event_bus();
        let mut acq = AcquisitionBuilder::new()
            .poll_interval(Duration::from_millis(1))
            .build(opener, bus);

        acq.start(Some(test_device()), &SinkConfig::new(dir.path())).unwrap();
        prop_assert!(wait_until(|| probe.is_exhausted()));
        let stats = acq.stop().unwrap();

        prop_assert_eq!(stats.samples as usize, valid);
        prop_assert_eq!(read_csv_rows(&only_csv_in(dir.path())).len(), valid);
    }
}
