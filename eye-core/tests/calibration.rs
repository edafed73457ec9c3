#![cfg(unix)]

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eye_core::{EngineError, LoopbackPhotodiode, SimulatedDisplay, VsyncMode};

use common::{LogLines, session_with, wait_until};

#[test]
fn lost_signal_resets_statistics() {
    let display = SimulatedDisplay::new(vec![240], VsyncMode::Paced);
    let diode = LoopbackPhotodiode::attach(&display, Duration::from_millis(4));
    let mut session = session_with(&display, Arc::new(diode.clone()));
    session.initialize("unused-encoder", "unused-probe", LogLines::default().sink());

    let misses = Arc::new(AtomicU64::new(0));
    let reports = Arc::new(Mutex::new(Vec::<String>::new()));
    let missed = Arc::clone(&misses);
    let sink = Arc::clone(&reports);
    session
        .begin_calibration(
            0,
            0,
            Arc::new(move || {
                missed.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move |s: &str| sink.lock().unwrap().push(s.to_string())),
        )
        .unwrap();
    assert!(session.is_calibrating());

    assert!(wait_until(Duration::from_secs(10), || {
        !reports.lock().unwrap().is_empty()
    }));
    assert_eq!(reports.lock().unwrap()[0], "4.00 ± 0.00");

    let before = misses.load(Ordering::SeqCst);
    diode.set_covered(true);
    assert!(wait_until(Duration::from_secs(10), || {
        misses.load(Ordering::SeqCst) > before
    }));

    reports.lock().unwrap().clear();
    diode.set_covered(false);
    assert!(wait_until(Duration::from_secs(10), || {
        !reports.lock().unwrap().is_empty()
    }));
    assert_eq!(reports.lock().unwrap()[0], "4.00 ± 0.00");

    session.end_calibration();
    assert!(!session.is_calibrating());
    assert_eq!(display.surfaces_closed(), 1);
}

#[test]
fn second_calibration_is_rejected() {
    let display = SimulatedDisplay::new(vec![240], VsyncMode::Paced);
    let diode = LoopbackPhotodiode::attach(&display, Duration::from_millis(1));
    let mut session = session_with(&display, Arc::new(diode));
    session.initialize("unused-encoder", "unused-probe", LogLines::default().sink());

    session
        .begin_calibration(0, 0, Arc::new(|| {}), Arc::new(|_: &str| {}))
        .unwrap();
    assert!(matches!(
        session.begin_calibration(0, 0, Arc::new(|| {}), Arc::new(|_: &str| {})),
        Err(EngineError::AlreadyActive("Calibration"))
    ));
    session.end_calibration();
}

#[test]
fn unsupported_rate_is_reported() {
    let display = SimulatedDisplay::new(vec![60], VsyncMode::Paced);
    let mut session = session_with(&display, Arc::new(eye_core::NullTimingReference));
    let log = LogLines::default();
    session.initialize("unused-encoder", "unused-probe", log.sink());

    session
        .begin_calibration_at(0, 0, Some(75), Arc::new(|| {}), Arc::new(|_: &str| {}))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || log.contains("75 Hz")));
    assert!(wait_until(Duration::from_secs(5), || !session.is_calibrating()));
    session.end_calibration();
}
