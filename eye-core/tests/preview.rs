#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use bytes::Bytes;
use eye_core::{EngineError, SimulatedDisplay, VsyncMode};

use common::{LogLines, encoder_script, session};

#[test]
fn recording_preview_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path());
    let output = dir.path().join("out.raw");

    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    session.initialize(&encoder, "unused-probe", LogLines::default().sink());
    session
        .create_video_output(8, 4, 30, &output.to_string_lossy())
        .unwrap();

    let channel = session.create_preview_channel().unwrap();
    session.open_preview_channel(&channel).unwrap();

    // Keep frames flowing until one comes back through the channel.
    let start = Instant::now();
    let mut png = None;
    while png.is_none() && start.elapsed() < Duration::from_secs(10) {
        session
            .queue_frame(Bytes::from(vec![255u8; 8 * 4 * 4]), 8, 4)
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        png = session.poll_latest_preview_frame(4, 4).unwrap();
    }
    let png = png.expect("no preview frame arrived");

    let image = image::load_from_memory(&png).unwrap();
    assert_eq!((image.width(), image.height()), (4, 2));

    session.close_preview_channel();
    session.close_video_output();
    // The sender removes the fifo when the channel goes away.
    assert!(!std::path::Path::new(&channel).exists());
}

#[test]
fn preview_channel_needs_an_active_source() {
    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    assert!(matches!(
        session.create_preview_channel(),
        Err(EngineError::NoActiveSource)
    ));
}

#[test]
fn opening_a_missing_channel_yields_nothing() {
    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    session
        .open_preview_channel("/nonexistent/eye-preview-channel")
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(session.poll_latest_preview_frame(10, 10).unwrap(), None);
    session.close_preview_channel();
}
