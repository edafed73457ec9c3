#![cfg(unix)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use eye_core::{EngineError, SimulatedDisplay, ToolPaths, VsyncMode};

use common::{LogLines, encoder_script, script, session, wait_until};

fn frame(width: u32, height: u32, fill: u8) -> Bytes {
    Bytes::from(vec![fill; (width * height * 4) as usize])
}

#[test]
fn frames_reach_the_encoder_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path());
    let output = dir.path().join("out.raw");

    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    session.initialize(&encoder, "unused-probe", LogLines::default().sink());

    session
        .create_video_output(4, 4, 10, &output.to_string_lossy())
        .unwrap();
    assert!(session.is_recording());
    for i in 0..5u8 {
        assert_eq!(session.queue_frame(frame(4, 4, i), 4, 4).unwrap(), i as u64);
    }
    // Oversized capture is resampled to the output size.
    assert_eq!(session.queue_frame(frame(8, 8, 9), 8, 8).unwrap(), 5);
    session.close_video_output();
    assert!(!session.is_recording());

    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), 6 * 4 * 4 * 4);
    for (i, chunk) in written.chunks(64).enumerate() {
        let expected = if i == 5 { 9 } else { i as u8 };
        assert!(chunk.iter().all(|&b| b == expected), "frame {i}");
    }

    assert_eq!(session.poll_completed_frame_ids(), vec![0, 1, 2, 3, 4, 5]);
    assert!(session.poll_completed_frame_ids().is_empty());
    assert_eq!(session.buffer_stats().outstanding(), 0);
    assert_eq!(session.buffer_stats().allocated, 1);
}

#[test]
fn frame_ids_continue_across_recordings() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path());

    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    session.initialize(&encoder, "unused-probe", LogLines::default().sink());

    let first = dir.path().join("first.raw");
    session.create_video_output(2, 2, 30, &first.to_string_lossy()).unwrap();
    session.queue_frame(frame(2, 2, 1), 2, 2).unwrap();
    session.queue_frame(frame(2, 2, 1), 2, 2).unwrap();
    session.close_video_output();

    let second = dir.path().join("second.raw");
    session.create_video_output(2, 2, 30, &second.to_string_lossy()).unwrap();
    assert_eq!(session.queue_frame(frame(2, 2, 2), 2, 2).unwrap(), 2);
    session.close_video_output();

    assert_eq!(session.poll_completed_frame_ids(), vec![0, 1, 2]);
    assert_eq!(std::fs::metadata(&second).unwrap().len(), 16);
}

#[test]
fn second_output_while_recording_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = encoder_script(dir.path());
    let output = dir.path().join("out.raw");

    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    session.initialize(&encoder, "unused-probe", LogLines::default().sink());

    session.create_video_output(2, 2, 30, &output.to_string_lossy()).unwrap();
    assert!(matches!(
        session.create_video_output(2, 2, 30, &output.to_string_lossy()),
        Err(EngineError::AlreadyActive("Recording"))
    ));
    assert!(matches!(
        session.queue_frame(Bytes::from_static(&[0; 3]), 2, 2),
        Err(EngineError::InvalidArgument(_))
    ));
    session.close_video_output();
}

#[test]
fn encoder_exit_is_reported_through_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = script(dir.path(), "encoder", "echo 'unknown codec' >&2\nexit 3");

    let display = SimulatedDisplay::new(vec![60], VsyncMode::Instant);
    let mut session = session(&display);
    let log = LogLines::default();
    session.initialize_with_tools(
        ToolPaths::new(encoder, "unused-probe"),
        log.sink(),
    );

    session
        .create_video_output(2, 2, 30, &dir.path().join("x.raw").to_string_lossy())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || log.contains("ERROR:")));
    assert!(wait_until(Duration::from_secs(5), || !session.is_recording()));
    assert!(session.queue_frame(frame(2, 2, 0), 2, 2).is_err());
    session.close_video_output();
}
