//! Shared fixtures: shell-script stand-ins for the media tools and a
//! session wired to simulated backends.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eye_core::preview::NamedPipeConnector;
use eye_core::{
    Backends, EngineConfig, LogSink, NullTimingReference, Session, SimulatedDisplay,
    TimingReference,
};

/// Write an executable `/bin/sh` script into `dir`.
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Probe reporting a `width`×`height` video at `rate` with `frames` frames,
/// whatever file it is asked about.
pub fn probe_script(dir: &Path, width: u32, height: u32, rate: &str, frames: u64) -> String {
    let json = format!(
        r#"{{"streams":[{{"codec_type":"video","width":{width},"height":{height},"r_frame_rate":"{rate}","nb_frames":"{frames}"}}]}}"#
    );
    script(dir, "probe", &format!("cat <<'JSON'\n{json}\nJSON"))
}

/// Decoder emitting `bytes` zero bytes.
pub fn decoder_script(dir: &Path, bytes: usize) -> String {
    script(dir, "decoder", &format!("head -c {bytes} /dev/zero"))
}

/// Encoder copying stdin into the file named by its last argument.
pub fn encoder_script(dir: &Path) -> String {
    script(dir, "encoder", "for last; do :; done\ncat > \"$last\"")
}

/// Collects every line sent to the log sink.
#[derive(Clone, Default)]
pub struct LogLines(Arc<Mutex<Vec<String>>>);

impl LogLines {
    pub fn sink(&self) -> LogSink {
        let lines = Arc::clone(&self.0);
        Arc::new(move |line: &str| lines.lock().unwrap().push(line.to_string()))
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

pub fn quick_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 5,
        receiver_retry_delay_ms: 20,
        encoder_exit_timeout_ms: 2_000,
        ..EngineConfig::default()
    }
}

pub fn session_with(display: &SimulatedDisplay, timing: Arc<dyn TimingReference>) -> Session {
    session_with_config(display, timing, quick_config())
}

pub fn session_with_config(
    display: &SimulatedDisplay,
    timing: Arc<dyn TimingReference>,
    config: EngineConfig,
) -> Session {
    Session::new(
        config,
        Backends {
            display: Arc::new(display.clone()),
            timing,
            connector: Arc::new(NamedPipeConnector),
        },
    )
}

pub fn session(display: &SimulatedDisplay) -> Session {
    session_with(display, Arc::new(NullTimingReference))
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
