//! Configuration for the eye console.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use eye_core::{
    Backends, EngineConfig, LoopbackPhotodiode, NamedPipeConnector, SimulatedDisplay, ToolPaths,
    VsyncMode,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// External encoder, decoder and probe.
    pub tools: ToolsConfig,
    /// Simulated monitor.
    pub display: DisplayConfig,
    /// Engine tunables.
    pub engine: EngineConfig,
    /// Simulated photodiode.
    pub calibration: CalibrationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Paths to the external media tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub encoder: String,
    /// Decoder binary. Empty means the encoder binary decodes too.
    pub decoder: String,
    pub probe: String,
}

/// Simulated display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Refresh rates the monitor supports, preferred first.
    pub refresh_rates: Vec<u32>,
    /// "paced" waits for each refresh like real hardware; "instant" does not.
    pub vsync: String,
    /// Monitor position used when a command does not name one.
    pub x: i32,
    pub y: i32,
    pub scale_to_fit: bool,
}

/// Calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Delay between a white field and the simulated photodiode firing.
    pub photodiode_latency_ms: u64,
    /// Refresh rate to calibrate at (0 = the monitor's preferred rate).
    pub refresh_rate: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            encoder: "ffmpeg".into(),
            decoder: String::new(),
            probe: "ffprobe".into(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_rates: vec![60, 120, 144],
            vsync: "paced".into(),
            x: 0,
            y: 0,
            scale_to_fit: true,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            photodiode_latency_ms: 20,
            refresh_rate: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        std::fs::write(path, Self::default().to_toml()?)
    }

    pub fn to_toml(&self) -> std::io::Result<String> {
        toml::to_string_pretty(self).map_err(std::io::Error::other)
    }

    pub fn tool_paths(&self) -> ToolPaths {
        let mut tools = ToolPaths::new(&self.tools.encoder, &self.tools.probe);
        if !self.tools.decoder.is_empty() {
            tools.decoder = self.tools.decoder.clone();
        }
        tools
    }

    /// Unknown modes fall back to paced.
    pub fn vsync_mode(&self) -> VsyncMode {
        match self.display.vsync.to_ascii_lowercase().as_str() {
            "instant" => VsyncMode::Instant,
            "paced" => VsyncMode::Paced,
            other => {
                tracing::warn!("unknown vsync mode {other:?}; using paced");
                VsyncMode::Paced
            }
        }
    }

    pub fn calibration_rate(&self) -> Option<u32> {
        (self.calibration.refresh_rate > 0).then_some(self.calibration.refresh_rate)
    }

    /// Simulated display, a photodiode taped to it and FIFO preview pipes.
    pub fn backends(&self) -> (Backends, LoopbackPhotodiode) {
        let display = SimulatedDisplay::new(self.display.refresh_rates.clone(), self.vsync_mode());
        let photodiode = LoopbackPhotodiode::attach(
            &display,
            Duration::from_millis(self.calibration.photodiode_latency_ms),
        );
        let backends = Backends {
            display: Arc::new(display),
            timing: Arc::new(photodiode.clone()),
            connector: Arc::new(NamedPipeConnector),
        };
        (backends, photodiode)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = CliConfig::default().to_toml().unwrap();
        assert!(text.contains("refresh_rates"));
        assert!(text.contains("poll_interval_ms"));
        assert!(text.contains("photodiode_latency_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let text = CliConfig::default().to_toml().unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.display.refresh_rates, vec![60, 120, 144]);
        assert_eq!(parsed.engine, EngineConfig::default());
        assert_eq!(parsed.tools.probe, "ffprobe");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: CliConfig = toml::from_str(
            "[display]\nvsync = \"instant\"\n\n[engine]\nbackpressure_seconds = 1\n",
        )
        .unwrap();
        assert_eq!(parsed.vsync_mode(), VsyncMode::Instant);
        assert_eq!(parsed.engine.backpressure_seconds, 1);
        assert_eq!(parsed.engine.start_buffer_seconds, 2);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn decoder_defaults_to_encoder() {
        let mut cfg = CliConfig::default();
        assert_eq!(cfg.tool_paths().decoder, "ffmpeg");
        cfg.tools.decoder = "/opt/decode".into();
        assert_eq!(cfg.tool_paths().decoder, "/opt/decode");
        assert_eq!(cfg.tool_paths().encoder, "ffmpeg");
    }

    #[test]
    fn calibration_rate_zero_means_preferred() {
        let mut cfg = CliConfig::default();
        assert_eq!(cfg.calibration_rate(), None);
        cfg.calibration.refresh_rate = 120;
        assert_eq!(cfg.calibration_rate(), Some(120));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(cfg.display.vsync, "paced");
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eye.toml");
        CliConfig::write_default(&path).unwrap();
        let cfg = CliConfig::load(&path);
        assert_eq!(cfg.calibration.photodiode_latency_ms, 20);
    }
}
