//! eye-cli entry point.
//!
//! ```text
//! eye-cli play <VIDEO>...        Present videos back to back
//! eye-cli record -o <FILE>       Encode the synthetic test pattern
//! eye-cli calibrate              Measure display latency
//! eye-cli refresh-rates          List supported refresh rates
//! eye-cli preview <CHANNEL>      Mirror a preview channel to a PNG
//! eye-cli --config <path>        Load a custom config TOML
//! eye-cli --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use eye_cli::config::CliConfig;
use eye_cli::console::{Console, PreviewOutput, RecordOptions};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "eye-cli", about = "Capture, playback and latency calibration console")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "eye.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play videos back to back on the simulated monitor.
    Play {
        /// Video files, in playback order.
        #[arg(required = true)]
        videos: Vec<String>,
        #[command(flatten)]
        monitor: MonitorArgs,
        #[command(flatten)]
        preview: PreviewArgs,
    },
    /// Record the synthetic test pattern.
    Record {
        /// Output video file.
        #[arg(short, long)]
        output: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Capture size; defaults to the output size.
        #[arg(long)]
        capture_width: Option<u32>,
        #[arg(long)]
        capture_height: Option<u32>,
        /// Seconds to record (0 = until Ctrl-C).
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        #[command(flatten)]
        preview: PreviewArgs,
    },
    /// Flicker the monitor and report photodiode latency.
    Calibrate {
        #[command(flatten)]
        monitor: MonitorArgs,
        /// Seconds to run (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// List refresh rates of the monitor.
    RefreshRates {
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Mirror an existing preview channel.
    Preview {
        /// Channel name printed by the producing process.
        channel: String,
        /// Where to write the newest frame.
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
        #[arg(long, default_value_t = 320)]
        max_width: u32,
        #[arg(long, default_value_t = 240)]
        max_height: u32,
    },
}

/// Monitor selection; the config's position when omitted.
#[derive(Args, Debug)]
struct MonitorArgs {
    #[arg(long, requires = "y", allow_negative_numbers = true)]
    x: Option<i32>,
    #[arg(long, requires = "x", allow_negative_numbers = true)]
    y: Option<i32>,
}

impl MonitorArgs {
    fn position(&self) -> Option<(i32, i32)> {
        self.x.zip(self.y)
    }
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// Also mirror the preview stream into this PNG.
    #[arg(long)]
    preview: Option<PathBuf>,
}

impl PreviewArgs {
    fn output(&self) -> Option<PreviewOutput> {
        self.preview.clone().map(|path| PreviewOutput {
            path,
            max_width: 320,
            max_height: 240,
        })
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", CliConfig::default().to_toml()?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        eprintln!("no command given; see --help");
        std::process::exit(2);
    };

    // Load config.
    let config = CliConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("eye-cli v{}", env!("CARGO_PKG_VERSION"));
    info!("encoder: {}", config.tools.encoder);
    info!("refresh rates: {:?}", config.display.refresh_rates);
    info!("vsync: {}", config.display.vsync);

    let mut console = Console::new(config);
    let stop = console.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, stopping");
        stop.store(false, Ordering::SeqCst);
    });

    match command {
        Command::Play {
            videos,
            monitor,
            preview,
        } => {
            console
                .play(videos, monitor.position(), preview.output())
                .await?
        }
        Command::Record {
            output,
            width,
            height,
            fps,
            capture_width,
            capture_height,
            seconds,
            preview,
        } => {
            let options = RecordOptions {
                output,
                width,
                height,
                fps,
                capture_width: capture_width.unwrap_or(width),
                capture_height: capture_height.unwrap_or(height),
                seconds,
            };
            console.record(options, preview.output()).await?
        }
        Command::Calibrate { monitor, seconds } => {
            console.calibrate(monitor.position(), seconds).await?
        }
        Command::RefreshRates { monitor } => {
            let (x, y) = monitor.position().unwrap_or((0, 0));
            for rate in console.refresh_rates(x, y) {
                println!("{rate} Hz");
            }
        }
        Command::Preview {
            channel,
            output,
            max_width,
            max_height,
        } => {
            let output = PreviewOutput {
                path: output,
                max_width,
                max_height,
            };
            console.preview(&channel, output).await?
        }
    }

    Ok(())
}
