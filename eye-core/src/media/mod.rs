//! Collaboration with the external encoder, decoder and probe programs.

pub mod assembler;
pub mod commands;
pub mod probe;

pub use assembler::FrameAssembler;
pub use commands::{decoder_args, encoder_args, probe_args};
pub use probe::{VideoInfo, parse_probe_output, probe_video};

/// Format whole seconds as `H:MM:SS`.
pub fn format_duration(total_seconds: u64) -> String {
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "0:00:00");
        assert_eq!(format_duration(2), "0:00:02");
        assert_eq!(format_duration(61), "0:01:01");
        assert_eq!(format_duration(3600 + 599), "1:09:59");
        assert_eq!(format_duration(36_000), "10:00:00");
    }
}
