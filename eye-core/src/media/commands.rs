//! Argument lists for the external encoder, decoder and probe.

/// Encoder reading raw BGRA frames on stdin and writing an H.264 file.
pub fn encoder_args(width: u32, height: u32, fps: u32, output_path: &str) -> Vec<String> {
    let size = format!("{width}x{height}");
    let rate = fps.to_string();
    [
        "-f",
        "rawvideo",
        "-pix_fmt",
        "bgra",
        "-video_size",
        size.as_str(),
        "-framerate",
        rate.as_str(),
        "-i",
        "pipe:0",
        "-c:v",
        "libx264",
        "-profile:v",
        "high",
        "-crf",
        "10",
        "-pix_fmt",
        "yuv420p",
        "-y",
        output_path,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Decoder writing headerless BGRA frames to stdout.
pub fn decoder_args(video_path: &str) -> Vec<String> {
    [
        "-i",
        video_path,
        "-f",
        "image2pipe",
        "-pix_fmt",
        "bgra",
        "-vcodec",
        "rawvideo",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Probe printing stream metadata as JSON.
pub fn probe_args(video_path: &str) -> Vec<String> {
    ["-v", "quiet", "-print_format", "json", "-show_streams", video_path]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_reads_stdin_and_overwrites_output() {
        let args = encoder_args(640, 480, 30, "/tmp/out.mp4");
        let joined = args.join(" ");
        assert!(joined.starts_with("-f rawvideo -pix_fmt bgra -video_size 640x480 -framerate 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264"));
        assert_eq!(&args[args.len() - 2..], ["-y", "/tmp/out.mp4"]);
    }

    #[test]
    fn decoder_writes_raw_bgra_to_stdout() {
        let args = decoder_args("in.mp4");
        assert_eq!(args[1], "in.mp4");
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "bgra"]));
    }

    #[test]
    fn probe_targets_video_last() {
        let args = probe_args("clip.mov");
        assert_eq!(args.last().map(String::as_str), Some("clip.mov"));
        assert!(args.contains(&"-show_streams".to_string()));
    }
}
