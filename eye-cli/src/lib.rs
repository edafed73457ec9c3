//! # eye-cli: console front end
//!
//! Drives an `eye-core` session from the terminal against the simulated
//! display and photodiode backends.
//!
//! ## Commands
//!
//! - **play**: vsync-paced playback of one or more videos.
//! - **record**: encode a synthetic capture source to a file.
//! - **calibrate**: flicker the display and report end-to-end latency.
//! - **refresh-rates**: list what the monitor supports.
//! - **preview**: mirror a preview channel into a PNG on disk.

pub mod config;
pub mod console;
