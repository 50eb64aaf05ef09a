//! UI utilities for the Lanshare CLI.

use std::io::{self, Write};
use std::time::Duration;

const BAR_WIDTH: usize = 30;

/// Format a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Single-line progress bar redrawn in place.
pub struct ProgressLine {
    label: String,
    last_percent: Option<u8>,
}

impl ProgressLine {
    /// Create a progress line for `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_percent: None,
        }
    }

    /// Redraw for `fraction` in `[0, 1]`. Only redraws when the percentage
    /// changes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn update(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let percent = (fraction * 100.0).round() as u8;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);

        let filled = (fraction * BAR_WIDTH as f64).round() as usize;
        print!(
            "\r  {} [{}{}] {:>3}%",
            self.label,
            "█".repeat(filled),
            "░".repeat(BAR_WIDTH - filled),
            percent
        );
        let _ = io::stdout().flush();
    }

    /// End the line.
    pub fn finish(&self) {
        println!();
    }
}

/// Parse a duration string like "5s", "2m" or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    lanshare_core::config::parse_duration(s).ok()
}
