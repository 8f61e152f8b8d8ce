//! Human-readable formatting and progress bars for transfers.

use indicatif::{ProgressBar, ProgressStyle};
use lanbeam_core::TransferSession;

/// Format a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Format a throughput figure.
pub fn format_speed(bps: f64) -> String {
    format!("{}/s", format_bytes(bps as u64))
}

/// A progress bar bound to one session.
pub struct SessionBar {
    bar: ProgressBar,
}

impl SessionBar {
    /// Create a bar sized to the session's totals.
    pub fn new(session: &TransferSession) -> Self {
        let bar = ProgressBar::new(session.total_bytes.max(1));
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:36.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .expect("static template")
            .progress_chars("=>-"),
        );
        Self { bar }
    }

    /// Refresh from a progress snapshot.
    pub fn update(&self, session: &TransferSession) {
        self.bar.set_position(session.bytes_transferred());
        let mut msg = session.current_file.clone().unwrap_or_default();
        if let Some(bps) = session.current_bps {
            msg = format!("{msg} ({})", format_speed(bps));
        }
        self.bar.set_message(msg);
    }

    /// Finish with a closing line.
    pub fn finish(&self, text: &str) {
        self.bar.finish_with_message(text.to_string());
    }
}
