//! Progress indicators for CLI-mode commands

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for steps with no known length
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Byte-counting bar for downloads; `total` of 0 means unknown length
pub fn create_download_bar(total: u64, message: &str) -> ProgressBar {
    if total == 0 {
        return create_spinner(message);
    }
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.cyan} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar
}

fn finish_with(bar: &ProgressBar, prefix_style: &str, prefix: &'static str, message: &str) {
    bar.set_style(
        ProgressStyle::default_spinner()
            .template(&format!("{{prefix:{}}} {{msg}}", prefix_style))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_prefix(prefix);
    bar.finish_with_message(message.to_string());
}

pub fn finish_success(bar: &ProgressBar, message: &str) {
    finish_with(bar, ".green", "✓", message);
}

pub fn finish_error(bar: &ProgressBar, message: &str) {
    finish_with(bar, ".red", "✗", message);
}
