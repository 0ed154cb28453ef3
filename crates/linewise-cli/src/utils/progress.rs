//! Progress display

use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;

/// Bar counting completed batches.
///
/// Hidden when `quiet` is set or stderr is not a terminal.
pub fn batch_bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}
