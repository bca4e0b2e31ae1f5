//! Terminal spinner for long waits.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Sleep for `duration` behind a spinner showing `message` and the elapsed time.
///
/// The spinner draws to stderr and stays hidden when stderr is not a terminal.
pub async fn sleep_with_spinner(message: String, duration: Duration) {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));

    tokio::time::sleep(duration).await;

    pb.finish_and_clear();
}
