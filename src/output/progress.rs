use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{failure, success, working};

/// Spinner for a single long-running fetch.
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("  {msg} {spinner}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(working(message).to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self, message: &str) {
        self.pb
            .finish_with_message(success(format!("{message} ✓")).to_string());
    }

    pub fn fail(self, message: &str) {
        self.pb
            .finish_with_message(failure(format!("{message} ✗")).to_string());
    }
}

/// Counts finished downloads against the number of requested ones.
pub struct DownloadProgress {
    pb: ProgressBar,
}

impl DownloadProgress {
    pub fn new(total: usize, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total as u64);
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(working("Downloading logs").to_string());
        Self { pb }
    }

    pub fn record(&self, succeeded: bool) {
        if !succeeded {
            self.pb
                .set_message(failure("Downloading logs (with failures)").to_string());
        }
        self.pb.inc(1);
    }

    pub fn finish(&self, succeeded: usize, failed: usize) {
        let message = if failed == 0 {
            success(format!("Downloaded {succeeded} logs ✓"))
        } else {
            failure(format!("Downloaded {succeeded} logs, {failed} failed"))
        };
        self.pb.finish_with_message(message.to_string());
    }
}
