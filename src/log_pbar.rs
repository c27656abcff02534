use indicatif::{ProgressBar, ProgressStyle};
use log::info;

// Progress bar for the long single-threaded phases. Every tenth of the way it
// also writes a log line, so progress survives in redirected logs.
pub struct LogProgressBar {
    progress_bar: ProgressBar,
    label: String,
    last_logged_position: u64,
}

impl LogProgressBar {
    pub fn new(label: &str, total: usize) -> Self {
        let progress_bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{elapsed_precise} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            progress_bar.set_style(style.progress_chars("#>-"));
        }
        progress_bar.set_message(label.to_owned());

        Self {
            progress_bar,
            label: label.to_owned(),
            last_logged_position: 0,
        }
    }

    pub fn inc(&mut self, delta: u64) {
        self.progress_bar.inc(delta);
        self.log_progress_if_needed();
    }

    pub fn finish(mut self) {
        self.progress_bar.finish_and_clear();
        self.log_progress();
    }

    fn log_progress_if_needed(&mut self) {
        let step = (self.progress_bar.length().unwrap_or(0) / 10).max(1);
        if self.progress_bar.position() - self.last_logged_position >= step {
            self.log_progress();
        }
    }

    fn log_progress(&mut self) {
        let position = self.progress_bar.position();
        info!(
            "{}: {}/{}",
            self.label,
            position,
            self.progress_bar.length().unwrap_or(0)
        );
        self.last_logged_position = position;
    }
}
