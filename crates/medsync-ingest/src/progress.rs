//! Transient progress reporting
//!
//! The record counter shown while parsing is a single self-overwriting line on
//! stderr, kept apart from the `tracing` log stream. It lives behind
//! [`ProgressReporter`] so non-interactive runs and tests can use [`NoopProgress`].

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A transient, self-overwriting status line
pub trait ProgressReporter: Send + Sync {
    /// Show the line with an initial message
    fn start(&self, message: &str);

    /// Replace the line with the current record count
    fn update(&self, count: u64);

    /// Remove the line
    fn clear(&self);
}

/// Progress line drawn with `indicatif`
#[derive(Default)]
pub struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

impl ProgressReporter for TerminalProgress {
    fn start(&self, message: &str) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(old) = bar.take() {
                old.finish_and_clear();
            }
            *bar = Some(Self::spinner(message));
        }
    }

    fn update(&self, count: u64) {
        if let Ok(bar) = self.bar.lock() {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(count);
                pb.set_message(format!("{} drugs parsed ...", count));
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        }
    }
}

/// Reporter that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start(&self, _message: &str) {}
    fn update(&self, _count: u64) {}
    fn clear(&self) {}
}

/// Pick a terminal reporter when a person is watching stderr, otherwise a no-op
pub fn for_stderr() -> Arc<dyn ProgressReporter> {
    if console::user_attended_stderr() {
        Arc::new(TerminalProgress::new())
    } else {
        Arc::new(NoopProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_progress_lifecycle() {
        let progress = TerminalProgress::new();
        progress.start("Parsing drugs");
        progress.update(50);
        {
            let bar = progress.bar.lock().unwrap();
            assert_eq!(bar.as_ref().map(|pb| pb.position()), Some(50));
        }
        progress.clear();
        assert!(progress.bar.lock().unwrap().is_none());
    }

    #[test]
    fn test_clear_without_start_is_harmless() {
        let progress = TerminalProgress::new();
        progress.clear();
        progress.update(10);
        assert!(progress.bar.lock().unwrap().is_none());
    }

    #[test]
    fn test_restart_replaces_line() {
        let progress = TerminalProgress::new();
        progress.start("first");
        progress.update(5);
        progress.start("second");
        let bar = progress.bar.lock().unwrap();
        assert_eq!(bar.as_ref().map(|pb| pb.position()), Some(0));
    }
}
