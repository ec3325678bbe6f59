// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Transfer progress reporting.
//!
//! Clones and fetches report object transfer progress through a
//! [`ProgressSink`]. Scheduled mirrors log progress, while the one-shot CLI
//! draws progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// Receiver of object transfer progress.
pub trait ProgressSink: Send + Sync {
    /// Report received objects out of total objects.
    fn update(&self, received: usize, total: usize);

    /// Report that the transfer is done.
    fn finish(&self) {}
}

/// Discard all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _received: usize, _total: usize) {}
}

/// Report progress as debug log events.
///
/// Emits at most one event per second, plus one on completion.
#[derive(Debug)]
pub struct LogProgress {
    last: Mutex<Option<Instant>>,
}

impl LogProgress {
    const INTERVAL: Duration = Duration::from_secs(1);

    /// Construct new log based progress sink.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogProgress {
    fn update(&self, received: usize, total: usize) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };

        let due = last.map_or(true, |when| when.elapsed() >= Self::INTERVAL);
        if due || received == total {
            *last = Some(Instant::now());
            debug!("received {received}/{total} objects");
        }
    }
}

/// Report progress through a progress bar.
#[derive(Debug, Clone)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Construct new progress bar sink labeled with target message.
    ///
    /// # Errors
    ///
    /// - Return [`indicatif::style::TemplateError`] if the bar style template
    ///   is invalid.
    pub fn new(
        bar: ProgressBar,
        message: impl Into<String>,
    ) -> Result<Self, indicatif::style::TemplateError> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self { bar })
    }
}

impl ProgressSink for BarProgress {
    fn update(&self, received: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(received as u64);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bar_progress_tracks_position() -> anyhow::Result<()> {
        let bar = ProgressBar::hidden();
        let sink = BarProgress::new(bar.clone(), "https://blah.org/foo.git")?;

        sink.update(3, 10);
        assert_eq!(bar.length(), Some(10));
        assert_eq!(bar.position(), 3);

        sink.finish();
        assert!(bar.is_finished());

        Ok(())
    }

    #[test]
    fn log_progress_throttles_updates() {
        let sink = LogProgress::new();
        sink.update(1, 10);
        let first = *sink.last.lock().expect("lock");

        sink.update(2, 10);
        let second = *sink.last.lock().expect("lock");
        assert_eq!(first, second);

        sink.update(10, 10);
        let last = *sink.last.lock().expect("lock");
        assert_ne!(first, last);
    }
}
