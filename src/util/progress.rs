//! Progress display for the rate-limited import phases.
//!
//! Bars and spinners draw to stderr and only when stderr is a terminal.
//! A hidden tracker still counts, so callers never branch on visibility.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";
const TICK: Duration = Duration::from_millis(100);

/// Whether stderr can show progress.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars("=>-"))
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress of one phase: records created, photos uploaded, and so on.
pub struct ProgressTracker {
    bar: ProgressBar,
    phase: String,
    showing: bool,
}

impl ProgressTracker {
    /// A bar over `total` items, drawn when stderr is a terminal.
    #[must_use]
    pub fn new(total: u64, phase: &str) -> Self {
        let showing = should_show_progress();
        let bar = ProgressBar::new(total);
        if showing {
            bar.set_style(bar_style());
            bar.set_message(phase.to_string());
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            bar,
            phase: phase.to_string(),
            showing,
        }
    }

    /// A tracker that counts but never draws.
    #[must_use]
    pub fn hidden(total: u64) -> Self {
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden());
        Self {
            bar,
            phase: String::new(),
            showing: false,
        }
    }

    /// A spinner for work of unknown size, such as listing group members.
    #[must_use]
    pub fn new_spinner(phase: &str) -> Self {
        let showing = should_show_progress();
        let bar = ProgressBar::new_spinner();
        if showing {
            bar.set_style(spinner_style());
            bar.set_message(phase.to_string());
            bar.enable_steady_tick(TICK);
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            bar,
            phase: phase.to_string(),
            showing,
        }
    }

    pub fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    /// Show that the phase is sleeping out a rate window.
    pub fn waiting(&self, wait: Duration) {
        if self.showing {
            self.bar
                .set_message(format!("{} (waiting {}s for quota)", self.phase, wait.as_secs()));
        }
    }

    /// Back to the plain phase message after a wait.
    pub fn resume(&self) {
        if self.showing {
            self.bar.set_message(self.phase.clone());
        }
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }

    #[must_use]
    pub const fn is_showing(&self) -> bool {
        self.showing
    }

    /// Items counted so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_tracker_still_counts() {
        let tracker = ProgressTracker::hidden(3);
        tracker.inc(2);
        tracker.waiting(Duration::from_secs(61));
        tracker.resume();
        assert!(!tracker.is_showing());
        assert_eq!(tracker.position(), 2);
        tracker.finish_and_clear();
    }

    #[test]
    fn templates_parse() {
        assert!(ProgressStyle::default_bar().template(BAR_TEMPLATE).is_ok());
        assert!(
            ProgressStyle::default_spinner()
                .template(SPINNER_TEMPLATE)
                .is_ok()
        );
    }

    #[test]
    fn spinner_outside_terminal_is_quiet() {
        let tracker = ProgressTracker::new_spinner("Fetching destination contacts");
        tracker.inc(1);
        tracker.finish_and_clear();
    }
}
