//! Collapses identical inputs submitted in quick succession.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct InputDebouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl InputDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns `false` when `text` repeats the previous input within the
    /// window. Different text always passes and becomes the new reference.
    pub fn admit(&mut self, text: &str, now: Instant) -> bool {
        let text = text.trim();
        if let Some((previous, at)) = &self.last {
            if previous == text && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((text.to_string(), now));
        true
    }
}
