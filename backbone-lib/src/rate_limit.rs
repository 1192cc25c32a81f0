//! Per-sender sliding-window rate limiting: at most 30 messages per rolling
//! second, independent per sender.

use std::collections::{HashMap, VecDeque};

const WINDOW_SECONDS: f64 = 1.0;
const MAX_PER_WINDOW: usize = 30;

/// Tracks recent message timestamps per sender and rejects bursts above the
/// configured ceiling. Driven by caller-supplied timestamps (milliseconds
/// since epoch, the same unit carried on every [`protocol::Envelope`]) so it
/// never touches the wall clock itself.
#[derive(Default)]
pub struct RateLimiter {
    recent: HashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }

    /// Records one message from `sender` at `timestamp_ms` and returns
    /// `true` if it is within the limit, `false` if it should be dropped.
    pub fn check(&mut self, sender: &str, timestamp_ms: u64) -> bool {
        let window = self
            .recent
            .entry(sender.to_string())
            .or_insert_with(VecDeque::new);

        let window_start = timestamp_ms.saturating_sub((WINDOW_SECONDS * 1000.0) as u64);
        while matches!(window.front(), Some(&t) if t < window_start) {
            window.pop_front();
        }

        if window.len() >= MAX_PER_WINDOW {
            return false;
        }
        window.push_back(timestamp_ms);
        true
    }

    pub fn forget(&mut self, sender: &str) {
        self.recent.remove(sender);
    }
}
