//! Per-source sliding-window rate limiter.
//!
//! Keeps the instants of admitted requests still inside the window. A hit
//! counts while `now - t < window`; older entries are pruned lazily on each
//! call. Only admitted requests are stored, so the log never exceeds
//! `max_requests` entries.

use std::collections::VecDeque;
use std::time::Instant;

use super::snapshot::RateLimit;

#[derive(Debug, Default)]
pub struct RateWindow {
    hits: VecDeque<Instant>,
}

impl RateWindow {
    /// Record a request at `now`. Returns `false` when the source already
    /// used its budget for the current window.
    pub fn try_admit(&mut self, now: Instant, limit: &RateLimit) -> bool {
        self.prune(now, limit);
        if self.hits.len() >= limit.max_requests as usize {
            return false;
        }
        self.hits.push_back(now);
        true
    }

    /// Requests currently counted against the window.
    pub fn in_window(&mut self, now: Instant, limit: &RateLimit) -> usize {
        self.prune(now, limit);
        self.hits.len()
    }

    pub fn is_idle(&mut self, now: Instant, limit: &RateLimit) -> bool {
        self.in_window(now, limit) == 0
    }

    fn prune(&mut self, now: Instant, limit: &RateLimit) {
        while let Some(front) = self.hits.front() {
            if now.saturating_duration_since(*front) >= limit.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}
