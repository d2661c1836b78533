//! Per connection-pair lifecycle.
//!
//! `Connecting -> Relaying -> Closing -> Closed`, with `Connecting -> Closed`
//! when the backend cannot be reached.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Notify;

use mbguard_core::protocol::Message;

use crate::policy::Decision;

const MAX_PENDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Relaying,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Relaying) | (Connecting, Closed) | (Relaying, Closing) | (Closing, Closed)
        )
    }
}

/// Why a relaying session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    BackendClosed,
    Shutdown,
}

impl SessionEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::BackendClosed => "backend_closed",
            SessionEnd::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Illegal transitions are ignored and reported.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::warn!(from = self.state.as_str(), to = next.as_str(), "illegal session transition");
            return false;
        }
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "session state");
        self.state = next;
        true
    }
}

/// Per-connection tallies, logged when the session closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnStats {
    pub requests: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub alerted: u64,
    pub responses: u64,
}

impl ConnStats {
    pub fn record(&mut self, decision: Decision) {
        self.requests += 1;
        match decision {
            Decision::Allow => self.allowed += 1,
            Decision::Block => self.blocked += 1,
            Decision::Alert => self.alerted += 1,
        }
    }
}

/// Forwarded requests still waiting for a backend reply, oldest first.
///
/// When the backend goes away each one is answered with a gateway exception
/// instead of leaving the client to time out.
#[derive(Debug, Default)]
pub struct PendingRequests {
    queue: Mutex<VecDeque<(Instant, Message)>>,
    pushed: Notify,
}

impl PendingRequests {
    pub fn push(&self, msg: &Message, sent: Instant) {
        if let Ok(mut q) = self.queue.lock() {
            if q.len() >= MAX_PENDING {
                q.pop_front();
            }
            q.push_back((sent, msg.clone()));
        }
        self.pushed.notify_one();
    }

    /// Retire the request a backend reply answers. Matched on transaction
    /// and unit id; unmatched replies are ignored.
    pub fn complete(&self, reply: &Message) -> bool {
        let Ok(mut q) = self.queue.lock() else {
            return false;
        };
        let found = q
            .iter()
            .position(|(_, m)| m.transaction_id == reply.transaction_id && m.unit_id == reply.unit_id);
        match found {
            Some(i) => q.remove(i).is_some(),
            None => false,
        }
    }

    /// When the oldest outstanding request was forwarded.
    pub fn oldest_sent(&self) -> Option<Instant> {
        self.queue.lock().ok().and_then(|q| q.front().map(|(t, _)| *t))
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Everything still outstanding, oldest first. Leaves the queue empty.
    pub fn take_all(&self) -> Vec<Message> {
        self.queue
            .lock()
            .map(|mut q| q.drain(..).map(|(_, m)| m).collect())
            .unwrap_or_default()
    }

    /// Resolves after the next `push`.
    pub async fn pushed(&self) {
        self.pushed.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tid: u16, unit: u8) -> Message {
        Message::build(tid, unit, 0x03, &[0, 0, 0, 1]).unwrap()
    }

    #[test]
    fn replies_retire_matching_requests_only() {
        let p = PendingRequests::default();
        let t0 = Instant::now();
        p.push(&req(1, 1), t0);
        p.push(&req(2, 1), t0);
        p.push(&req(2, 7), t0);

        assert!(p.complete(&req(2, 7)));
        assert!(!p.complete(&req(2, 7)));
        assert!(!p.complete(&req(9, 1)));
        assert_eq!(p.len(), 2);

        let left: Vec<u16> = p.take_all().iter().map(|m| m.transaction_id).collect();
        assert_eq!(left, vec![1, 2]);
        assert!(p.is_empty());
        assert_eq!(p.oldest_sent(), None);
    }

    #[test]
    fn pending_is_bounded_oldest_first() {
        let p = PendingRequests::default();
        let t0 = Instant::now();
        for tid in 0..(MAX_PENDING as u16 + 3) {
            p.push(&req(tid, 1), t0);
        }
        assert_eq!(p.len(), MAX_PENDING);
        assert_eq!(p.take_all()[0].transaction_id, 3);
    }

    #[test]
    fn happy_path() {
        let mut s = SessionLifecycle::new();
        assert!(s.advance(SessionState::Relaying));
        assert!(s.advance(SessionState::Closing));
        assert!(s.advance(SessionState::Closed));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn unreachable_backend_skips_relaying() {
        let mut s = SessionLifecycle::new();
        assert!(s.advance(SessionState::Closed));
        assert!(!s.advance(SessionState::Relaying));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn cannot_jump_from_relaying_to_closed() {
        let mut s = SessionLifecycle::new();
        s.advance(SessionState::Relaying);
        assert!(!s.advance(SessionState::Closed));
        assert_eq!(s.state(), SessionState::Relaying);
    }

    #[test]
    fn stats_count_each_decision() {
        let mut st = ConnStats::default();
        st.record(Decision::Allow);
        st.record(Decision::Block);
        st.record(Decision::Block);
        st.record(Decision::Alert);
        assert_eq!(st, ConnStats { requests: 4, allowed: 1, blocked: 2, alerted: 1, responses: 0 });
    }
}
