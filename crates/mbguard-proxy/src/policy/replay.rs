//! Per-source replay history.
//!
//! Remembers `(unit_id, transaction_id, function_code, sha256(payload))` of
//! recently evaluated requests. A request whose key is still inside the
//! window is a replay. Replays do not refresh the original entry, so a
//! captured message becomes usable again once its first sighting expires.
//! The history is capped at `max_entries`, oldest evicted first.

use std::collections::VecDeque;
use std::time::Instant;

use sha2::{Digest, Sha256};

use mbguard_core::protocol::Message;

use super::snapshot::ReplayPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayKey {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub function_code: u8,
    pub payload_digest: [u8; 32],
}

impl ReplayKey {
    pub fn of(msg: &Message) -> Self {
        Self {
            unit_id: msg.unit_id,
            transaction_id: msg.transaction_id,
            function_code: msg.function_code,
            payload_digest: Sha256::digest(&msg.payload).into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReplayHistory {
    seen: VecDeque<(Instant, ReplayKey)>,
}

impl ReplayHistory {
    /// Returns `true` if `key` was seen within the window; otherwise records
    /// it and returns `false`.
    pub fn check_and_record(&mut self, now: Instant, key: ReplayKey, policy: &ReplayPolicy) -> bool {
        self.prune(now, policy);
        if self.seen.iter().any(|(_, k)| *k == key) {
            return true;
        }
        self.seen.push_back((now, key));
        while self.seen.len() > policy.max_entries {
            self.seen.pop_front();
        }
        false
    }

    pub fn is_idle(&mut self, now: Instant, policy: &ReplayPolicy) -> bool {
        self.prune(now, policy);
        self.seen.is_empty()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn prune(&mut self, now: Instant, policy: &ReplayPolicy) {
        while let Some((t, _)) = self.seen.front() {
            if now.saturating_duration_since(*t) >= policy.window {
                self.seen.pop_front();
            } else {
                break;
            }
        }
    }
}
