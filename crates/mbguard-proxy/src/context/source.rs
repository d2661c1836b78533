use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Who sent a message.
///
/// `ip` keys rate and replay state, so that state outlives the connection:
/// reconnecting does not reset an attacker's counters. `connection_id` only
/// distinguishes sessions in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceIdentity {
    pub ip: IpAddr,
    pub connection_id: u64,
}

impl SourceIdentity {
    pub fn new(ip: IpAddr, connection_id: u64) -> Self {
        Self { ip, connection_id }
    }
}

/// Monotonic connection id allocator.
#[derive(Debug)]
pub struct ConnectionIds {
    next: AtomicU64,
}

impl Default for ConnectionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
