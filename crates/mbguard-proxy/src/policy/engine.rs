use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use mbguard_core::protocol::Message;

use crate::audit::DecisionRecord;
use crate::context::SourceIdentity;

use super::checks::{CheckCtx, PolicyCheck, Verdict, STANDARD_CHAIN};
use super::decision::{Decision, Outcome};
use super::rate::RateWindow;
use super::replay::ReplayHistory;
use super::snapshot::PolicySnapshot;

/// Evaluation instant: monotonic time for windows, wall time for schedules
/// and the audit trail.
#[derive(Debug, Clone, Copy)]
pub struct EvalTime {
    pub mono: Instant,
    pub wall: DateTime<Utc>,
}

impl EvalTime {
    pub fn now() -> Self {
        Self {
            mono: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn at(mono: Instant, wall: DateTime<Utc>) -> Self {
        Self { mono, wall }
    }

    /// The same clock `d` later.
    pub fn advanced(self, d: Duration) -> Self {
        let wall = chrono::Duration::from_std(d)
            .ok()
            .and_then(|cd| self.wall.checked_add_signed(cd))
            .unwrap_or(self.wall);
        Self {
            mono: self.mono + d,
            wall,
        }
    }
}

/// Mutable state kept per source IP, shared by all its connections.
#[derive(Debug, Default)]
pub struct SourceState {
    pub rate: RateWindow,
    pub replay: ReplayHistory,
}

impl SourceState {
    fn is_idle(&mut self, policy: &PolicySnapshot, now: Instant) -> bool {
        self.rate.is_idle(now, &policy.rate_limit) && self.replay.is_idle(now, &policy.replay)
    }
}

/// Policy engine: the check chain plus per-source state.
///
/// The per-source map is the single synchronization point. A source's entry
/// stays locked for the whole chain, so parallel sockets from one IP are
/// evaluated one at a time and cannot race past the rate limiter.
///
/// Past `max_tracked_sources`, idle sources are swept at most once per
/// policy window; a sweep write-locks every shard.
pub struct PolicyEngine {
    sources: DashMap<IpAddr, SourceState>,
    chain: Vec<&'static dyn PolicyCheck>,
    last_sweep: Mutex<Option<Instant>>,
    sweeps: AtomicU64,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::with_chain(STANDARD_CHAIN.to_vec())
    }

    pub fn with_chain(chain: Vec<&'static dyn PolicyCheck>) -> Self {
        Self {
            sources: DashMap::new(),
            chain,
            last_sweep: Mutex::new(None),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Classify one message. Always returns a record, Allow included.
    pub fn evaluate(
        &self,
        policy: &PolicySnapshot,
        msg: &Message,
        source: &SourceIdentity,
        now: &EvalTime,
    ) -> DecisionRecord {
        let outcome = {
            let mut entry = self.sources.entry(source.ip).or_default();
            let mut ctx = CheckCtx {
                policy,
                msg,
                source,
                now,
                state: entry.value_mut(),
            };
            self.run_chain(&mut ctx)
        };

        self.maybe_sweep(policy, now.mono);

        DecisionRecord::new(now.wall, *source, msg, outcome)
    }

    fn run_chain(&self, ctx: &mut CheckCtx<'_>) -> Outcome {
        let mut alert: Option<Outcome> = None;
        for check in &self.chain {
            let Verdict::Violation(reason) = check.check(ctx) else {
                continue;
            };
            let dimension = check.dimension();
            let decision = if ctx.policy.is_alert_only(dimension) {
                Decision::Alert
            } else {
                Decision::Block
            };
            let outcome = Outcome {
                decision,
                reason,
                dimension: Some(dimension),
            };
            if decision == Decision::Block {
                return outcome;
            }
            alert.get_or_insert(outcome);
        }
        alert.unwrap_or_else(Outcome::allow)
    }

    fn maybe_sweep(&self, policy: &PolicySnapshot, now: Instant) {
        if self.sources.len() <= policy.max_tracked_sources {
            return;
        }
        // Another evaluation is already deciding; skip rather than queue.
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        let interval = policy.rate_limit.window.max(policy.replay.window);
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < interval {
                return;
            }
        }
        *last = Some(now);
        drop(last);

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let evicted = self.evict_idle(policy, now);
        tracing::debug!(evicted, tracked = self.sources.len(), "idle policy sources swept");
    }

    /// Idle-source sweeps run since startup.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Number of source IPs with live state.
    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }

    /// Drop sources whose rate and replay windows have fully expired.
    pub fn evict_idle(&self, policy: &PolicySnapshot, now: Instant) -> usize {
        let before = self.sources.len();
        self.sources.retain(|_, state| !state.is_idle(policy, now));
        before.saturating_sub(self.sources.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::config::PolicyConfig;

    fn policy(cap: usize) -> PolicySnapshot {
        let mut cfg = PolicyConfig::default();
        cfg.max_tracked_sources = cap;
        cfg.rate_limit.window_ms = 1000;
        cfg.replay.window_ms = 1000;
        PolicySnapshot::compile(&cfg).unwrap()
    }

    fn read(tid: u16) -> Message {
        Message::build(tid, 1, 0x03, &[0, 0, 0, 1]).unwrap()
    }

    fn src(last_octet: u8) -> SourceIdentity {
        SourceIdentity::new(IpAddr::from([10, 0, 2, last_octet]), u64::from(last_octet))
    }

    #[test]
    fn sweep_over_cap_runs_once_per_window() {
        let p = policy(1);
        let engine = PolicyEngine::new();
        let t0 = EvalTime::at(Instant::now(), Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap());

        engine.evaluate(&p, &read(1), &src(1), &t0);
        engine.evaluate(&p, &read(1), &src(2), &t0);
        assert_eq!(engine.sweeps(), 1);

        // Still over the cap with every source active: no rescans.
        for i in 0..50u16 {
            let now = t0.advanced(Duration::from_millis(u64::from(i) * 10));
            engine.evaluate(&p, &read(100 + i), &src(3 + (i % 3) as u8), &now);
        }
        assert_eq!(engine.sweeps(), 1);
        assert_eq!(engine.tracked_sources(), 5);

        // One window on, the next evaluation sweeps again and drops the idle ones.
        let later = t0.advanced(Duration::from_millis(2000));
        engine.evaluate(&p, &read(1), &src(9), &later);
        assert_eq!(engine.sweeps(), 2);
        assert_eq!(engine.tracked_sources(), 1);
    }
}
