//! Metrics registry for the proxy.
//!
//! Counter, gauge and histogram types with dynamic labels backed by
//! `DashMap`. Label sets are flattened into sorted key vectors to keep
//! deterministic ordering. Histogram buckets are fixed in microseconds.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self.map.entry(label_key(labels)).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Value for an exact label set (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum over every label set.
    pub fn total(&self) -> u64 {
        self.map.iter().map(|r| r.value().load(Ordering::Relaxed)).sum()
    }

    /// Sum grouped by one label's value, restricted to series where
    /// `filter` matches.
    pub fn sum_by(&self, label: &str, filter: (&str, &str)) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for r in self.map.iter() {
            let key = r.key();
            if !key.iter().any(|(k, v)| k == filter.0 && v == filter.1) {
                continue;
            }
            if let Some((_, v)) = key.iter().find(|(k, _)| k == label) {
                *out.entry(v.clone()).or_insert(0) += r.value().load(Ordering::Relaxed);
            }
        }
        out
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }
    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self.map.entry(label_key(labels)).or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

// 10us, 50us, 100us, 500us, 1ms, 5ms, 10ms
const BUCKETS_MICROS: [u64; 7] = [10, 50, 100, 500, 1_000, 5_000, 10_000];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 7],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Observe a duration (microsecond scale, cumulative buckets).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let micros = duration.as_micros() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let label_str = render_labels(r.key());
            let prefix = if label_str.is_empty() { String::new() } else { format!("{},", label_str) };

            for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, label_str, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, label_str, count);
        }
    }
}

/// Counters exposed for dashboards. Read-only to everyone but the relay.
#[derive(Default)]
pub struct ProxyMetrics {
    pub connections_total: CounterVec,
    pub connections_active: GaugeVec,
    pub messages_seen: CounterVec,
    pub decisions: CounterVec,
    pub frame_errors: CounterVec,
    pub backend_failures: CounterVec,
    pub policy_eval_duration: HistogramVec, // microseconds
    draining: AtomicBool,
}

/// JSON view of the counters, for `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub messages_seen: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub alerted: u64,
    pub blocked_by_reason: BTreeMap<String, u64>,
    pub frame_errors: u64,
    pub backend_failures: u64,
    pub connections_total: u64,
    pub connections_active: i64,
    pub audit_dropped: u64,
}

impl ProxyMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    fn decision_total(&self, decision: &str) -> u64 {
        self.decisions.sum_by("decision", ("decision", decision)).values().sum()
    }

    pub fn snapshot(&self, audit_dropped: u64) -> StatsSnapshot {
        StatsSnapshot {
            messages_seen: self.messages_seen.total(),
            allowed: self.decision_total("allow"),
            blocked: self.decision_total("block"),
            alerted: self.decision_total("alert"),
            blocked_by_reason: self.decisions.sum_by("reason", ("decision", "block")),
            frame_errors: self.frame_errors.total(),
            backend_failures: self.backend_failures.total(),
            connections_total: self.connections_total.total(),
            connections_active: self.connections_active.get(&[]),
            audit_dropped,
        }
    }

    /// Render all registered metrics plus any extra lines provided by callers.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.connections_total.render("mbguard_connections_total", &mut out);
        self.connections_active.render("mbguard_connections_active", &mut out);
        self.messages_seen.render("mbguard_messages_seen_total", &mut out);
        self.decisions.render("mbguard_decisions_total", &mut out);
        self.frame_errors.render("mbguard_frame_errors_total", &mut out);
        self.backend_failures.render("mbguard_backend_failures_total", &mut out);
        self.policy_eval_duration.render("mbguard_policy_eval_duration_micros", &mut out);

        let _ = writeln!(out, "# TYPE mbguard_draining gauge\nmbguard_draining {}", u8::from(self.is_draining()));
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}
