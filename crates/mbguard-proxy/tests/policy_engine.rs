#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use mbguard_core::protocol::{function, Message};
use mbguard_proxy::config;
use mbguard_proxy::context::SourceIdentity;
use mbguard_proxy::policy::{Decision, EvalTime, PolicyDimension, PolicyEngine, PolicySnapshot, ReasonCode};

const ENGINEERING: &str = "10.0.0.5";
const HMI: &str = "10.0.0.9";

fn policy(yaml_policy: &str) -> PolicySnapshot {
    let cfg = config::load_from_str(&format!("version: 1\npolicy:\n{yaml_policy}")).expect("config");
    PolicySnapshot::compile(&cfg.policy).expect("compile")
}

fn source(ip: &str, conn: u64) -> SourceIdentity {
    SourceIdentity::new(ip.parse::<IpAddr>().unwrap(), conn)
}

/// Monday 2026-01-05 at the given UTC time.
fn at(h: u32, m: u32) -> EvalTime {
    EvalTime::at(Instant::now(), Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap())
}

fn read(tid: u16) -> Message {
    Message::build(tid, 1, function::READ_HOLDING_REGISTERS, &[0x00, 0x00, 0x00, 0x0A]).unwrap()
}

fn write(tid: u16) -> Message {
    Message::build(tid, 1, function::WRITE_SINGLE_REGISTER, &[0x00, 0x01, 0x00, 0x03]).unwrap()
}

const GATED: &str = r#"
  engineering_ips: ["10.0.0.5"]
  maintenance_windows: [{ start: "02:00", end: "04:00" }]
"#;

#[test]
fn unknown_function_fails_closed() {
    let p = policy("  allowed_function_codes: [3]\n");
    let engine = PolicyEngine::new();
    let msg = Message::build(1, 1, function::REPORT_SERVER_ID, &[]).unwrap();

    let r = engine.evaluate(&p, &msg, &source(HMI, 1), &at(12, 0));
    assert_eq!(r.decision, Decision::Block);
    assert_eq!(r.reason, ReasonCode::UnknownFunction);
    assert_eq!(r.dimension, Some(PolicyDimension::FunctionCode));
}

#[test]
fn blacklist_wins_over_everything() {
    let p = policy(GATED);
    let engine = PolicyEngine::new();
    let msg = Message::build(1, 1, function::DIAGNOSTICS, &[0x00, 0x00]).unwrap();

    // Even an engineering source inside the window.
    let r = engine.evaluate(&p, &msg, &source(ENGINEERING, 1), &at(3, 0));
    assert_eq!(r.decision, Decision::Block);
    assert_eq!(r.reason, ReasonCode::BlacklistedFunction);
}

#[test]
fn reads_are_allowed_without_gating() {
    let p = policy(GATED);
    let engine = PolicyEngine::new();

    let r = engine.evaluate(&p, &read(1), &source(HMI, 1), &at(12, 0));
    assert_eq!(r.decision, Decision::Allow);
    assert_eq!(r.reason, ReasonCode::Allowed);
    assert_eq!(r.dimension, None);
    assert_eq!(r.message.function_name, "Read Holding Registers");
}

#[test]
fn writes_need_engineering_source_and_open_window() {
    let p = policy(GATED);
    let engine = PolicyEngine::new();

    let cases = [
        (ENGINEERING, at(3, 0), Decision::Allow),
        (ENGINEERING, at(2, 0), Decision::Allow),
        (ENGINEERING, at(4, 0), Decision::Allow),
        (ENGINEERING, at(4, 1), Decision::Block),
        (ENGINEERING, at(12, 0), Decision::Block),
        (HMI, at(3, 0), Decision::Block),
    ];
    for (i, (ip, now, expected)) in cases.into_iter().enumerate() {
        let r = engine.evaluate(&p, &write(i as u16 + 1), &source(ip, 1), &now);
        assert_eq!(r.decision, expected, "case {i}");
        if expected == Decision::Block {
            assert_eq!(r.reason, ReasonCode::WriteOutsidePolicy, "case {i}");
        }
    }
}

#[test]
fn rate_limit_boundary_and_recovery() {
    let p = policy("  rate_limit: { max_requests: 3, window_ms: 1000 }\n");
    let engine = PolicyEngine::new();
    let src = source(HMI, 1);
    let t0 = at(12, 0);

    for tid in 1..=3 {
        let r = engine.evaluate(&p, &read(tid), &src, &t0);
        assert_eq!(r.decision, Decision::Allow, "tid {tid}");
    }
    let r = engine.evaluate(&p, &read(4), &src, &t0);
    assert_eq!(r.decision, Decision::Block);
    assert_eq!(r.reason, ReasonCode::RateExceeded);

    let later = t0.advanced(Duration::from_millis(1000));
    let r = engine.evaluate(&p, &read(5), &src, &later);
    assert_eq!(r.decision, Decision::Allow);
}

#[test]
fn rate_state_is_shared_across_connections_of_one_ip() {
    let p = policy("  rate_limit: { max_requests: 2, window_ms: 1000 }\n");
    let engine = PolicyEngine::new();
    let now = at(12, 0);

    assert_eq!(engine.evaluate(&p, &read(1), &source(HMI, 1), &now).decision, Decision::Allow);
    assert_eq!(engine.evaluate(&p, &read(2), &source(HMI, 2), &now).decision, Decision::Allow);
    assert_eq!(engine.evaluate(&p, &read(3), &source(HMI, 3), &now).decision, Decision::Block);

    // A different IP has its own budget.
    assert_eq!(engine.evaluate(&p, &read(4), &source(ENGINEERING, 4), &now).decision, Decision::Allow);
    assert_eq!(engine.tracked_sources(), 2);
}

#[test]
fn parallel_evaluations_from_one_ip_never_exceed_the_limit() {
    let p = policy("  rate_limit: { max_requests: 5, window_ms: 60000 }\n");
    let engine = PolicyEngine::new();
    let now = at(12, 0);

    let allowed: usize = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4u16)
            .map(|w| {
                let (p, engine) = (&p, &engine);
                s.spawn(move || {
                    (0..3u16)
                        .filter(|i| {
                            let src = source(HMI, u64::from(w) + 1);
                            let r = engine.evaluate(p, &read(w * 10 + i), &src, &now);
                            r.decision == Decision::Allow
                        })
                        .count()
                })
            })
            .collect();
        workers.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(allowed, 5);
}

#[test]
fn replay_within_window_then_expiry() {
    let p = policy("  replay: { window_ms: 500 }\n");
    let engine = PolicyEngine::new();
    let src = source(HMI, 1);
    let t0 = at(12, 0);

    assert_eq!(engine.evaluate(&p, &read(7), &src, &t0).decision, Decision::Allow);

    let r = engine.evaluate(&p, &read(7), &src, &t0.advanced(Duration::from_millis(100)));
    assert_eq!(r.decision, Decision::Block);
    assert_eq!(r.reason, ReasonCode::ReplayDetected);

    // Same tid, different payload: not a replay.
    let other = Message::build(7, 1, function::READ_HOLDING_REGISTERS, &[0x00, 0x10, 0x00, 0x01]).unwrap();
    let r = engine.evaluate(&p, &other, &src, &t0.advanced(Duration::from_millis(150)));
    assert_eq!(r.decision, Decision::Allow);

    let r = engine.evaluate(&p, &read(7), &src, &t0.advanced(Duration::from_millis(600)));
    assert_eq!(r.decision, Decision::Allow);
}

#[test]
fn writes_only_replay_ignores_reads() {
    let p = policy("  replay: { window_ms: 500, writes_only: true }\n");
    let engine = PolicyEngine::new();
    let src = source(HMI, 1);
    let now = at(12, 0);

    assert_eq!(engine.evaluate(&p, &read(7), &src, &now).decision, Decision::Allow);
    assert_eq!(engine.evaluate(&p, &read(7), &src, &now).decision, Decision::Allow);
}

#[test]
fn alert_only_dimension_forwards_but_flags() {
    let p = policy("  rate_limit: { max_requests: 1, window_ms: 1000 }\n  alert_only: [rate_limit]\n");
    let engine = PolicyEngine::new();
    let src = source(HMI, 1);
    let now = at(12, 0);

    assert_eq!(engine.evaluate(&p, &read(1), &src, &now).decision, Decision::Allow);
    let r = engine.evaluate(&p, &read(2), &src, &now);
    assert_eq!(r.decision, Decision::Alert);
    assert!(r.decision.forwards());
    assert_eq!(r.reason, ReasonCode::RateExceeded);
    assert_eq!(r.dimension, Some(PolicyDimension::RateLimit));
}

#[test]
fn enforced_violation_overrides_earlier_alert() {
    let p = policy(
        "  rate_limit: { max_requests: 1, window_ms: 1000 }\n  replay: { window_ms: 1000 }\n  alert_only: [rate_limit]\n",
    );
    let engine = PolicyEngine::new();
    let src = source(HMI, 1);
    let now = at(12, 0);

    assert_eq!(engine.evaluate(&p, &read(1), &src, &now).decision, Decision::Allow);
    let r = engine.evaluate(&p, &read(1), &src, &now);
    assert_eq!(r.decision, Decision::Block);
    assert_eq!(r.reason, ReasonCode::ReplayDetected);
}

#[test]
fn idle_sources_are_evicted_past_the_cap() {
    let p = policy("  max_tracked_sources: 2\n  rate_limit: { max_requests: 10, window_ms: 100 }\n  replay: { window_ms: 100 }\n");
    let engine = PolicyEngine::new();
    let t0 = at(12, 0);

    engine.evaluate(&p, &read(1), &source("10.0.1.1", 1), &t0);
    engine.evaluate(&p, &read(1), &source("10.0.1.2", 2), &t0);
    assert_eq!(engine.tracked_sources(), 2);

    // Both earlier sources have gone idle by the time a third arrives.
    let later = t0.advanced(Duration::from_millis(500));
    engine.evaluate(&p, &read(1), &source("10.0.1.3", 3), &later);
    assert_eq!(engine.tracked_sources(), 1);
}
