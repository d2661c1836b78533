#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use mbguard_proxy::config::{self, BlockResponse};
use mbguard_proxy::policy::{PolicyDimension, PolicySnapshot};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
policy:
  rate_limit: { max_request: 10 } # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.proxy.block_response, BlockResponse::Exception);

    let policy = PolicySnapshot::compile(&cfg.policy).unwrap();
    assert!(policy.allowed.contains(0x03));
    assert!(policy.blocked.contains(0x08));
    assert!(policy.engineering_ips.is_empty());
}

#[test]
fn full_config_parses() {
    let ok = r#"
version: 1
proxy:
  listen: "127.0.0.1:1502"
  backend: "10.0.0.20:502"
  connect_timeout_ms: 1500
  response_timeout_ms: 5000
  block_response: silent
policy:
  allowed_function_codes: [1, "0x03", "0x05-0x06"]
  blocked_function_codes: ["0x08", 43]
  engineering_ips: ["10.0.0.5"]
  maintenance_windows:
    - { start: "22:00", end: "02:00" }
  rate_limit: { max_requests: 20, window_ms: 500 }
  replay: { window_ms: 2000, writes_only: true }
  alert_only: [rate_limit]
audit:
  buffer_capacity: 128
ops:
  listen: "127.0.0.1:9102"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.proxy.block_response, BlockResponse::Silent);
    assert_eq!(cfg.proxy.response_timeout_ms, Some(5000));

    let policy = PolicySnapshot::compile(&cfg.policy).unwrap();
    for fc in [0x01, 0x03, 0x05, 0x06] {
        assert!(policy.allowed.contains(fc), "fc {fc:#04x}");
    }
    assert!(!policy.allowed.contains(0x04));
    assert!(policy.blocked.contains(0x2B));
    assert_eq!(policy.rate_limit.max_requests, 20);
    assert!(policy.replay.writes_only);
    assert!(policy.is_alert_only(PolicyDimension::RateLimit));
    assert!(!policy.is_alert_only(PolicyDimension::Replay));
}

#[test]
fn overlapping_sets_are_rejected() {
    let bad = r#"
version: 1
policy:
  allowed_function_codes: [3, 8]
  blocked_function_codes: [8]
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("0x08"), "{err}");
}

#[test]
fn invalid_values_are_rejected() {
    let cases = [
        "version: 2\n",
        "version: 1\nproxy: { listen: \"not-an-addr\" }\n",
        "version: 1\nproxy: { exception_code: 0 }\n",
        "version: 1\nproxy: { response_timeout_ms: 5 }\n",
        "version: 1\npolicy: { rate_limit: { max_requests: 0 } }\n",
        "version: 1\npolicy: { engineering_ips: [\"10.0.0.300\"] }\n",
        "version: 1\npolicy: { allowed_function_codes: [\"0x80\"] }\n",
        "version: 1\npolicy: { maintenance_windows: [{ start: \"25:00\", end: \"01:00\" }] }\n",
        "version: 1\npolicy: { alert_only: [everything] }\n",
    ];
    for case in cases {
        let err = config::load_from_str(case).expect_err(case);
        assert_eq!(err.code().as_str(), "BAD_CONFIG", "{case}");
    }
}
