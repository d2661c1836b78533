//! Framer vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use mbguard_core::protocol::Framer;
use mbguard_core::MbGuardError;

use vector_loader::load;

#[test]
fn frame_vectors() {
    let files = [
        "fc03_read_holding.json",
        "fc06_write_single.json",
        "fc16_write_multiple.json",
        "exception_reply.json",
        "bad_protocol_id.json",
        "length_zero.json",
        "length_one.json",
        "length_oversized.json",
        "truncated_body.json",
        "header_only_prefix.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();

        let mut framer = Framer::new();
        let out: Vec<_> = framer.feed(&raw).collect();

        if v.expect_pending {
            assert!(out.is_empty(), "vector={}", v.description);
            assert_eq!(framer.buffered(), raw.len(), "vector={}", v.description);
            continue;
        }

        if let Some(err) = v.expect_error {
            assert_eq!(out.len(), 1, "vector={}", v.description);
            let e = out.into_iter().next().unwrap().expect_err("expected error");
            assert_eq!(e.kind(), err.kind, "vector={}", v.description);
            assert_eq!(MbGuardError::from(e).code().as_str(), err.code, "vector={}", v.description);
            assert!(framer.is_poisoned(), "vector={}", v.description);
            continue;
        }

        assert_eq!(out.len(), 1, "vector={}", v.description);
        let msg = out.into_iter().next().unwrap().expect("expected ok frame");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(msg.transaction_id as u64, ex["transaction_id"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(msg.unit_id as u64, ex["unit_id"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(msg.function_code as u64, ex["function_code"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(msg.raw_length as u64, ex["raw_length"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(msg.payload.len() as u64, ex["payload_len"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(msg.is_exception(), ex["exception"].as_bool().unwrap_or(false), "vector={}", v.description);
        assert_eq!(&msg.raw[..], &raw[..], "raw bytes must be preserved, vector={}", v.description);
        assert_eq!(framer.buffered(), 0, "vector={}", v.description);
    }
}
