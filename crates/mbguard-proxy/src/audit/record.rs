use chrono::{DateTime, Utc};
use serde::Serialize;

use mbguard_core::protocol::{function, Message};

use crate::context::SourceIdentity;
use crate::policy::{Decision, Outcome, PolicyDimension, ReasonCode};

/// What was decided about, without the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub function_name: &'static str,
    pub payload_len: usize,
}

impl MessageSummary {
    pub fn of(msg: &Message) -> Self {
        Self {
            transaction_id: msg.transaction_id,
            unit_id: msg.unit_id,
            function_code: msg.function_code,
            function_name: function::name(msg.function_code),
            payload_len: msg.payload.len(),
        }
    }
}

/// One policy decision. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub source: SourceIdentity,
    pub message: MessageSummary,
    pub decision: Decision,
    pub reason: ReasonCode,
    pub dimension: Option<PolicyDimension>,
}

impl DecisionRecord {
    pub fn new(timestamp: DateTime<Utc>, source: SourceIdentity, msg: &Message, outcome: Outcome) -> Self {
        Self {
            timestamp,
            source,
            message: MessageSummary::of(msg),
            decision: outcome.decision,
            reason: outcome.reason,
            dimension: outcome.dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_for_the_decisions_endpoint() {
        let msg = Message::build(0x0102, 3, function::WRITE_SINGLE_REGISTER, &[0, 1, 0, 3]).unwrap();
        let source = SourceIdentity::new("10.0.0.9".parse().unwrap(), 42);
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let outcome = Outcome {
            decision: Decision::Block,
            reason: ReasonCode::WriteOutsidePolicy,
            dimension: Some(PolicyDimension::WriteGate),
        };

        let v = serde_json::to_value(DecisionRecord::new(ts, source, &msg, outcome)).unwrap();
        assert_eq!(v["decision"], "BLOCK");
        assert_eq!(v["reason"], "write_outside_policy");
        assert_eq!(v["dimension"], "write_gate");
        assert_eq!(v["source"]["ip"], "10.0.0.9");
        assert_eq!(v["source"]["connection_id"], 42);
        assert_eq!(v["message"]["transaction_id"], 0x0102);
        assert_eq!(v["message"]["function_name"], "Write Single Register");
        assert_eq!(v["message"]["payload_len"], 4);
        assert_eq!(v["timestamp"], "2026-01-05T12:00:00Z");
    }
}
