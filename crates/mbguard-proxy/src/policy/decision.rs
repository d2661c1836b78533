use serde::{Deserialize, Serialize};

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// Forward.
    Allow,
    /// Do not forward.
    Block,
    /// Forward, but a monitor-only dimension was violated.
    Alert,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Block => "block",
            Decision::Alert => "alert",
        }
    }

    /// Whether the message goes to the backend.
    pub fn forwards(self) -> bool {
        !matches!(self, Decision::Block)
    }
}

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Allowed,
    BlacklistedFunction,
    UnknownFunction,
    WriteOutsidePolicy,
    RateExceeded,
    ReplayDetected,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Allowed => "allowed",
            ReasonCode::BlacklistedFunction => "blacklisted_function",
            ReasonCode::UnknownFunction => "unknown_function",
            ReasonCode::WriteOutsidePolicy => "write_outside_policy",
            ReasonCode::RateExceeded => "rate_exceeded",
            ReasonCode::ReplayDetected => "replay_detected",
        }
    }
}

/// Policy dimension a check belongs to. Framing validity is enforced by the
/// framer before the engine runs, so it has no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDimension {
    FunctionCode,
    WriteGate,
    RateLimit,
    Replay,
}

impl PolicyDimension {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyDimension::FunctionCode => "function_code",
            PolicyDimension::WriteGate => "write_gate",
            PolicyDimension::RateLimit => "rate_limit",
            PolicyDimension::Replay => "replay",
        }
    }
}

/// Result of running the check chain, before it is stamped into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub decision: Decision,
    pub reason: ReasonCode,
    pub dimension: Option<PolicyDimension>,
}

impl Outcome {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: ReasonCode::Allowed,
            dimension: None,
        }
    }
}
