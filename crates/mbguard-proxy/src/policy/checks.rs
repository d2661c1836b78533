//! The ordered check chain.
//!
//! Each check looks at one policy dimension and either passes or names a
//! violation. The engine runs them in `STANDARD_CHAIN` order and stops at the
//! first enforced violation, so cheap stateless checks run before the ones
//! that touch per-source state.

use mbguard_core::protocol::function;
use mbguard_core::protocol::Message;

use crate::context::SourceIdentity;

use super::decision::{PolicyDimension, ReasonCode};
use super::engine::{EvalTime, SourceState};
use super::replay::ReplayKey;
use super::snapshot::PolicySnapshot;

/// Everything a check may look at, plus the source's mutable state.
pub struct CheckCtx<'a> {
    pub policy: &'a PolicySnapshot,
    pub msg: &'a Message,
    pub source: &'a SourceIdentity,
    pub now: &'a EvalTime,
    pub state: &'a mut SourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Violation(ReasonCode),
}

pub trait PolicyCheck: Send + Sync {
    fn dimension(&self) -> PolicyDimension;
    fn check(&self, ctx: &mut CheckCtx<'_>) -> Verdict;
}

/// Function-code classification: blacklist first, then fail-closed on
/// anything not explicitly allowed.
pub struct FunctionCodeCheck;

impl PolicyCheck for FunctionCodeCheck {
    fn dimension(&self) -> PolicyDimension {
        PolicyDimension::FunctionCode
    }

    fn check(&self, ctx: &mut CheckCtx<'_>) -> Verdict {
        let fc = ctx.msg.function_code;
        if ctx.policy.blocked.contains(fc) {
            return Verdict::Violation(ReasonCode::BlacklistedFunction);
        }
        if !ctx.policy.allowed.contains(fc) {
            return Verdict::Violation(ReasonCode::UnknownFunction);
        }
        Verdict::Pass
    }
}

/// Writes need a whitelisted engineering source AND an open maintenance window.
pub struct WriteGateCheck;

impl PolicyCheck for WriteGateCheck {
    fn dimension(&self) -> PolicyDimension {
        PolicyDimension::WriteGate
    }

    fn check(&self, ctx: &mut CheckCtx<'_>) -> Verdict {
        if !function::is_write(ctx.msg.function_code) {
            return Verdict::Pass;
        }
        let whitelisted = ctx.policy.engineering_ips.contains(&ctx.source.ip);
        if whitelisted && ctx.policy.maintenance.is_open(ctx.now.wall) {
            Verdict::Pass
        } else {
            Verdict::Violation(ReasonCode::WriteOutsidePolicy)
        }
    }
}

/// Sliding-window flood protection, applied to reads as well.
pub struct RateLimitCheck;

impl PolicyCheck for RateLimitCheck {
    fn dimension(&self) -> PolicyDimension {
        PolicyDimension::RateLimit
    }

    fn check(&self, ctx: &mut CheckCtx<'_>) -> Verdict {
        if ctx.state.rate.try_admit(ctx.now.mono, &ctx.policy.rate_limit) {
            Verdict::Pass
        } else {
            Verdict::Violation(ReasonCode::RateExceeded)
        }
    }
}

/// Duplicate `(unit, transaction, function, payload)` inside the window.
pub struct ReplayCheck;

impl PolicyCheck for ReplayCheck {
    fn dimension(&self) -> PolicyDimension {
        PolicyDimension::Replay
    }

    fn check(&self, ctx: &mut CheckCtx<'_>) -> Verdict {
        let replay = &ctx.policy.replay;
        if replay.writes_only && !function::is_write(ctx.msg.function_code) {
            return Verdict::Pass;
        }
        let key = ReplayKey::of(ctx.msg);
        if ctx.state.replay.check_and_record(ctx.now.mono, key, replay) {
            Verdict::Violation(ReasonCode::ReplayDetected)
        } else {
            Verdict::Pass
        }
    }
}

/// Evaluation order: function code, write gate, rate limit, replay.
pub static STANDARD_CHAIN: [&dyn PolicyCheck; 4] =
    [&FunctionCodeCheck, &WriteGateCheck, &RateLimitCheck, &ReplayCheck];
