//! Policy layer (function codes, write gating, rate limiting, replay).
//!
//! `PolicySnapshot` is the immutable, compiled form of the policy config.
//! `PolicyEngine` owns the per-source mutable state and runs the ordered
//! check chain over a snapshot.

pub mod checks;
pub mod decision;
pub mod engine;
pub mod function_set;
pub mod rate;
pub mod replay;
pub mod schedule;
pub mod snapshot;

pub use decision::{Decision, Outcome, PolicyDimension, ReasonCode};
pub use engine::{EvalTime, PolicyEngine};
pub use snapshot::{PolicySnapshot, RateLimit, ReplayPolicy};
