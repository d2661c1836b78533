//! mbguard core: transport-agnostic Modbus TCP primitives and error types.
//!
//! This crate defines the message model, the stream framer, and the function
//! code catalogue shared by the proxy and its tooling. It carries no async runtime
//! dependency so the same parser can back the relay, fuzzers, and offline
//! capture analysis.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Every fallible path surfaces as `FrameError`/`MbGuardError` so hostile
//! byte streams can never take the process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, FrameError, MbGuardError, Result};
