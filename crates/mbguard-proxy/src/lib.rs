//! mbguard proxy library entry.
//!
//! This crate wires the policy engine, the relay core, the audit pipeline,
//! and operational endpoints into an inline Modbus TCP firewall. It is
//! consumed by the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod audit;
pub mod config;
pub mod context;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod router;
pub mod transport;
