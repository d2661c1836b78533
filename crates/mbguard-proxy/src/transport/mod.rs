//! Transport layer (Modbus TCP relay).
//!
//! `listener` accepts client connections and supervises one task per
//! connection; `relay` drives a client/backend socket pair through the
//! framer and policy engine; `session` holds the per-pair lifecycle.

pub mod listener;
pub mod relay;
pub mod session;

pub use listener::ProxyServer;
pub use session::{SessionEnd, SessionState};
