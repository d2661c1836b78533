//! Top-level facade crate for mbguard.
//!
//! Re-exports the protocol core and the proxy library so users can depend on a single crate.

pub mod core {
    pub use mbguard_core::*;
}

pub mod proxy {
    pub use mbguard_proxy::*;
}
