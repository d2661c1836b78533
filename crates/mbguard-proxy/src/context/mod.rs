//! Connection context types shared across layers.
//!
//! Source identity is the key for every piece of per-source policy state.

pub mod source;

pub use source::{ConnectionIds, SourceIdentity};
