//! Modbus TCP protocol modules.
//!
//! - `mbap`: the application data unit (MBAP header + PDU) and builders.
//! - `framer`: stream reassembly over TCP, which does not preserve message
//!   boundaries.
//! - `function`: function code catalogue and read/write classification.
//!
//! All parsers are panic-free: malformed input is reported as `FrameError`
//! instead of panicking or indexing raw buffers.

pub mod framer;
pub mod function;
pub mod mbap;

pub use framer::{Frames, Framer};
pub use mbap::Message;
