//! Audit trail.
//!
//! Every policy decision becomes an immutable `DecisionRecord`. The relay
//! hands records to the `AuditPipeline` without waiting; a background task
//! drains the pipeline into an `AuditSink`. When the sink stalls, the
//! pipeline buffers up to its capacity and then drops oldest-first, counting
//! every loss. Client traffic never waits on the sink.

pub mod pipeline;
pub mod record;
pub mod sink;

pub use pipeline::AuditPipeline;
pub use record::{DecisionRecord, MessageSummary};
pub use sink::{AuditSink, ChannelSink, TracingSink};
