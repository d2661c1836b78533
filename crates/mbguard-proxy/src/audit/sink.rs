//! Audit sinks: where drained decision records end up.

use async_trait::async_trait;
use tokio::sync::mpsc;

use mbguard_core::error::{MbGuardError, Result};

use crate::policy::Decision;

use super::record::DecisionRecord;

/// Durable destination for decision records.
///
/// `emit` may wait (bounded) for the destination to accept the record. An
/// `Err` means the record was not accepted; the pipeline keeps it and retries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, record: &DecisionRecord) -> Result<()>;
}

/// Writes each record as a structured `tracing` event on `mbguard::audit`.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn emit(&self, r: &DecisionRecord) -> Result<()> {
        let dimension = r.dimension.map(|d| d.as_str()).unwrap_or("-");
        match r.decision {
            Decision::Allow => tracing::info!(
                target: "mbguard::audit",
                decision = r.decision.as_str(),
                reason = r.reason.as_str(),
                dimension,
                ip = %r.source.ip,
                conn_id = r.source.connection_id,
                tid = r.message.transaction_id,
                unit = r.message.unit_id,
                fc = r.message.function_code,
                function = r.message.function_name,
                "decision"
            ),
            Decision::Block | Decision::Alert => tracing::warn!(
                target: "mbguard::audit",
                decision = r.decision.as_str(),
                reason = r.reason.as_str(),
                dimension,
                ip = %r.source.ip,
                conn_id = r.source.connection_id,
                tid = r.message.transaction_id,
                unit = r.message.unit_id,
                fc = r.message.function_code,
                function = r.message.function_name,
                "decision"
            ),
        }
        Ok(())
    }
}

/// Hands records to an external consumer over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DecisionRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DecisionRecord>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AuditSink for ChannelSink {
    async fn emit(&self, record: &DecisionRecord) -> Result<()> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| MbGuardError::Internal("audit channel closed".into()))
    }
}
