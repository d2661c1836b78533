//! Shared application state for the proxy.
//!
//! Holds the current policy snapshot (atomically replaceable), the policy
//! engine with its per-source state, the audit pipeline, metrics, and the
//! process-wide shutdown signal. Cloning is cheap (`Arc`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use mbguard_core::error::Result;

use crate::audit::AuditPipeline;
use crate::config::{BlockResponse, MbGuardConfig, ProxySection};
use crate::context::ConnectionIds;
use crate::obs::ProxyMetrics;
use crate::policy::{PolicyEngine, PolicySnapshot};

/// Relay behaviour fixed at startup.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub backend: String,
    pub connect_timeout: Duration,
    pub response_timeout: Option<Duration>,
    pub block_response: BlockResponse,
    pub exception_code: u8,
}

impl RelaySettings {
    pub fn from_config(proxy: &ProxySection) -> Self {
        Self {
            backend: proxy.backend.clone(),
            connect_timeout: Duration::from_millis(proxy.connect_timeout_ms),
            response_timeout: proxy.response_timeout_ms.map(Duration::from_millis),
            block_response: proxy.block_response,
            exception_code: proxy.exception_code,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    relay: RelaySettings,
    policy_tx: watch::Sender<Arc<PolicySnapshot>>,
    engine: PolicyEngine,
    audit: Arc<AuditPipeline>,
    metrics: ProxyMetrics,
    conn_ids: ConnectionIds,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(relay: RelaySettings, policy: PolicySnapshot, audit: Arc<AuditPipeline>) -> Self {
        let (policy_tx, _) = watch::channel(Arc::new(policy));
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(AppStateInner {
                relay,
                policy_tx,
                engine: PolicyEngine::new(),
                audit,
                metrics: ProxyMetrics::default(),
                conn_ids: ConnectionIds::new(),
                shutdown,
            }),
        }
    }

    /// Build state from a validated config file.
    pub fn from_config(cfg: &MbGuardConfig) -> Result<Self> {
        let policy = PolicySnapshot::compile(&cfg.policy)?;
        let audit = AuditPipeline::new(cfg.audit.buffer_capacity, cfg.audit.recent_capacity);
        Ok(Self::new(RelaySettings::from_config(&cfg.proxy), policy, audit))
    }

    pub fn relay_settings(&self) -> &RelaySettings {
        &self.inner.relay
    }

    /// Current policy snapshot. Sessions take one at connect time and keep it.
    pub fn policy(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&*self.inner.policy_tx.borrow())
    }

    /// Swap in a new snapshot. Running evaluations keep the one they hold.
    pub fn replace_policy(&self, snapshot: PolicySnapshot) {
        tracing::info!(policy = %snapshot.summary(), "policy snapshot replaced");
        self.inner.policy_tx.send_replace(Arc::new(snapshot));
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.inner.engine
    }

    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.inner.audit
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.inner.metrics
    }

    pub fn next_connection_id(&self) -> u64 {
        self.inner.conn_ids.next()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.inner.shutdown.subscribe()
    }

    /// Stop accepting, cancel every session, flush audit.
    pub fn shutdown(&self) {
        self.inner.metrics.set_draining();
        let _ = self.inner.shutdown.send(());
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    /// Values owned outside the metrics registry, rendered alongside it.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("mbguard_audit_dropped_total", self.inner.audit.dropped()),
            ("mbguard_audit_pending", self.inner.audit.pending() as u64),
            ("mbguard_policy_sources_tracked", self.inner.engine.tracked_sources() as u64),
            ("mbguard_policy_source_sweeps_total", self.inner.engine.sweeps()),
        ]
    }
}
