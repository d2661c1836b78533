//! Compiled, immutable policy.
//!
//! Built once from `PolicyConfig` and shared via `Arc`. Live reconfiguration
//! swaps the whole `Arc`; a snapshot is never mutated after compile.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use mbguard_core::error::{MbGuardError, Result};

use crate::config::PolicyConfig;

use super::decision::PolicyDimension;
use super::function_set::{compile_function_codes, FunctionSet};
use super::schedule::MaintenanceSchedule;

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayPolicy {
    pub window: Duration,
    pub max_entries: usize,
    pub writes_only: bool,
}

#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub allowed: FunctionSet,
    pub blocked: FunctionSet,
    pub engineering_ips: HashSet<IpAddr>,
    pub maintenance: MaintenanceSchedule,
    pub rate_limit: RateLimit,
    pub replay: ReplayPolicy,
    pub alert_only: HashSet<PolicyDimension>,
    pub max_tracked_sources: usize,
}

impl PolicySnapshot {
    pub fn compile(cfg: &PolicyConfig) -> Result<Self> {
        let allowed = compile_function_codes("policy.allowed_function_codes", &cfg.allowed_function_codes)?;
        let blocked = compile_function_codes("policy.blocked_function_codes", &cfg.blocked_function_codes)?;

        let overlap = allowed.intersection(&blocked);
        if !overlap.is_empty() {
            let codes: Vec<String> = overlap.iter().map(|c| format!("{c:#04x}")).collect();
            return Err(MbGuardError::BadConfig(format!(
                "function codes both allowed and blocked: {}",
                codes.join(", ")
            )));
        }

        let engineering_ips = cfg
            .engineering_ips
            .iter()
            .map(|s| {
                s.parse::<IpAddr>().map_err(|_| {
                    MbGuardError::BadConfig(format!("policy.engineering_ips: invalid address {s}"))
                })
            })
            .collect::<Result<HashSet<_>>>()?;

        let maintenance = MaintenanceSchedule::compile(&cfg.maintenance_windows, cfg.utc_offset_minutes)?;

        Ok(Self {
            allowed,
            blocked,
            engineering_ips,
            maintenance,
            rate_limit: RateLimit {
                max_requests: cfg.rate_limit.max_requests.max(1),
                window: Duration::from_millis(cfg.rate_limit.window_ms.max(1)),
            },
            replay: ReplayPolicy {
                window: Duration::from_millis(cfg.replay.window_ms.max(1)),
                max_entries: cfg.replay.max_entries.max(1),
                writes_only: cfg.replay.writes_only,
            },
            alert_only: cfg.alert_only.iter().copied().collect(),
            max_tracked_sources: cfg.max_tracked_sources.max(1),
        })
    }

    pub fn is_alert_only(&self, dimension: PolicyDimension) -> bool {
        self.alert_only.contains(&dimension)
    }

    /// One-line summary for startup logs.
    pub fn summary(&self) -> String {
        let hex = |set: &FunctionSet| {
            set.iter().map(|c| format!("{c:#04x}")).collect::<Vec<_>>().join(",")
        };
        format!(
            "allowed=[{}] blocked=[{}] engineering_ips={} windows={} rate={}/{}ms replay={}ms",
            hex(&self.allowed),
            hex(&self.blocked),
            self.engineering_ips.len(),
            self.maintenance.windows().len(),
            self.rate_limit.max_requests,
            self.rate_limit.window.as_millis(),
            self.replay.window.as_millis(),
        )
    }
}
