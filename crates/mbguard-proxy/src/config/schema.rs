use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

use mbguard_core::error::{MbGuardError, Result};
use mbguard_core::protocol::function;

use crate::policy::PolicyDimension;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MbGuardConfig {
    pub version: u32,

    #[serde(default)]
    pub proxy: ProxySection,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub ops: OpsSection,
}

impl MbGuardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MbGuardError::BadConfig(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.proxy.validate()?;
        self.policy.validate()?;
        self.audit.validate()?;
        self.ops.validate()?;

        Ok(())
    }
}

// --------------------
// proxy
// --------------------

/// What a client sees when one of its requests is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockResponse {
    /// Reply with a Modbus exception echoing the request's ids.
    #[default]
    Exception,
    /// Drop the request; the client times out.
    Silent,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Longest wait for a backend reply to a forwarded request. Unset means
    /// no limit.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,

    #[serde(default)]
    pub block_response: BlockResponse,

    #[serde(default = "default_exception_code")]
    pub exception_code: u8,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backend: default_backend(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: None,
            block_response: BlockResponse::default(),
            exception_code: default_exception_code(),
        }
    }
}

impl ProxySection {
    pub fn validate(&self) -> Result<()> {
        self.listen.parse::<SocketAddr>().map_err(|_| {
            MbGuardError::BadConfig(format!("proxy.listen is not a socket address: {}", self.listen))
        })?;
        if self.backend.trim().is_empty() {
            return Err(MbGuardError::BadConfig("proxy.backend must not be empty".into()));
        }
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            return Err(MbGuardError::BadConfig(
                "proxy.connect_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if let Some(ms) = self.response_timeout_ms {
            if !(100..=60_000).contains(&ms) {
                return Err(MbGuardError::BadConfig(
                    "proxy.response_timeout_ms must be between 100 and 60000".into(),
                ));
            }
        }
        if self.exception_code == 0 || self.exception_code & 0x80 != 0 {
            return Err(MbGuardError::BadConfig(
                "proxy.exception_code must be between 1 and 127".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:502".into()
}
fn default_backend() -> String {
    "127.0.0.1:5020".into()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_exception_code() -> u8 {
    0x01
}

// --------------------
// policy
// --------------------

/// Function code list entry: a bare number, or a string such as `"0x10"`
/// or a range `"1-4"` / `"0x0F-0x10"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FunctionCodeEntry {
    Code(u8),
    Spec(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// `HH:MM` or `HH:MM:SS`, inclusive.
    pub start: String,
    /// `HH:MM` or `HH:MM:SS`, inclusive. Earlier than `start` wraps midnight.
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_rate_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_replay_max_entries")]
    pub max_entries: usize,
    /// Only track write-class requests.
    #[serde(default)]
    pub writes_only: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_ms: default_replay_window_ms(),
            max_entries: default_replay_max_entries(),
            writes_only: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default = "default_allowed_function_codes")]
    pub allowed_function_codes: Vec<FunctionCodeEntry>,

    #[serde(default = "default_blocked_function_codes")]
    pub blocked_function_codes: Vec<FunctionCodeEntry>,

    /// Sources permitted to write during maintenance windows.
    #[serde(default)]
    pub engineering_ips: Vec<String>,

    #[serde(default)]
    pub maintenance_windows: Vec<WindowConfig>,

    /// Offset applied to UTC before matching maintenance windows.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub replay: ReplayConfig,

    /// Dimensions that flag (Alert) instead of block.
    #[serde(default)]
    pub alert_only: Vec<PolicyDimension>,

    #[serde(default = "default_max_tracked_sources")]
    pub max_tracked_sources: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_function_codes: default_allowed_function_codes(),
            blocked_function_codes: default_blocked_function_codes(),
            engineering_ips: Vec::new(),
            maintenance_windows: Vec::new(),
            utc_offset_minutes: 0,
            rate_limit: RateLimitConfig::default(),
            replay: ReplayConfig::default(),
            alert_only: Vec::new(),
            max_tracked_sources: default_max_tracked_sources(),
        }
    }
}

impl PolicyConfig {
    /// Range checks only; set compilation (parsing, disjointness) happens in
    /// `PolicySnapshot::compile`, which `validate` runs as a dry compile.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            return Err(MbGuardError::BadConfig(
                "policy.rate_limit.max_requests must be greater than 0".into(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(MbGuardError::BadConfig(
                "policy.rate_limit.window_ms must be greater than 0".into(),
            ));
        }
        if self.replay.window_ms == 0 || self.replay.max_entries == 0 {
            return Err(MbGuardError::BadConfig(
                "policy.replay.window_ms and max_entries must be greater than 0".into(),
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(MbGuardError::BadConfig(
                "policy.utc_offset_minutes must be within one day".into(),
            ));
        }
        if self.max_tracked_sources == 0 {
            return Err(MbGuardError::BadConfig(
                "policy.max_tracked_sources must be greater than 0".into(),
            ));
        }
        for ip in &self.engineering_ips {
            ip.parse::<IpAddr>().map_err(|_| {
                MbGuardError::BadConfig(format!("policy.engineering_ips: invalid address {ip}"))
            })?;
        }
        crate::policy::PolicySnapshot::compile(self).map(|_| ())
    }
}

fn default_allowed_function_codes() -> Vec<FunctionCodeEntry> {
    [
        function::READ_COILS,
        function::READ_DISCRETE_INPUTS,
        function::READ_HOLDING_REGISTERS,
        function::READ_INPUT_REGISTERS,
        function::WRITE_SINGLE_COIL,
        function::WRITE_SINGLE_REGISTER,
        function::WRITE_MULTIPLE_COILS,
        function::WRITE_MULTIPLE_REGISTERS,
    ]
    .into_iter()
    .map(FunctionCodeEntry::Code)
    .collect()
}
fn default_blocked_function_codes() -> Vec<FunctionCodeEntry> {
    [function::DIAGNOSTICS, function::ENCAPSULATED_INTERFACE]
        .into_iter()
        .map(FunctionCodeEntry::Code)
        .collect()
}
fn default_max_requests() -> u32 {
    100
}
fn default_rate_window_ms() -> u64 {
    1000
}
fn default_replay_window_ms() -> u64 {
    5000
}
fn default_replay_max_entries() -> usize {
    1024
}
fn default_max_tracked_sources() -> usize {
    10_000
}

// --------------------
// audit / ops
// --------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    /// Records held while the sink is slow or down; oldest dropped beyond.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Records retained for `/api/decisions`.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            recent_capacity: default_recent_capacity(),
        }
    }
}

impl AuditSection {
    pub fn validate(&self) -> Result<()> {
        if !(16..=1_000_000).contains(&self.buffer_capacity) {
            return Err(MbGuardError::BadConfig(
                "audit.buffer_capacity must be between 16 and 1000000".into(),
            ));
        }
        if self.recent_capacity > 10_000 {
            return Err(MbGuardError::BadConfig(
                "audit.recent_capacity must be at most 10000".into(),
            ));
        }
        Ok(())
    }
}

fn default_buffer_capacity() -> usize {
    4096
}
fn default_recent_capacity() -> usize {
    200
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OpsSection {
    /// HTTP listen address for health/metrics; disabled when absent.
    #[serde(default)]
    pub listen: Option<String>,
}

impl OpsSection {
    pub fn validate(&self) -> Result<()> {
        if let Some(listen) = &self.listen {
            listen.parse::<SocketAddr>().map_err(|_| {
                MbGuardError::BadConfig(format!("ops.listen is not a socket address: {listen}"))
            })?;
        }
        Ok(())
    }
}
