//! Proxy config loader (strict parsing).
//!
//! The file is parsed here, in the binary crate; the relay and policy engine
//! only ever see the compiled `PolicySnapshot` and `RelaySettings`.

pub mod schema;

use std::fs;

use mbguard_core::error::{MbGuardError, Result};

pub use schema::{
    AuditSection, BlockResponse, FunctionCodeEntry, MbGuardConfig, OpsSection, PolicyConfig,
    ProxySection, RateLimitConfig, ReplayConfig, WindowConfig,
};

pub fn load_from_file(path: &str) -> Result<MbGuardConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MbGuardError::BadConfig(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<MbGuardConfig> {
    let cfg: MbGuardConfig = serde_yaml::from_str(s)
        .map_err(|e| MbGuardError::BadConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
