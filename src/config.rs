use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::Path;

/// Tunable timing and policy knobs for the engine.
///
/// Loaded from an optional JSON file at startup; every field falls back to
/// the defaults below when absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds an uncommitted reservation is held before auto-release.
    pub reservation_hold_secs: u64,
    /// Seconds a pending approval request stays resolvable.
    pub approval_ttl_secs: u64,
    /// Consecutive failed authentication attempts before lockout.
    pub max_failed_attempts: u32,
    /// Lockout duration after too many failed attempts.
    pub lockout_secs: u64,
    /// Idle time after which an authenticated session is dropped.
    pub session_idle_secs: u64,
    /// Interval of the background expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Categories that bump approval urgency one level.
    pub high_risk_categories: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_hold_secs: 120,
            approval_ttl_secs: 24 * 60 * 60,
            max_failed_attempts: 5,
            lockout_secs: 30 * 60,
            session_idle_secs: 30 * 60,
            sweep_interval_secs: 30,
            high_risk_categories: vec!["cash_advance".to_string(), "wire_transfer".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| EngineError::Validation(e.to_string()))
    }

    pub fn reservation_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_hold_secs as i64)
    }

    pub fn approval_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.approval_ttl_secs as i64)
    }

    pub fn lockout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockout_secs as i64)
    }

    pub fn session_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_secs as i64)
    }
}
