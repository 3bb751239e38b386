//! Tri-state gate outcome.
//!
//! A gate is `pass`, `fail`, or `skipped(reason)`. Nothing else is
//! representable, and a skip always carries its reason.

use crate::core::error::GateLedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SKIP_OUT_OF_SCOPE: &str = "out-of-scope";
pub const SKIP_MISSING_TOOL: &str = "missing-tool";
pub const SKIP_DEGRADED_PROVIDER: &str = "degraded-provider";
pub const SKIP_NON_CRITICAL: &str = "non-critical-for-flow";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Fail,
    Skipped(String),
}

impl GateStatus {
    /// Builds a skip, rejecting an empty reason.
    pub fn skipped(reason: &str) -> Result<Self, GateLedgerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(GateLedgerError::ValidationError(
                "skipped status requires a reason".to_string(),
            ));
        }
        if reason.contains(&['(', ')', '|', '\n'][..]) {
            return Err(GateLedgerError::ValidationError(format!(
                "skip reason '{}' may not contain parentheses, pipes or newlines",
                reason
            )));
        }
        Ok(Self::Skipped(reason.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skipped(_) => "skipped",
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn conclusion(&self) -> CheckConclusion {
        match self {
            Self::Pass => CheckConclusion::Success,
            Self::Fail => CheckConclusion::Failure,
            Self::Skipped(_) => CheckConclusion::Neutral,
        }
    }

    /// Parses the Gates table cell form (`pass`, `fail`, `skipped (reason)`).
    pub fn parse_cell(cell: &str) -> Result<Self, GateLedgerError> {
        let cell = cell.trim();
        match cell {
            "pass" => return Ok(Self::Pass),
            "fail" => return Ok(Self::Fail),
            _ => {}
        }
        let reason = cell
            .strip_prefix("skipped")
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'));
        match reason {
            Some(reason) => Self::skipped(reason)
                .map_err(|e| GateLedgerError::MalformedLedger(format!("status '{}': {}", cell, e))),
            None => Err(GateLedgerError::MalformedLedger(format!(
                "unknown gate status '{}' (expected pass|fail|skipped (<reason>))",
                cell
            ))),
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

/// Check run conclusion. `status` is always `completed` for emitted runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
}

impl CheckConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for CheckConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
