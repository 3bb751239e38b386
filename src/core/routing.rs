//! Routing decisions and the pure router.
//!
//! `decide` is the whole routing table: a gate outcome, the retry budget
//! reconstructed from the Hoplog, and the agent's policy map to exactly one
//! `RoutingDecision`. It performs no I/O and holds no state.

use crate::core::error::GateLedgerError;
use crate::core::ledger::is_name_token;
use crate::core::retry::RetryState;
use crate::core::status::{
    GateStatus, SKIP_DEGRADED_PROVIDER, SKIP_MISSING_TOOL, SKIP_NON_CRITICAL, SKIP_OUT_OF_SCOPE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Target meaning "re-invoke the same agent"; bounded by `RetryState`.
pub const SELF_TARGET: &str = "self";
/// Terminal target used when an invocation did nothing.
pub const NO_OP_TARGET: &str = "no-op";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "UPPERCASE")]
pub enum RoutingDecision {
    Finalize(String),
    Next(String),
}

impl RoutingDecision {
    pub fn target(&self) -> &str {
        match self {
            Self::Finalize(target) | Self::Next(target) => target,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Finalize(_) => "FINALIZE",
            Self::Next(_) => "NEXT",
        }
    }

    pub fn is_self_retry(&self) -> bool {
        matches!(self, Self::Next(target) if target == SELF_TARGET)
    }

    pub fn no_op() -> Self {
        Self::Finalize(NO_OP_TARGET.to_string())
    }

    /// Compact `finalize:<agent>` / `next:<agent>` form used in Hoplog tags.
    pub fn tag(&self) -> String {
        match self {
            Self::Finalize(target) => format!("finalize:{}", target),
            Self::Next(target) => format!("next:{}", target),
        }
    }

    pub fn parse_tag(tag: &str) -> Option<Self> {
        let (kind, target) = tag.split_once(':')?;
        if target.is_empty() {
            return None;
        }
        match kind {
            "finalize" => Some(Self::Finalize(target.to_string())),
            "next" => Some(Self::Next(target.to_string())),
            _ => None,
        }
    }

    /// Parses the Decision block form (`FINALIZE → agent`, `NEXT -> agent`).
    pub fn parse_display(text: &str) -> Option<Self> {
        let text = text.trim();
        let (kind, target) = text
            .split_once('→')
            .or_else(|| text.split_once("->"))?;
        let target = target.trim();
        if target.is_empty() || target.contains(char::is_whitespace) {
            return None;
        }
        match kind.trim() {
            "FINALIZE" => Some(Self::Finalize(target.to_string())),
            "NEXT" => Some(Self::Next(target.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.kind(), self.target())
    }
}

pub fn default_non_blocking_skips() -> BTreeSet<String> {
    [
        SKIP_OUT_OF_SCOPE,
        SKIP_MISSING_TOOL,
        SKIP_DEGRADED_PROVIDER,
        SKIP_NON_CRITICAL,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Flow-defined routing targets for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub on_success: String,
    pub on_failure_specialist: String,
    pub non_blocking_skips: BTreeSet<String>,
}

impl RoutingPolicy {
    pub fn new(on_success: &str, on_failure_specialist: &str) -> Result<Self, GateLedgerError> {
        validate_target("on_success", on_success)?;
        validate_target("on_failure", on_failure_specialist)?;
        if on_failure_specialist == SELF_TARGET {
            return Err(GateLedgerError::Config(
                "on_failure may not be 'self': an exhausted retry budget must route elsewhere"
                    .to_string(),
            ));
        }
        Ok(Self {
            on_success: on_success.to_string(),
            on_failure_specialist: on_failure_specialist.to_string(),
            non_blocking_skips: default_non_blocking_skips(),
        })
    }

    pub fn with_non_blocking_skips<I, S>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_blocking_skips = reasons.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_non_blocking(&self, reason: &str) -> bool {
        self.non_blocking_skips.contains(reason)
    }
}

fn validate_target(field: &str, target: &str) -> Result<(), GateLedgerError> {
    if !is_name_token(target) {
        return Err(GateLedgerError::Config(format!(
            "{} target '{}' must be an agent name of [A-Za-z0-9._-]",
            field, target
        )));
    }
    Ok(())
}

/// Router output: the decision plus the retry state to carry forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub decision: RoutingDecision,
    pub retry: RetryState,
}

pub fn decide(status: &GateStatus, retry: &RetryState, policy: &RoutingPolicy) -> Routed {
    let decision = match status {
        GateStatus::Pass => RoutingDecision::Finalize(policy.on_success.clone()),
        GateStatus::Fail if !retry.exceeded() => {
            return Routed {
                decision: RoutingDecision::Next(SELF_TARGET.to_string()),
                retry: retry.increment(),
            };
        }
        GateStatus::Fail => RoutingDecision::Next(policy.on_failure_specialist.clone()),
        GateStatus::Skipped(reason) if policy.is_non_blocking(reason) => {
            RoutingDecision::Finalize(policy.on_success.clone())
        }
        GateStatus::Skipped(_) => RoutingDecision::Next(policy.on_failure_specialist.clone()),
    };
    Routed {
        decision,
        retry: retry.clone(),
    }
}
