//! Flow scoping.
//!
//! An agent declares the flow it belongs to. When the invocation's ambient
//! flow differs (or is unknown), the run is cancelled before any command
//! executes and before the Ledger is touched.

use crate::core::evidence::Evidence;
use crate::core::routing::RoutingDecision;
use crate::core::status::{GateStatus, SKIP_OUT_OF_SCOPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    OutOfScope {
        declared: String,
        current: Option<String>,
    },
}

impl GuardVerdict {
    pub fn status(&self) -> GateStatus {
        match self {
            Self::Proceed => GateStatus::Pass,
            Self::OutOfScope { .. } => GateStatus::Skipped(SKIP_OUT_OF_SCOPE.to_string()),
        }
    }

    /// Terminal decision for a cancelled run.
    pub fn decision(&self) -> Option<RoutingDecision> {
        match self {
            Self::Proceed => None,
            Self::OutOfScope { .. } => Some(RoutingDecision::no_op()),
        }
    }

    pub fn evidence(&self, max_chars: usize) -> String {
        match self {
            Self::Proceed => String::new(),
            Self::OutOfScope { declared, current } => Evidence::new("flow")
                .metric("declared", declared)
                .metric("current", current.as_deref().unwrap_or("unset"))
                .render(max_chars),
        }
    }
}

pub fn check(declared: &str, current: Option<&str>) -> GuardVerdict {
    match current {
        Some(flow) if flow == declared => GuardVerdict::Proceed,
        _ => GuardVerdict::OutOfScope {
            declared: declared.to_string(),
            current: current.map(str::to_string),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_flow_proceeds() {
        assert_eq!(check("generative", Some("generative")), GuardVerdict::Proceed);
    }

    #[test]
    fn test_mismatch_is_out_of_scope_no_op() {
        let verdict = check("generative", Some("review"));
        assert_eq!(verdict.status(), GateStatus::Skipped("out-of-scope".into()));
        assert_eq!(verdict.decision(), Some(RoutingDecision::no_op()));
        assert_eq!(
            verdict.evidence(200),
            "flow: declared: generative; current: review"
        );
    }

    #[test]
    fn test_unknown_flow_does_not_proceed() {
        let verdict = check("generative", None);
        assert_ne!(verdict, GuardVerdict::Proceed);
        assert!(verdict.evidence(200).ends_with("current: unset"));
    }
}
