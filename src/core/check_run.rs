//! Namespaced check run emission.
//!
//! One call creates one new check run named `<flow>:gate:<gate>`. Runs are
//! never amended; a re-run of the same gate on the same head SHA produces a
//! second record.

use crate::core::error::GateLedgerError;
use crate::core::evidence::redact_string;
use crate::core::host::{CheckRunApi, CheckRunReceipt};
use crate::core::status::{CheckConclusion, GateStatus};
use serde::{Deserialize, Serialize};

pub const CHECK_STATUS_COMPLETED: &str = "completed";
const MAX_SUMMARY_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: String,
    pub conclusion: CheckConclusion,
    pub title: String,
    pub summary: String,
}

pub fn check_run_name(flow: &str, gate: &str) -> String {
    format!("{}:gate:{}", flow, gate)
}

impl CheckRun {
    pub fn completed(flow: &str, gate: &str, head_sha: &str, status: &GateStatus, summary: &str) -> Self {
        let summary: String = redact_string(summary).chars().take(MAX_SUMMARY_CHARS).collect();
        Self {
            name: check_run_name(flow, gate),
            head_sha: head_sha.to_string(),
            status: CHECK_STATUS_COMPLETED.to_string(),
            conclusion: status.conclusion(),
            title: format!("{}: {}", gate, status),
            summary,
        }
    }

    /// Body for the REST check-runs endpoint.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "head_sha": self.head_sha,
            "status": self.status,
            "conclusion": self.conclusion.as_str(),
            "output": {
                "title": self.title,
                "summary": self.summary,
            }
        })
    }
}

pub struct CheckRunEmitter<'a, A: CheckRunApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: CheckRunApi + ?Sized> CheckRunEmitter<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    pub fn emit(
        &self,
        gate: &str,
        flow: &str,
        head_sha: &str,
        status: &GateStatus,
        summary: &str,
    ) -> Result<CheckRunReceipt, GateLedgerError> {
        if head_sha.trim().is_empty() {
            return Err(GateLedgerError::ValidationError(
                "check run requires a head SHA".to_string(),
            ));
        }
        let run = CheckRun::completed(flow, gate, head_sha.trim(), status, summary);
        self.api.create_check_run(&run)
    }
}
