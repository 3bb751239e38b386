//! Append-only JSONL audit trail (`.gateledger/events.jsonl`).
//!
//! One line per protocol step. Every event carries the invocation ULID so a
//! single agent run can be reassembled from an interleaved log.

use crate::core::config::{EVENTS_FILE, GATELEDGER_DIR};
use crate::core::error::GateLedgerError;
use crate::core::evidence::redact_string;
use crate::core::time::{new_event_id, now_epoch_z};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const OP_GUARD_SKIP: &str = "guard.skip";
pub const OP_GATE_RUN: &str = "gate.run";
pub const OP_LEDGER_LOCATE: &str = "ledger.locate";
pub const OP_LEDGER_CREATE: &str = "ledger.create";
pub const OP_LEDGER_COMMIT: &str = "ledger.commit";
pub const OP_LEDGER_CONFLICT: &str = "ledger.conflict";
pub const OP_CHECKRUN_EMIT: &str = "checkrun.emit";
pub const OP_LABELS_APPLY: &str = "labels.apply";
pub const OP_ROUTE_DECIDE: &str = "route.decide";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub ts: String,
    pub event_id: String,
    pub invocation_id: String,
    pub actor: String,
    pub op: String,
    pub status: String,
    #[serde(default)]
    pub details: JsonValue,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    audit_log_path: PathBuf,
    invocation_id: String,
}

impl EventLog {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: events_path(root),
            invocation_id: new_event_id(),
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn log(
        &self,
        actor: &str,
        op: &str,
        status: &str,
        details: JsonValue,
    ) -> Result<(), GateLedgerError> {
        let path = &self.audit_log_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let ev = AuditEvent {
            ts: now_epoch_z(),
            event_id: new_event_id(),
            invocation_id: self.invocation_id.clone(),
            actor: actor.to_string(),
            op: op.to_string(),
            status: status.to_string(),
            details: redact_value(details),
        };

        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

pub fn events_path(root: &Path) -> PathBuf {
    root.join(GATELEDGER_DIR).join(EVENTS_FILE)
}

/// Reads the audit trail; malformed lines are an error, a missing file is empty.
pub fn read_events(root: &Path) -> Result<Vec<AuditEvent>, GateLedgerError> {
    let path = events_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(GateLedgerError::from))
        .collect()
}

fn redact_value(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(redact_string(&s)),
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(redact_value).collect()),
        JsonValue::Object(map) => {
            JsonValue::Object(map.into_iter().map(|(k, v)| (k, redact_value(v))).collect())
        }
        other => other,
    }
}
