//! One agent invocation, end to end.
//!
//! Order of effects: flow guard, gate command, ledger locate, retry replay,
//! routing, ledger commit, check run, labels. The guard is the only point at
//! which a run can be cancelled, and it fires before anything else happens.
//! Every step is written to the audit trail under the same invocation id.

use crate::core::check_run::{CheckRunEmitter, check_run_name};
use crate::core::config::{AgentConfig, Config};
use crate::core::error::GateLedgerError;
use crate::core::events::{self, EventLog};
use crate::core::flow_guard::{self, GuardVerdict};
use crate::core::gate_runner::{CommandExecutor, GateOutcome, GateRunner, SystemExecutor};
use crate::core::host::{CheckRunReceipt, Host};
use crate::core::labels::{self, LabelSet};
use crate::core::ledger::{Decision, DecisionState, Gate, Hop};
use crate::core::ledger_store::{LedgerDelta, LedgerStore};
use crate::core::retry::RetryState;
use crate::core::routing::{self, RoutingDecision};
use crate::core::status::GateStatus;
use crate::core::time::now_epoch_z;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub agent: String,
    pub pr: u64,
    pub head_sha: String,
    /// Ambient flow context of this invocation.
    pub flow: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub invocation_id: String,
    pub agent: String,
    pub gate: String,
    pub status: GateStatus,
    pub evidence: String,
    pub decision: RoutingDecision,
    pub attempts: u32,
    pub retry_limit: u32,
    /// `None` when the flow guard cancelled the run.
    pub ledger_comment_id: Option<u64>,
    pub ledger_created: bool,
    pub ledger_conflicts: u32,
    pub check_run_id: u64,
    pub labels: Option<labels::LabelPlan>,
    pub label_error: Option<String>,
}

pub struct Pipeline<'a, H: Host + ?Sized, E: CommandExecutor = SystemExecutor> {
    host: &'a H,
    config: &'a Config,
    runner: GateRunner<E>,
    events: EventLog,
    manage_labels: bool,
}

impl<'a, H: Host + ?Sized, E: CommandExecutor> Pipeline<'a, H, E> {
    pub fn new(host: &'a H, config: &'a Config, runner: GateRunner<E>, events: EventLog) -> Self {
        Self {
            host,
            config,
            runner,
            events,
            manage_labels: false,
        }
    }

    pub fn with_labels(mut self, enabled: bool) -> Self {
        self.manage_labels = enabled;
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn run(&self, req: &RunRequest) -> Result<RunReport, GateLedgerError> {
        let agent = self.config.agent(&req.agent)?;
        let policy = agent.policy(&self.config.protocol)?;
        let protocol = &self.config.protocol;

        let verdict = flow_guard::check(&agent.flow, req.flow.as_deref());
        if let Some(decision) = verdict.decision() {
            return self.cancel(agent, req, &verdict, decision);
        }

        let outcome = self.runner.run(&agent.gate, &agent.commands)?;
        self.log(
            agent,
            events::OP_GATE_RUN,
            outcome.status.label(),
            serde_json::to_value(&outcome)?,
        )?;

        let store = LedgerStore::new(self.host, req.pr, protocol.duplicate_ledger);
        let located = store.locate()?;
        let locate_op = if located.created {
            events::OP_LEDGER_CREATE
        } else {
            events::OP_LEDGER_LOCATE
        };
        self.log(agent, locate_op, "ok", json!({"pr": req.pr, "comment_id": located.comment_id}))?;

        let retry = RetryState::load(
            &agent.name,
            &agent.gate,
            located.document.hops(),
            protocol.max_self_retries,
        );
        let routed = routing::decide(&outcome.status, &retry, &policy);
        self.log(
            agent,
            events::OP_ROUTE_DECIDE,
            "ok",
            json!({
                "decision": routed.decision,
                "attempts_before": retry.attempts(),
                "attempts_after": routed.retry.attempts(),
                "limit": retry.limit(),
            }),
        )?;

        let state = DecisionState::for_route(&routed.decision);
        let delta = LedgerDelta::new()
            .gate(Gate::new(&agent.gate, outcome.status.clone(), &outcome.evidence)?)
            .hop(Hop::tagged(
                &now_epoch_z(),
                &agent.name,
                &format!("gate {} {}", agent.gate, outcome.status),
                &agent.gate,
                &routed.decision,
            ))
            .decision(Decision::new(
                state,
                &why_lines(&outcome, &routed.decision, &routed.retry),
                Some(routed.decision.clone()),
            ));
        let committed = store.commit(&located, &delta)?;
        if committed.conflicts > 0 {
            self.log(
                agent,
                events::OP_LEDGER_CONFLICT,
                "reapplied",
                json!({"comment_id": committed.comment_id, "conflicts": committed.conflicts}),
            )?;
        }
        self.log(
            agent,
            events::OP_LEDGER_COMMIT,
            if committed.written { "written" } else { "unchanged" },
            json!({"comment_id": committed.comment_id, "etag": committed.etag}),
        )?;

        let receipt = self.emit_check_run(agent, req, &outcome.status, &outcome.evidence)?;

        let (label_plan, label_error) = if self.manage_labels {
            self.apply_labels(agent, req.pr, state)?
        } else {
            (None, None)
        };

        Ok(RunReport {
            invocation_id: self.events.invocation_id().to_string(),
            agent: agent.name.clone(),
            gate: agent.gate.clone(),
            status: outcome.status,
            evidence: outcome.evidence,
            decision: routed.decision,
            attempts: routed.retry.attempts(),
            retry_limit: routed.retry.limit(),
            ledger_comment_id: Some(committed.comment_id),
            ledger_created: located.created,
            ledger_conflicts: committed.conflicts,
            check_run_id: receipt.id,
            labels: label_plan,
            label_error,
        })
    }

    /// Out-of-scope run: neutral check run, no ledger access, no-op decision.
    fn cancel(
        &self,
        agent: &AgentConfig,
        req: &RunRequest,
        verdict: &GuardVerdict,
        decision: RoutingDecision,
    ) -> Result<RunReport, GateLedgerError> {
        let status = verdict.status();
        let evidence = verdict.evidence(self.config.protocol.evidence_max_chars);
        self.log(
            agent,
            events::OP_GUARD_SKIP,
            status.label(),
            json!({"declared": agent.flow, "current": req.flow, "evidence": evidence}),
        )?;
        let receipt = self.emit_check_run(agent, req, &status, &evidence)?;
        Ok(RunReport {
            invocation_id: self.events.invocation_id().to_string(),
            agent: agent.name.clone(),
            gate: agent.gate.clone(),
            status,
            evidence,
            decision,
            attempts: 0,
            retry_limit: self.config.protocol.max_self_retries,
            ledger_comment_id: None,
            ledger_created: false,
            ledger_conflicts: 0,
            check_run_id: receipt.id,
            labels: None,
            label_error: None,
        })
    }

    /// Bounded attempts; the last failure is surfaced as `CheckRunRejected`.
    fn emit_check_run(
        &self,
        agent: &AgentConfig,
        req: &RunRequest,
        status: &GateStatus,
        summary: &str,
    ) -> Result<CheckRunReceipt, GateLedgerError> {
        let emitter = CheckRunEmitter::new(self.host);
        let attempts = self.config.protocol.check_emit_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match emitter.emit(&agent.gate, &agent.flow, &req.head_sha, status, summary) {
                Ok(receipt) => {
                    self.log(
                        agent,
                        events::OP_CHECKRUN_EMIT,
                        status.conclusion().as_str(),
                        json!({"id": receipt.id, "name": receipt.name, "attempt": attempt}),
                    )?;
                    return Ok(receipt);
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.log(
                        agent,
                        events::OP_CHECKRUN_EMIT,
                        "error",
                        json!({"attempt": attempt, "error": last_error}),
                    )?;
                }
            }
        }
        Err(GateLedgerError::CheckRunRejected(format!(
            "{} after {} attempt(s): {}",
            check_run_name(&agent.flow, &agent.gate),
            attempts,
            last_error
        )))
    }

    /// Label failures are recorded, not fatal.
    fn apply_labels(
        &self,
        agent: &AgentConfig,
        pr: u64,
        state: DecisionState,
    ) -> Result<(Option<labels::LabelPlan>, Option<String>), GateLedgerError> {
        let needs = match state {
            DecisionState::NeedsRework => agent.needs.as_deref(),
            _ => None,
        };
        let desired = LabelSet::new(&agent.flow, state)
            .topics(&agent.topics)
            .needs(needs);
        let result = self.host.list_labels(pr).and_then(|current| {
            let plan = labels::reconcile(&current, &desired);
            if !plan.is_empty() {
                self.host.apply_labels(pr, &plan.add, &plan.remove)?;
            }
            Ok(plan)
        });
        match result {
            Ok(plan) => {
                self.log(agent, events::OP_LABELS_APPLY, "ok", serde_json::to_value(&plan)?)?;
                Ok((Some(plan), None))
            }
            Err(e) => {
                self.log(agent, events::OP_LABELS_APPLY, "error", json!({"error": e.to_string()}))?;
                Ok((None, Some(e.to_string())))
            }
        }
    }

    fn log(
        &self,
        agent: &AgentConfig,
        op: &str,
        status: &str,
        details: serde_json::Value,
    ) -> Result<(), GateLedgerError> {
        self.events.log(&agent.name, op, status, details)
    }
}

fn why_lines(outcome: &GateOutcome, decision: &RoutingDecision, retry: &RetryState) -> String {
    let mut lines = vec![format!("{}: {}", outcome.gate, outcome.status)];
    if !outcome.evidence.is_empty() {
        lines.push(outcome.evidence.clone());
    }
    if decision.is_self_retry() {
        lines.push(format!("self-retry {}/{}", retry.attempts(), retry.limit()));
    } else if matches!(outcome.status, GateStatus::Fail) {
        lines.push(format!(
            "retry budget exhausted ({}/{}); handing off to {}",
            retry.attempts(),
            retry.limit(),
            decision.target()
        ));
    }
    lines.join("\n")
}
