//! gateledger: the Gate/Ledger orchestration protocol for multi-agent pipelines.
//!
//! A change request moves through named quality gates. Each agent invocation
//! runs one gate, records the outcome in a single shared markdown comment (the
//! Ledger), emits one namespaced check run, and prints a routing decision that
//! an external scheduler uses to dispatch the next agent.
//!
//! # The Ledger
//!
//! One comment per change request, with three anchored regions:
//!
//! - **Gates**: one row per gate, upserted by name
//! - **Hoplog**: append-only, one line per invocation
//! - **Decision**: state, up to three lines of why, and the next hop
//!
//! Only bytes between anchors are ever rewritten. Writers commit with a
//! compare-and-swap on a body hash and re-apply their delta once on conflict.
//!
//! # Routing
//!
//! `pass` finalizes to the flow's success target. `fail` retries the same
//! agent up to a bounded number of times (replayed from the Hoplog, never
//! stored), then hands off to a specialist. Skips finalize or hand off
//! depending on whether the reason is declared non-blocking.
//!
//! # Examples
//!
//! ```bash
//! gateledger init
//! gateledger run --agent tests-runner --pr 42 --head-sha "$SHA" --flow generative
//! gateledger ledger show --pr 42
//! gateledger route --status fail --agent tests-runner --gate tests \
//!     --attempts 2 --on-success docs-reviewer --on-failure test-fixer
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: protocol primitives (status, ledger, store, router, pipeline)
//! - [`plugins`]: code host backends (GitHub via `gh`, local SQLite)

mod cli;
pub mod core;
pub mod plugins;

use crate::cli::{Cli, Command, LedgerCommand, RouteCli, RunCli, StatusArg};
use crate::core::config::{self, Config, HostKind};
use crate::core::error::GateLedgerError;
use crate::core::events::EventLog;
use crate::core::gate_runner::GateRunner;
use crate::core::host::Host;
use crate::core::ledger::LedgerDocument;
use crate::core::ledger_store::LedgerStore;
use crate::core::pipeline::{Pipeline, RunReport, RunRequest};
use crate::core::retry::RetryState;
use crate::core::routing::{self, RoutingPolicy};
use crate::core::status::GateStatus;
use crate::core::{assets, time};
use crate::plugins::{github::GitHubHost, local::LocalHost};

use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

pub fn run() -> Result<(), GateLedgerError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;

    match cli.command {
        Command::Init(args) => {
            let dir = args.dir.unwrap_or(current_dir);
            init_project(&dir, args.force)
        }
        Command::Route(args) => route_command(&args),
        Command::Run(args) => {
            let (root, config) = load_project(&current_dir)?;
            run_command(&root, &config, &args)
        }
        Command::Ledger(ledger) => {
            let (root, config) = load_project(&current_dir)?;
            let host = open_host(&root, &config)?;
            match ledger.command {
                LedgerCommand::Show { pr, format } => ledger_show(host.as_ref(), &config, pr, &format),
                LedgerCommand::Init { pr } => ledger_init(host.as_ref(), &config, pr),
            }
        }
        Command::Agents(args) => {
            let (_root, config) = load_project(&current_dir)?;
            agents_command(&config, &args.format)
        }
    }
}

fn load_project(start_dir: &Path) -> Result<(PathBuf, Config), GateLedgerError> {
    let root = config::find_project_root(start_dir)?;
    let config = config::load_config(&root)?;
    Ok((root, config))
}

pub fn open_host(root: &Path, config: &Config) -> Result<Box<dyn Host>, GateLedgerError> {
    match config.host.kind {
        HostKind::Local => Ok(Box::new(LocalHost::open(&root.join(&config.host.db))?)),
        HostKind::Github => {
            let repo = config.host.repo.as_deref().ok_or_else(|| {
                GateLedgerError::Config("[host] repo is required for kind = \"github\"".to_string())
            })?;
            Ok(Box::new(GitHubHost::new(repo)?))
        }
    }
}

fn check_format(format: &str, allowed: &[&str]) -> Result<(), GateLedgerError> {
    if allowed.contains(&format) {
        Ok(())
    } else {
        Err(GateLedgerError::ValidationError(format!(
            "unknown format '{}' (expected one of: {})",
            format,
            allowed.join(", ")
        )))
    }
}

pub fn init_project(dir: &Path, force: bool) -> Result<(), GateLedgerError> {
    let ledger_dir = dir.join(config::GATELEDGER_DIR);
    let config_path = config::config_path(dir);
    if config_path.exists() && !force {
        return Err(GateLedgerError::ValidationError(format!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        )));
    }
    fs::create_dir_all(&ledger_dir)?;
    fs::write(&config_path, assets::CONFIG_TEMPLATE)?;
    fs::write(ledger_dir.join(".gitignore"), "host.db*\nevents.jsonl\n")?;
    println!(
        "{} {}",
        "initialized".green().bold(),
        config_path.display()
    );
    Ok(())
}

fn run_command(root: &Path, config: &Config, args: &RunCli) -> Result<(), GateLedgerError> {
    check_format(&args.format, &["text", "json"])?;
    let host = open_host(root, config)?;
    let runner = GateRunner::system(root, config.protocol.evidence_max_chars);
    let pipeline = Pipeline::new(host.as_ref(), config, runner, EventLog::new(root))
        .with_labels(args.labels);
    let request = RunRequest {
        agent: args.agent.clone(),
        pr: args.pr,
        head_sha: args.head_sha.clone(),
        flow: config::resolve_flow(args.flow.as_deref()),
    };
    let report = pipeline.run(&request)?;

    if args.format == "json" {
        let envelope = time::command_envelope(
            "run",
            "ok",
            serde_json::json!({ "report": serde_json::to_value(&report)? }),
        );
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let status = match &report.status {
        GateStatus::Pass => report.status.to_string().green().bold(),
        GateStatus::Fail => report.status.to_string().red().bold(),
        GateStatus::Skipped(_) => report.status.to_string().yellow().bold(),
    };
    println!("{} {} {}", "gate".bold(), report.gate, status);
    println!("  evidence: {}", report.evidence);
    match report.ledger_comment_id {
        Some(id) => println!(
            "  ledger:   comment {}{}{}",
            id,
            if report.ledger_created { " (created)" } else { "" },
            if report.ledger_conflicts > 0 { " (conflict reapplied)" } else { "" }
        ),
        None => println!("  ledger:   {}", "untouched (out of scope)".dimmed()),
    }
    println!("  check:    run {}", report.check_run_id);
    if let Some(err) = &report.label_error {
        println!("  labels:   {} {}", "failed".yellow(), err);
    }
    let decision = report.decision.to_string();
    let decision = if report.decision.is_self_retry() {
        format!("{} (attempt {}/{})", decision, report.attempts, report.retry_limit).yellow()
    } else {
        decision.cyan()
    };
    println!("{} {}", "decision".bold(), decision.bold());
}

fn ledger_show(host: &dyn Host, config: &Config, pr: u64, format: &str) -> Result<(), GateLedgerError> {
    check_format(format, &["text", "json", "raw"])?;
    let store = LedgerStore::new(host, pr, config.protocol.duplicate_ledger);
    let Some(located) = store.find()? else {
        return Err(GateLedgerError::NotFound(format!(
            "no ledger comment on #{}; run `gateledger ledger init --pr {}`",
            pr, pr
        )));
    };
    match format {
        "raw" => print!("{}", located.document.render()),
        "json" => {
            let envelope = time::command_envelope(
                "ledger.show",
                "ok",
                serde_json::json!({
                    "pr": pr,
                    "comment_id": located.comment_id,
                    "etag": located.etag,
                    "ledger": ledger_json(&located.document)?,
                }),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        _ => print_ledger(pr, located.comment_id, &located.document),
    }
    Ok(())
}

fn ledger_json(doc: &LedgerDocument) -> Result<serde_json::Value, GateLedgerError> {
    Ok(serde_json::json!({
        "gates": doc.gates().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?,
        "hoplog": doc.hops().map(serde_json::to_value).collect::<Result<Vec<_>, _>>()?,
        "decision": serde_json::to_value(doc.decision())?,
    }))
}

fn print_ledger(pr: u64, comment_id: u64, doc: &LedgerDocument) {
    println!("{} #{} (comment {})", "Ledger".bold(), pr, comment_id);
    println!("{}", "Gates".underline());
    if doc.gates().next().is_none() {
        println!("  {}", "(none)".dimmed());
    }
    for gate in doc.gates() {
        println!("  {:<16} {:<28} {}", gate.name, gate.status.to_string(), gate.evidence);
    }
    println!("{}", "Hoplog".underline());
    for hop in doc.hops() {
        println!("  {} {}: {}", hop.timestamp.dimmed(), hop.agent, hop.summary);
    }
    let decision = doc.decision();
    println!("{}", "Decision".underline());
    println!("  state: {}", decision.state);
    for line in decision.why.lines() {
        println!("  why:   {}", line);
    }
    match &decision.next {
        Some(next) => println!("  next:  {}", next),
        None => println!("  next:  pending"),
    }
}

fn ledger_init(host: &dyn Host, config: &Config, pr: u64) -> Result<(), GateLedgerError> {
    let store = LedgerStore::new(host, pr, config.protocol.duplicate_ledger);
    let located = store.locate()?;
    let verb = if located.created { "created" } else { "found" };
    println!("{} ledger comment {} on #{}", verb.green().bold(), located.comment_id, pr);
    Ok(())
}

fn route_command(args: &RouteCli) -> Result<(), GateLedgerError> {
    check_format(&args.format, &["text", "json"])?;
    let status = match args.status {
        StatusArg::Pass => GateStatus::Pass,
        StatusArg::Fail => GateStatus::Fail,
        StatusArg::Skipped => GateStatus::skipped(args.reason.as_deref().unwrap_or_default())?,
    };
    let policy = RoutingPolicy::new(&args.on_success, &args.on_failure)?;
    let retry = RetryState::with_attempts(&args.agent, &args.gate, args.attempts, args.limit);
    let routed = routing::decide(&status, &retry, &policy);

    if args.format == "json" {
        let envelope = time::command_envelope(
            "route",
            "ok",
            serde_json::json!({
                "status": status,
                "decision": routed.decision,
                "attempts": routed.retry.attempts(),
                "limit": routed.retry.limit(),
            }),
        );
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        println!("{}", routed.decision.to_string().bold());
    }
    Ok(())
}

fn agents_command(config: &Config, format: &str) -> Result<(), GateLedgerError> {
    check_format(format, &["text", "json"])?;
    if format == "json" {
        let envelope = time::command_envelope(
            "agents",
            "ok",
            serde_json::json!({ "agents": serde_json::to_value(&config.agents)? }),
        );
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }
    if config.agents.is_empty() {
        println!("{}", "no agents configured".dimmed());
    }
    for agent in &config.agents {
        println!(
            "{} [{}] gate={} success={} failure={}",
            agent.name.bold(),
            agent.flow,
            agent.gate,
            agent.on_success.green(),
            agent.on_failure.yellow()
        );
        for command in &agent.commands {
            println!("    {}", command.display().dimmed());
        }
    }
    Ok(())
}
