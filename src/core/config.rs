//! Project configuration (`.gateledger/config.toml`).
//!
//! Protocol constants (retry bound, non-blocking skip vocabulary, evidence
//! width) live here as named parameters. Each `[[agent]]` declares its flow,
//! its gate, its routing targets and an ordered command fallback list.

use crate::core::error::GateLedgerError;
use crate::core::gate_runner::{CommandSpec, compile_pattern};
use crate::core::ledger::is_name_token;
use crate::core::retry::DEFAULT_MAX_SELF_RETRIES;
use crate::core::routing::{RoutingPolicy, default_non_blocking_skips};
use crate::core::schemas::HOST_DB_NAME;
use crate::core::evidence::DEFAULT_EVIDENCE_MAX_CHARS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const GATELEDGER_DIR: &str = ".gateledger";
pub const CONFIG_FILE: &str = "config.toml";
pub const EVENTS_FILE: &str = "events.jsonl";
/// Ambient flow context when `--flow` is not given.
pub const FLOW_ENV: &str = "GATELEDGER_FLOW";

pub const MAX_SELF_RETRIES_CEILING: u32 = 8;
pub const MAX_TOPICS: usize = 2;
const MIN_EVIDENCE_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateLedgerPolicy {
    /// Refuse to pick; surface `AmbiguousLedger`.
    #[default]
    Error,
    /// Use the most recently created qualifying comment.
    Newest,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_self_retries: u32,
    pub non_blocking_skip_reasons: Vec<String>,
    pub evidence_max_chars: usize,
    pub duplicate_ledger: DuplicateLedgerPolicy,
    pub check_emit_attempts: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_self_retries: DEFAULT_MAX_SELF_RETRIES,
            non_blocking_skip_reasons: default_non_blocking_skips().into_iter().collect(),
            evidence_max_chars: DEFAULT_EVIDENCE_MAX_CHARS,
            duplicate_ledger: DuplicateLedgerPolicy::Error,
            check_emit_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Github,
    #[default]
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    pub kind: HostKind,
    pub repo: Option<String>,
    pub db: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            kind: HostKind::Local,
            repo: None,
            db: format!("{}/{}", GATELEDGER_DIR, HOST_DB_NAME),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentConfig {
    pub name: String,
    pub flow: String,
    pub gate: String,
    pub on_success: String,
    pub on_failure: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub needs: Option<String>,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandSpec>,
}

impl AgentConfig {
    pub fn policy(&self, protocol: &ProtocolConfig) -> Result<RoutingPolicy, GateLedgerError> {
        Ok(RoutingPolicy::new(&self.on_success, &self.on_failure)?
            .with_non_blocking_skips(protocol.non_blocking_skip_reasons.iter().cloned()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default, rename = "agent")]
    pub agents: Vec<AgentConfig>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self, GateLedgerError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn agent(&self, name: &str) -> Result<&AgentConfig, GateLedgerError> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| GateLedgerError::NotFound(format!("agent '{}' is not configured", name)))
    }

    pub fn validate(&self) -> Result<(), GateLedgerError> {
        let p = &self.protocol;
        if p.max_self_retries > MAX_SELF_RETRIES_CEILING {
            return Err(GateLedgerError::Config(format!(
                "max_self_retries = {} exceeds the ceiling of {}",
                p.max_self_retries, MAX_SELF_RETRIES_CEILING
            )));
        }
        if p.check_emit_attempts == 0 {
            return Err(GateLedgerError::Config(
                "check_emit_attempts must be at least 1".to_string(),
            ));
        }
        if p.evidence_max_chars < MIN_EVIDENCE_CHARS {
            return Err(GateLedgerError::Config(format!(
                "evidence_max_chars must be at least {}",
                MIN_EVIDENCE_CHARS
            )));
        }
        if self.host.kind == HostKind::Github
            && self.host.repo.as_deref().is_none_or(|r| !r.contains('/'))
        {
            return Err(GateLedgerError::Config(
                "[host] kind = \"github\" requires repo = \"owner/name\"".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(GateLedgerError::Config(format!(
                    "agent '{}' is declared more than once",
                    agent.name
                )));
            }
            validate_agent(agent, p)?;
        }
        Ok(())
    }
}

fn validate_agent(agent: &AgentConfig, protocol: &ProtocolConfig) -> Result<(), GateLedgerError> {
    let ctx = |msg: String| GateLedgerError::Config(format!("agent '{}': {}", agent.name, msg));
    for (field, value) in [
        ("name", &agent.name),
        ("flow", &agent.flow),
        ("gate", &agent.gate),
    ] {
        if !is_name_token(value) {
            return Err(ctx(format!(
                "{} '{}' must be a non-empty token of [A-Za-z0-9._-]",
                field, value
            )));
        }
    }
    agent
        .policy(protocol)
        .map_err(|e| ctx(e.to_string()))?;
    if agent.commands.is_empty() {
        return Err(ctx("at least one [[agent.command]] is required".to_string()));
    }
    if agent.topics.len() > MAX_TOPICS {
        return Err(ctx(format!(
            "at most {} topics are allowed, got {}",
            MAX_TOPICS,
            agent.topics.len()
        )));
    }
    for label in agent.topics.iter().chain(agent.needs.iter()) {
        if label.is_empty() || label.contains(char::is_whitespace) {
            return Err(ctx(format!("label value '{}' must be a short token", label)));
        }
    }
    for command in &agent.commands {
        if command.program.trim().is_empty() {
            return Err(ctx("command program may not be empty".to_string()));
        }
        for pattern in command.require.iter().chain(command.forbid.iter()) {
            compile_pattern(pattern).map_err(|e| ctx(format!("invalid pattern '{}': {}", pattern, e)))?;
        }
    }
    Ok(())
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(GATELEDGER_DIR).join(CONFIG_FILE)
}

/// Loads the project config; a project without a config file gets defaults.
pub fn load_config(root: &Path) -> Result<Config, GateLedgerError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&path)?;
    Config::parse(&content)
}

pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, GateLedgerError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(GATELEDGER_DIR).is_dir() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(GateLedgerError::NotFound(
                "'.gateledger' directory not found in current or parent directories. Run `gateledger init` first.".to_string(),
            ));
        }
    }
}

/// Explicit flag wins, then the environment.
pub fn resolve_flow(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(FLOW_ENV).ok())
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
}
