//! CLI struct definitions for the gateledger command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "gateledger",
    version = env!("CARGO_PKG_VERSION"),
    about = "Runs one quality gate for an agent, records the outcome in the shared Ledger comment, and prints where the work goes next."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create `.gateledger/` with a default config
    Init(InitCli),
    /// Run one agent invocation: guard, gate, ledger, check run, routing
    Run(RunCli),
    /// Inspect or create the Ledger comment of a change request
    Ledger(LedgerCli),
    /// Evaluate the router for a hypothetical outcome (no side effects)
    Route(RouteCli),
    /// List configured agents and their routing targets
    Agents(FormatCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Project directory (defaults to the current directory).
    #[clap(long)]
    pub dir: Option<PathBuf>,
    /// Overwrite an existing config.
    #[clap(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunCli {
    /// Agent name from `[[agent]]` in the config.
    #[clap(long)]
    pub agent: String,
    /// Change request (pull request) number.
    #[clap(long)]
    pub pr: u64,
    /// Commit the check run is attached to.
    #[clap(long = "head-sha")]
    pub head_sha: String,
    /// Ambient flow context; falls back to $GATELEDGER_FLOW.
    #[clap(long)]
    pub flow: Option<String>,
    /// Reconcile flow/state/topic/needs labels after committing.
    #[clap(long)]
    pub labels: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct LedgerCli {
    #[clap(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum LedgerCommand {
    /// Print the parsed Ledger
    Show {
        #[clap(long)]
        pr: u64,
        /// Output format: 'text', 'json' or 'raw'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Locate the Ledger, creating it from the template if absent
    Init {
        #[clap(long)]
        pr: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum StatusArg {
    Pass,
    Fail,
    Skipped,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RouteCli {
    #[clap(long, value_enum)]
    pub status: StatusArg,
    /// Skip reason; required with `--status skipped`.
    #[clap(long)]
    pub reason: Option<String>,
    #[clap(long)]
    pub agent: String,
    #[clap(long)]
    pub gate: String,
    /// Self-retries already spent.
    #[clap(long, default_value_t = 0)]
    pub attempts: u32,
    /// Self-retry bound.
    #[clap(long, default_value_t = crate::core::retry::DEFAULT_MAX_SELF_RETRIES)]
    pub limit: u32,
    #[clap(long = "on-success")]
    pub on_success: String,
    #[clap(long = "on-failure")]
    pub on_failure: String,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct FormatCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}
