//! Protocol primitives and the per-invocation pipeline.
//!
//! Leaf modules (`status`, `routing`, `retry`, `ledger`) are pure. Effects go
//! through the `host` traits, the `gate_runner` executor, and the audit log.

pub mod assets;
pub mod check_run;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod evidence;
pub mod flow_guard;
pub mod gate_runner;
pub mod host;
pub mod labels;
pub mod ledger;
pub mod ledger_store;
pub mod pipeline;
pub mod retry;
pub mod routing;
pub mod schemas;
pub mod status;
pub mod time;
