//! Code host backends behind the `core::host` traits.

pub mod github;
pub mod local;
