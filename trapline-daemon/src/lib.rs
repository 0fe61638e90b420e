//! Trapline daemon library.
//!
//! Exposes the daemon's building blocks for integration testing.
//! In production, `trapline-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod modules;
pub mod orchestrator;
pub mod pid;
pub mod reload;

pub use cli::{DaemonCli, Role};
pub use orchestrator::{DaemonOptions, Orchestrator};
