//! trapline-cli: operator tooling for the trapline pipeline
//!
//! The `trapline` binary is a thin wrapper over [`commands::dispatch`]; the
//! handlers are exposed here so they can be driven against a [`trapline_store::MemoryStore`]
//! in tests.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod store;

pub use cli::{Cli, OutputFormat};
pub use error::CliError;
pub use output::{OutputWriter, Render};
