//! CLI argument definitions for trapline-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Trapline alert pipeline daemon.
///
/// Runs the rule matching engine and/or the webhook forwarder against a
/// shared store. Several replicas may run side by side against the same store.
#[derive(Parser, Debug)]
#[command(name = "trapline-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to trapline.toml configuration file.
    #[arg(short, long, default_value = "/etc/trapline/trapline.toml")]
    pub config: PathBuf,

    /// Which modules this replica runs.
    #[arg(long, value_enum, default_value_t = Role::All)]
    pub role: Role,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Base worker identity. Modules append `-matcher` / `-forwarder`.
    #[arg(long)]
    pub worker_id: Option<String>,
}

/// Module selection for a daemon replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Consume the ingest queue only.
    Matcher,
    /// Consume the alert queue only.
    Forwarder,
    /// Run both modules.
    All,
}

impl Role {
    /// Whether the matching engine runs under this role.
    pub fn runs_matcher(self) -> bool {
        matches!(self, Self::Matcher | Self::All)
    }

    /// Whether the forwarder runs under this role.
    pub fn runs_forwarder(self) -> bool {
        matches!(self, Self::Forwarder | Self::All)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matcher => "matcher",
            Self::Forwarder => "forwarder",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::try_parse_from(["trapline-daemon"]).unwrap();
        assert_eq!(cli.role, Role::All);
        assert_eq!(cli.config, PathBuf::from("/etc/trapline/trapline.toml"));
        assert!(!cli.validate);
        assert!(cli.worker_id.is_none());
    }

    #[test]
    fn role_flag() {
        let cli = DaemonCli::try_parse_from([
            "trapline-daemon",
            "--role",
            "forwarder",
            "--worker-id",
            "edge-1",
        ])
        .unwrap();
        assert_eq!(cli.role, Role::Forwarder);
        assert!(!cli.role.runs_matcher());
        assert!(cli.role.runs_forwarder());
        assert_eq!(cli.worker_id.as_deref(), Some("edge-1"));
    }

    #[test]
    fn unknown_role_rejected() {
        assert!(DaemonCli::try_parse_from(["trapline-daemon", "--role", "janitor"]).is_err());
    }
}
