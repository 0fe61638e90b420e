//! CLI-specific error types and exit code mapping

use trapline_core::error::TraplineError;
use trapline_store::StoreError;

/// CLI error.
///
/// `exit_code()` maps each variant to the process exit status.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The shared store cannot be reached or is not configured for this tool.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store operation failed after connecting.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rule files failed to parse or compile.
    #[error("rule error: {0}")]
    Rule(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from trapline-core.
    #[error("{0}")]
    Core(#[from] TraplineError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                 |
    /// |------|-------------------------|
    /// | 0    | Success                 |
    /// | 1    | General / command error |
    /// | 2    | Configuration error     |
    /// | 3    | Store unreachable       |
    /// | 10   | IO error                |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::StoreUnavailable(_) | Self::Store(_) => 3,
            Self::Io(_) => 10,
            Self::Core(TraplineError::Config(_)) => 2,
            Self::Core(TraplineError::Storage(_)) => 3,
            Self::Core(TraplineError::Io(_)) => 10,
            Self::Command(_) | Self::Rule(_) | Self::JsonSerialize(_) | Self::Core(_) => 1,
        }
    }
}

impl From<trapline_core::error::ParseError> for CliError {
    fn from(e: trapline_core::error::ParseError) -> Self {
        Self::Core(TraplineError::Parse(e))
    }
}

impl From<trapline_matcher::MatcherError> for CliError {
    fn from(e: trapline_matcher::MatcherError) -> Self {
        Self::Rule(e.to_string())
    }
}
