//! CLI error types with miette diagnostics.
//!
//! Maps `NdbError` and config failures into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use ndb_core::NdbError;
use thiserror::Error;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Sources ──────────────────────────────────────────────────────

    #[error("Could not connect source {target}: {reason}")]
    #[diagnostic(
        code(ndb::source_unreachable),
        help(
            "Check the source url in your config.\n\
             A tcp:// source needs a running `ndb serve --listen host:port`."
        )
    )]
    SourceUnreachable { target: String, reason: String },

    #[error("No source is connected for target '{target}'")]
    #[diagnostic(
        code(ndb::unknown_source),
        help("Run: ndb sources to see connected targets")
    )]
    UnknownSource { target: String },

    // ── Records ──────────────────────────────────────────────────────

    #[error("{kind} '{selector}' not found")]
    #[diagnostic(
        code(ndb::not_found),
        help("Run: ndb show {kind} to see what exists")
    )]
    NotFound { kind: String, selector: String },

    #[error("Source rejected the request: {message} (errno {code})")]
    #[diagnostic(code(ndb::rejected))]
    Rejected { code: i32, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    #[diagnostic(
        code(ndb::timeout),
        help("Raise request_timeout_ms in the config if the source is slow.")
    )]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Staged changes depend on each other: {path}")]
    #[diagnostic(code(ndb::dependency_cycle))]
    DependencyCycle { path: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ndb::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(ndb::config),
        help("Run: ndb config path to see which file was read")
    )]
    Config(#[from] ndb_config::ConfigError),

    // ── Everything else ──────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(ndb::core))]
    Core(NdbError),

    #[error(transparent)]
    #[diagnostic(code(ndb::channel))]
    Channel(#[from] ndb_api::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(ndb::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(ndb::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SourceUnreachable { .. } | Self::UnknownSource { .. } | Self::Channel(_) => {
                exit_code::CONNECTION
            }
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(_) | Self::DependencyCycle { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── NdbError → CliError mapping ──────────────────────────────────────

impl From<NdbError> for CliError {
    fn from(err: NdbError) -> Self {
        match err {
            NdbError::SourceUnreachable { target, reason } => {
                Self::SourceUnreachable { target, reason }
            }
            NdbError::UnknownSource { target } => Self::UnknownSource { target },
            NdbError::NotFound { kind, selector } => Self::NotFound {
                kind: kind.to_string(),
                selector,
            },
            NdbError::RequestRejected { code, message } => Self::Rejected { code, message },
            NdbError::Timeout {
                operation,
                timeout_ms,
            } => Self::Timeout {
                operation,
                timeout_ms,
            },
            NdbError::DependencyCycle { path } => Self::DependencyCycle { path },
            NdbError::InvalidRecord { message } => Self::Validation {
                field: "record".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}
