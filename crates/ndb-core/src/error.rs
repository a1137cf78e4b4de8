// ── Core error types ──
//
// Caller-facing errors from ndb-core. Channel failures are translated by
// the `From<ndb_api::Error>` impl: origin rejections keep their errno,
// everything else is wrapped as a channel fault.

use ndb_api::Kind;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum NdbError {
    // ── Source errors ────────────────────────────────────────────────
    #[error("Source {target} is unreachable: {reason}")]
    SourceUnreachable { target: String, reason: String },

    #[error("Unknown source: {target}")]
    UnknownSource { target: String },

    #[error("Source already connected: {target}")]
    SourceExists { target: String },

    // ── Request errors ───────────────────────────────────────────────
    /// The owning source refused an operation; `code` is its errno.
    #[error("Request rejected by source: {message} (errno {code})")]
    RequestRejected { code: i32, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Channel error: {0}")]
    Channel(ndb_api::Error),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{kind} not found: {selector}")]
    NotFound { kind: Kind, selector: String },

    #[error("Dependency cycle among staged changes: {path}")]
    DependencyCycle { path: String },

    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    // ── Storage errors ───────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl NdbError {
    /// The origin errno for rejected requests.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::RequestRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn not_found(kind: Kind, selector: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            selector: selector.to_string(),
        }
    }
}

impl From<ndb_api::Error> for NdbError {
    fn from(err: ndb_api::Error) -> Self {
        match err {
            ndb_api::Error::Rejected { code, message } => Self::RequestRejected { code, message },
            other => Self::Channel(other),
        }
    }
}
