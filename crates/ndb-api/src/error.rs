use thiserror::Error;

use crate::errno;

/// Top-level error type for the `ndb-api` crate.
///
/// Covers every failure a channel can report: origin rejections carrying
/// an errno, transport I/O, and proxy protocol violations. `ndb-core`
/// maps these into caller-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Origin ──────────────────────────────────────────────────────
    /// The source refused the request. `code` is the origin's errno,
    /// passed through unchanged.
    #[error("{message} (errno {code})")]
    Rejected { code: i32, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// The channel was closed locally or the peer went away.
    #[error("Channel closed")]
    Closed,

    /// The live stream fell behind and events were lost. The consumer's
    /// view is stale until it re-reads the full state.
    #[error("Event stream lagged, {skipped} events lost")]
    Lagged { skipped: u64 },

    /// Socket or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Protocol ────────────────────────────────────────────────────
    /// A frame could not be encoded or decoded.
    #[error("Failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The peer answered with something the protocol does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Build a rejection with the standard message for `code`.
    pub fn rejected(code: i32) -> Self {
        Self::Rejected {
            code,
            message: errno::describe(code).to_owned(),
        }
    }

    /// The origin errno, if this is a rejection.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io(e),
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => {
                Self::Protocol("frame exceeds maximum length".into())
            }
        }
    }
}
