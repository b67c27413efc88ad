//! Error types for the Knoema client.
//!
//! Every failure of a top-level operation surfaces as an [`Error`]. Failures of an
//! individual file transfer are described by [`TransferError`] and wrapped in
//! [`Error::Transfer`] together with the name of the file being written.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The platform answered with a non-success HTTP status.
    ///
    /// `message` is the response body with HTML markup removed.
    #[error("remote call failed: HTTP {status}: {message}")]
    RemoteCall { status: u16, message: String },

    /// A response body could not be decoded into the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The task was still pending or executing after the allowed number of polls.
    #[error("task did not reach a terminal state after {attempts} poll(s)")]
    PollBudgetExceeded { attempts: u32 },

    #[error("task was cancelled on the server")]
    TaskCancelled,

    /// The server reported the task as failed. The server message is kept verbatim.
    #[error("task failed: {}", .message.as_deref().unwrap_or("(no message)"))]
    TaskFailed { message: Option<String> },

    /// The server returned a status outside the task state machine.
    #[error("unexpected task status [{0}]")]
    UnexpectedStatus(String),

    /// A file transfer of a bulk unload failed.
    #[error("transfer of {name} failed: {source}")]
    Transfer {
        name: String,
        #[source]
        source: TransferError,
    },

    /// Invalid or missing client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure while calling the API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local filesystem failure outside of a file transfer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cause of a single failed file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn transfer(name: impl Into<String>, source: TransferError) -> Self {
        Self::Transfer {
            name: name.into(),
            source,
        }
    }

    /// HTTP status of a [`Error::RemoteCall`], if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteCall { status, .. } => Some(*status),
            _ => None,
        }
    }
}
