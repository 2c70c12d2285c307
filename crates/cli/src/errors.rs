//! Client error types.

use thiserror::Error;
use wicket_protocol::TicketProtocolError;

/// Exit status for malformed invocations
pub const USAGE_EXIT_CODE: u8 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    /// Malformed invocation; no request was made
    #[error("usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Rpc(#[from] TicketProtocolError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render ticket: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.to_string(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) => USAGE_EXIT_CODE,
            _ => 1,
        }
    }
}
