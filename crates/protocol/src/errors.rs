//! Ticket protocol error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ticket protocol errors
#[derive(Error, Debug)]
pub enum TicketProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Call cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid ticket name: {0}")]
    InvalidName(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl TicketProtocolError {
    /// Whether a fresh attempt of the same call may succeed.
    ///
    /// Only transport failures qualify. Remote errors are answers, and
    /// cancellation or deadline expiry end the call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TicketProtocolError::ConnectionFailed(_)
                | TicketProtocolError::ConnectionClosed
                | TicketProtocolError::Io(_)
        )
    }
}

impl From<wicket_common::ContextError> for TicketProtocolError {
    fn from(err: wicket_common::ContextError) -> Self {
        match err {
            wicket_common::ContextError::Cancelled => TicketProtocolError::Cancelled,
            wicket_common::ContextError::DeadlineExceeded => TicketProtocolError::Timeout,
        }
    }
}

/// Failure category reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    AuthorityUnavailable,
    AuthorityInitError,
    IssuanceError,
    TokenInvalid,
    ClaimsDecodeError,
    ClaimsRejected,
    ServerMisconfigured,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::AuthorityUnavailable => "authority_unavailable",
            ErrorCode::AuthorityInitError => "authority_init_error",
            ErrorCode::IssuanceError => "issuance_error",
            ErrorCode::TokenInvalid => "token_invalid",
            ErrorCode::ClaimsDecodeError => "claims_decode_error",
            ErrorCode::ClaimsRejected => "claims_rejected",
            ErrorCode::ServerMisconfigured => "server_misconfigured",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the server in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("server error ({code}): {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(TicketProtocolError::ConnectionFailed("refused".into()).is_transient());
        assert!(TicketProtocolError::ConnectionClosed.is_transient());
        assert!(TicketProtocolError::Io(std::io::Error::other("reset")).is_transient());

        assert!(!TicketProtocolError::Timeout.is_transient());
        assert!(!TicketProtocolError::Cancelled.is_transient());
        assert!(!TicketProtocolError::Tls("bad cert".into()).is_transient());
        assert!(
            !TicketProtocolError::Remote(RemoteError::new(ErrorCode::NotFound, "x")).is_transient()
        );
    }

    #[test]
    fn test_remote_error_wire_form() {
        let err = RemoteError::new(ErrorCode::ClaimsRejected, "hosted domain mismatch");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "claims_rejected");
        assert_eq!(value["message"], "hosted domain mismatch");
        assert_eq!(
            err.to_string(),
            "server error (claims_rejected): hosted domain mismatch"
        );
    }

    #[test]
    fn test_context_error_conversion() {
        let err: TicketProtocolError = wicket_common::ContextError::DeadlineExceeded.into();
        assert!(matches!(err, TicketProtocolError::Timeout));
        let err: TicketProtocolError = wicket_common::ContextError::Cancelled.into();
        assert!(matches!(err, TicketProtocolError::Cancelled));
    }
}
