//! Service error types.

use thiserror::Error;
use wicket_protocol::{ErrorCode, RemoteError};

use crate::blesser::ClaimCheck;

/// Failures while building a ticket or blessing
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("ticket '{0}' not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authority '{authority}' unavailable: {reason}")]
    AuthorityUnavailable { authority: String, reason: String },

    #[error("failed to initialize authority: {0}")]
    AuthorityInit(String),

    #[error("certificate issuance failed: {0}")]
    Issuance(String),

    #[error("failed to encode credentials: {0}")]
    Encoding(String),

    #[error("identity token rejected: {0}")]
    TokenInvalid(String),

    #[error("failed to decode identity claims: {0}")]
    ClaimsDecode(String),

    #[error("identity claims rejected: {0}")]
    ClaimsRejected(ClaimCheck),

    #[error("server misconfigured: {0}")]
    ServerMisconfigured(String),
}

impl ServiceError {
    /// Wire error code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::InvalidRequest(_) => ErrorCode::BadRequest,
            ServiceError::AuthorityUnavailable { .. } => ErrorCode::AuthorityUnavailable,
            ServiceError::AuthorityInit(_) => ErrorCode::AuthorityInitError,
            ServiceError::Issuance(_) => ErrorCode::IssuanceError,
            ServiceError::Encoding(_) => ErrorCode::Internal,
            ServiceError::TokenInvalid(_) => ErrorCode::TokenInvalid,
            ServiceError::ClaimsDecode(_) => ErrorCode::ClaimsDecodeError,
            ServiceError::ClaimsRejected(_) => ErrorCode::ClaimsRejected,
            ServiceError::ServerMisconfigured(_) => ErrorCode::ServerMisconfigured,
        }
    }
}

impl From<ServiceError> for RemoteError {
    fn from(err: ServiceError) -> Self {
        RemoteError::new(err.code(), err.to_string())
    }
}
