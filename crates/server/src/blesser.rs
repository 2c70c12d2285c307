//! Identity blesser: exchanges a Google ID token for a blessing.
//!
//! Each call walks the same stages and keeps no state between calls:
//!
//! ```text
//! verify token -> decode claims -> check claims -> mint blessing
//! ```
//!
//! The blessing is bound to the caller's TLS client key, so the listener
//! must demand client certificates for this to be useful.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use wicket_protocol::{Blessing, CallInfo, Caveat, CHAIN_SEPARATOR};

use crate::errors::ServiceError;

/// Blessing extension namespace for Google identities
pub const GOOGLE_EXTENSION_PREFIX: &str = "google";

// ============================================================================
// Token verification
// ============================================================================

/// Token verification failures
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("untrusted signing key: {0}")]
    UnknownKey(String),

    #[error("signature or claim validation failed: {0}")]
    Invalid(String),

    #[error("key set unavailable: {0}")]
    KeySetUnavailable(String),
}

/// Claims of a token whose signature, issuer, audience and expiry checked out
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub claims: serde_json::Value,
}

/// Verifies raw ID tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw: &str) -> Result<VerifiedToken, TokenError>;
}

// ============================================================================
// Claims
// ============================================================================

/// Identity claims the blesser looks at
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub email_verified: bool,
    #[serde(rename = "hd", default)]
    pub hosted_domain: String,
    pub email: String,
}

/// A claim check that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimCheck {
    EmailNotVerified,
    HostedDomain,
    EmailSuffix,
}

impl fmt::Display for ClaimCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimCheck::EmailNotVerified => f.write_str("email address is not verified"),
            ClaimCheck::HostedDomain => f.write_str("hosted domain does not match"),
            ClaimCheck::EmailSuffix => f.write_str("email address is outside the tenant"),
        }
    }
}

/// Tenant restrictions applied to the claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub hosted_domain: String,
    pub email_suffix: String,
}

impl ClaimPolicy {
    pub fn new(hosted_domain: impl Into<String>, email_suffix: impl Into<String>) -> Self {
        Self {
            hosted_domain: hosted_domain.into(),
            email_suffix: email_suffix.into(),
        }
    }

    /// Checks run in order; the first failure is reported
    pub fn check(&self, claims: &IdentityClaims) -> Result<(), ClaimCheck> {
        if !claims.email_verified {
            return Err(ClaimCheck::EmailNotVerified);
        }
        if claims.hosted_domain != self.hosted_domain {
            return Err(ClaimCheck::HostedDomain);
        }
        if !claims.email.ends_with(&self.email_suffix) {
            return Err(ClaimCheck::EmailSuffix);
        }
        Ok(())
    }
}

// ============================================================================
// Blesser
// ============================================================================

/// Exchanges verified Google identities for blessings
pub struct GoogleBlesser {
    verifier: Arc<dyn TokenVerifier>,
    policy: ClaimPolicy,
    expiration: Duration,
}

impl fmt::Debug for GoogleBlesser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleBlesser")
            .field("policy", &self.policy)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl GoogleBlesser {
    pub fn new(verifier: Arc<dyn TokenVerifier>, policy: ClaimPolicy, expiration: Duration) -> Self {
        Self {
            verifier,
            policy,
            expiration,
        }
    }

    pub async fn bless(&self, call: &CallInfo, id_token: &str) -> Result<Blessing, ServiceError> {
        debug!(
            remote = %call.remote_addr,
            token_bytes = id_token.len(),
            "Blessing request received"
        );

        let verified = self.verifier.verify(id_token).await.map_err(|e| {
            warn!(remote = %call.remote_addr, error = %e, "Rejected identity token");
            ServiceError::TokenInvalid(e.to_string())
        })?;

        let claims: IdentityClaims = serde_json::from_value(verified.claims).map_err(|e| {
            warn!(remote = %call.remote_addr, error = %e, "Undecodable identity claims");
            ServiceError::ClaimsDecode(e.to_string())
        })?;

        self.policy.check(&claims).map_err(|check| {
            warn!(
                remote = %call.remote_addr,
                email = %claims.email,
                hosted_domain = %claims.hosted_domain,
                check = %check,
                "Rejected identity claims"
            );
            ServiceError::ClaimsRejected(check)
        })?;

        let principal = call.local_principal.as_ref().ok_or_else(|| {
            warn!(remote = %call.remote_addr, "No local principal to bless with");
            ServiceError::ServerMisconfigured("server has no signing identity".to_string())
        })?;
        let subject_key = call.remote_public_key.as_deref().ok_or_else(|| {
            warn!(remote = %call.remote_addr, "Caller presented no client certificate");
            ServiceError::ServerMisconfigured(
                "caller has no TLS client key to bless".to_string(),
            )
        })?;

        let lifetime = chrono::Duration::from_std(self.expiration)
            .map_err(|e| ServiceError::ServerMisconfigured(format!("expiration: {}", e)))?;
        let not_after = Utc::now()
            .checked_add_signed(lifetime)
            .ok_or_else(|| ServiceError::ServerMisconfigured("expiration overflows".into()))?;

        let extension = [GOOGLE_EXTENSION_PREFIX, claims.email.as_str()].join(CHAIN_SEPARATOR);
        let blessing = principal
            .bless(subject_key, &extension, Caveat::expiry(not_after))
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

        info!(
            remote = %call.remote_addr,
            blessing = %blessing,
            not_after = %not_after,
            "Blessed Google identity"
        );
        Ok(blessing)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Verifier returning fixed claims, or rejecting everything
    pub struct StaticVerifier(pub Option<serde_json::Value>);

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, _raw: &str) -> Result<VerifiedToken, TokenError> {
            self.0
                .clone()
                .map(|claims| VerifiedToken { claims })
                .ok_or_else(|| TokenError::Invalid("bad signature".into()))
        }
    }
}
