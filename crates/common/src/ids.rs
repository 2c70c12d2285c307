//! Type-safe identifier newtypes for Wicket.
//!
//! These types keep request identifiers and signing-authority references
//! apart at compile time (e.g., passing a RequestId where an AuthorityRef
//! is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique request ID for log correlation.
///
/// Generated by the server for every RPC it handles and attached to every
/// log line emitted while serving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a signing authority held by the secret store.
///
/// The reference is opaque to everything except the secret store that
/// resolves it, e.g. `docker-ca` or `tls/internal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorityRef(String);

impl AuthorityRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthorityRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id() {
        let id1 = RequestId::new();
        let id2 = RequestId::from_string("test-id");

        assert_ne!(id1, id2);
        assert_eq!(id2.as_str(), "test-id");
        assert_eq!(id2.to_string(), "test-id");
    }

    #[test]
    fn test_authority_ref_serializes_as_plain_string() {
        let reference = AuthorityRef::new("docker-ca");
        assert_eq!(reference.as_str(), "docker-ca");
        assert_eq!(serde_json::to_string(&reference).unwrap(), "\"docker-ca\"");
    }
}
