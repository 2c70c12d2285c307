//! Delegated, expiring capabilities ("blessings").
//!
//! A [`Blessing`] binds an issuer's trust to a subject's public key under a
//! named scope. The issuer is a local [`Principal`]: a blessing name plus an
//! Ed25519 signing key. The blessing name grows by one extension per
//! delegation, joined with [`CHAIN_SEPARATOR`]:
//!
//! ```text
//! issuer "wicket" + extension "google:alice@example.com"
//!     => blessing "wicket:google:alice@example.com"
//! ```
//!
//! Every blessing carries at least one [`Caveat`]; verifiers must check all
//! of them before honouring it. The signature covers every field except
//! itself, encoded as canonical JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between the components of a blessing name.
pub const CHAIN_SEPARATOR: &str = ":";

/// Blessing construction and verification errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlessingError {
    #[error("invalid blessing extension: {0}")]
    InvalidExtension(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("blessing signature does not verify")]
    BadSignature,

    #[error("blessing expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Restriction attached to a blessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Caveat {
    /// Valid only until `not_after`
    Expiry { not_after: DateTime<Utc> },
}

impl Caveat {
    /// Expiry caveat at the given instant
    pub fn expiry(not_after: DateTime<Utc>) -> Self {
        Caveat::Expiry { not_after }
    }

    /// Check the caveat against the current time
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), BlessingError> {
        match self {
            Caveat::Expiry { not_after } if now >= *not_after => {
                Err(BlessingError::Expired(*not_after))
            }
            Caveat::Expiry { .. } => Ok(()),
        }
    }
}

/// A signed delegation from an issuer principal to a subject key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blessing {
    /// Full blessing name (`issuer` + separator + `extension`)
    pub name: String,
    /// Scope granted by this delegation
    pub extension: String,
    /// Blessing name of the issuing principal
    pub issuer: String,
    /// Ed25519 public key of the issuer
    #[serde(with = "crate::serde_b64")]
    pub issuer_public_key: Vec<u8>,
    /// Subject public key (DER SubjectPublicKeyInfo)
    #[serde(with = "crate::serde_b64")]
    pub subject_public_key: Vec<u8>,
    /// Conditions that must all hold for the blessing to be honoured
    pub caveats: Vec<Caveat>,
    /// Issuer signature over every other field
    #[serde(with = "crate::serde_b64")]
    pub signature: Vec<u8>,
}

/// The signed portion of a blessing, in a fixed field order.
#[derive(Serialize)]
struct SignedFields<'a> {
    name: &'a str,
    extension: &'a str,
    issuer: &'a str,
    issuer_public_key: String,
    subject_public_key: String,
    caveats: &'a [Caveat],
}

fn signing_payload(
    name: &str,
    extension: &str,
    issuer: &str,
    issuer_public_key: &[u8],
    subject_public_key: &[u8],
    caveats: &[Caveat],
) -> Result<Vec<u8>, BlessingError> {
    let fields = SignedFields {
        name,
        extension,
        issuer,
        issuer_public_key: BASE64.encode(issuer_public_key),
        subject_public_key: BASE64.encode(subject_public_key),
        caveats,
    };
    serde_json::to_vec(&fields).map_err(|e| BlessingError::Serialization(e.to_string()))
}

impl Blessing {
    /// Check the issuer signature and every caveat.
    pub fn verify(&self, now: DateTime<Utc>) -> Result<(), BlessingError> {
        let key_bytes: [u8; 32] = self
            .issuer_public_key
            .as_slice()
            .try_into()
            .map_err(|_| BlessingError::InvalidKey("issuer key must be 32 bytes".to_string()))?;
        let issuer_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| BlessingError::InvalidKey(e.to_string()))?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| BlessingError::BadSignature)?;

        let expected_name = [self.issuer.as_str(), self.extension.as_str()].join(CHAIN_SEPARATOR);
        if self.name != expected_name {
            return Err(BlessingError::BadSignature);
        }

        let payload = signing_payload(
            &self.name,
            &self.extension,
            &self.issuer,
            &self.issuer_public_key,
            &self.subject_public_key,
            &self.caveats,
        )?;
        issuer_key
            .verify(&payload, &signature)
            .map_err(|_| BlessingError::BadSignature)?;

        for caveat in &self.caveats {
            caveat.check(now)?;
        }
        Ok(())
    }

    /// Earliest expiry among the caveats
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.caveats
            .iter()
            .map(|caveat| match caveat {
                Caveat::Expiry { not_after } => *not_after,
            })
            .min()
    }
}

impl fmt::Display for Blessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A local signing identity able to delegate blessings.
pub struct Principal {
    name: String,
    signing_key: SigningKey,
}

impl Principal {
    /// Create a principal from its blessing name and signing key
    pub fn new(name: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            name: name.into(),
            signing_key,
        }
    }

    /// Create a principal with a fresh random key
    pub fn generate(name: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::new(name, signing_key)
    }

    /// Create a principal from a base64-encoded 32-byte Ed25519 seed
    pub fn from_seed_base64(name: impl Into<String>, seed: &str) -> Result<Self, BlessingError> {
        let bytes = BASE64
            .decode(seed.trim())
            .map_err(|e| BlessingError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| BlessingError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::new(name, SigningKey::from_bytes(&seed)))
    }

    /// Blessing name of this principal
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ed25519 public key of this principal
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Delegate a blessing to `subject_public_key`, scoped by `extension`.
    pub fn bless(
        &self,
        subject_public_key: &[u8],
        extension: &str,
        caveat: Caveat,
    ) -> Result<Blessing, BlessingError> {
        if extension.is_empty()
            || extension.starts_with(CHAIN_SEPARATOR)
            || extension.ends_with(CHAIN_SEPARATOR)
        {
            return Err(BlessingError::InvalidExtension(extension.to_string()));
        }
        if subject_public_key.is_empty() {
            return Err(BlessingError::InvalidKey("empty subject key".to_string()));
        }

        let name = [self.name.as_str(), extension].join(CHAIN_SEPARATOR);
        let issuer_public_key = self.public_key().to_vec();
        let caveats = vec![caveat];
        let payload = signing_payload(
            &name,
            extension,
            &self.name,
            &issuer_public_key,
            subject_public_key,
            &caveats,
        )?;
        let signature = self.signing_key.sign(&payload);

        Ok(Blessing {
            name,
            extension: extension.to_string(),
            issuer: self.name.clone(),
            issuer_public_key,
            subject_public_key: subject_public_key.to_vec(),
            caveats,
            signature: signature.to_bytes().to_vec(),
        })
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("public_key", &BASE64.encode(self.public_key()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mint(principal: &Principal, lifetime: Duration) -> Blessing {
        principal
            .bless(
                b"subject-spki",
                "google:alice@example.com",
                Caveat::expiry(Utc::now() + lifetime),
            )
            .unwrap()
    }

    #[test]
    fn test_bless_builds_chained_name() {
        let principal = Principal::generate("wicket");
        let blessing = mint(&principal, Duration::hours(1));

        assert_eq!(blessing.name, "wicket:google:alice@example.com");
        assert_eq!(blessing.issuer, "wicket");
        assert_eq!(blessing.subject_public_key, b"subject-spki");
        assert_eq!(blessing.issuer_public_key, principal.public_key().to_vec());
        assert!(blessing.verify(Utc::now()).is_ok());
    }

    #[test]
    fn test_expired_blessing_fails_verification() {
        let principal = Principal::generate("wicket");
        let blessing = mint(&principal, Duration::minutes(5));

        let later = Utc::now() + Duration::minutes(10);
        assert!(matches!(
            blessing.verify(later),
            Err(BlessingError::Expired(_))
        ));
        assert_eq!(blessing.expiry(), Some(match &blessing.caveats[0] {
            Caveat::Expiry { not_after } => *not_after,
        }));
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let principal = Principal::generate("wicket");

        let mut widened = mint(&principal, Duration::hours(1));
        widened.caveats = vec![Caveat::expiry(Utc::now() + Duration::days(365))];
        assert_eq!(widened.verify(Utc::now()), Err(BlessingError::BadSignature));

        let mut rebound = mint(&principal, Duration::hours(1));
        rebound.subject_public_key = b"attacker-spki".to_vec();
        assert_eq!(rebound.verify(Utc::now()), Err(BlessingError::BadSignature));

        let mut renamed = mint(&principal, Duration::hours(1));
        renamed.name = "wicket:google:mallory@example.com".to_string();
        assert_eq!(renamed.verify(Utc::now()), Err(BlessingError::BadSignature));
    }

    #[test]
    fn test_rejects_malformed_extension() {
        let principal = Principal::generate("wicket");
        let caveat = Caveat::expiry(Utc::now() + Duration::hours(1));

        for extension in ["", ":google", "google:"] {
            assert!(matches!(
                principal.bless(b"k", extension, caveat.clone()),
                Err(BlessingError::InvalidExtension(_))
            ));
        }
    }

    #[test]
    fn test_principal_from_seed() {
        let seed = BASE64.encode([7u8; 32]);
        let a = Principal::from_seed_base64("wicket", &seed).unwrap();
        let b = Principal::from_seed_base64("wicket", &format!("{seed}\n")).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        assert!(Principal::from_seed_base64("wicket", "c2hvcnQ=").is_err());
        assert!(!format!("{:?}", a).contains(&seed));
    }

    #[test]
    fn test_blessing_json_round_trip_still_verifies() {
        let principal = Principal::generate("wicket");
        let blessing = mint(&principal, Duration::hours(1));

        let json = serde_json::to_string(&blessing).unwrap();
        let decoded: Blessing = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, blessing);
        assert!(decoded.verify(Utc::now()).is_ok());
    }
}
