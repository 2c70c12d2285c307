//! OpenID Connect ID token verification.
//!
//! Keys come from the issuer's discovery document
//! (`<issuer>/.well-known/openid-configuration` -> `jwks_uri`). They are
//! fetched once at startup; a token signed with an unknown `kid` triggers a
//! single refetch, which is how key rotation is picked up.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};
use wicket_common::{wait_for_next_attempt, CallContext, RetryPolicy, WaitError};

use crate::blesser::{TokenError, TokenVerifier, VerifiedToken};

/// Google's issuer, in the form used by discovery
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// RS256 ID token verifier backed by an issuer's published key set
pub struct OidcVerifier {
    http: reqwest::Client,
    jwks_uri: Option<String>,
    keys: RwLock<JwkSet>,
    validation: Validation,
}

impl std::fmt::Debug for OidcVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcVerifier")
            .field("jwks_uri", &self.jwks_uri)
            .field("keys", &self.keys.read().keys.len())
            .finish()
    }
}

impl OidcVerifier {
    /// Discover the issuer's key set, retrying transient failures
    pub async fn discover(
        issuer: &str,
        audience: &str,
        ctx: &CallContext,
        retry: &dyn RetryPolicy,
    ) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| TokenError::KeySetUnavailable(e.to_string()))?;
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        let mut attempt = 0;
        let (jwks_uri, keys) = loop {
            let fetched = ctx
                .run(async {
                    let jwks_uri = fetch_jwks_uri(&http, &discovery_url).await?;
                    let keys = fetch_key_set(&http, &jwks_uri).await?;
                    Ok::<_, TokenError>((jwks_uri, keys))
                })
                .await
                .map_err(|e| TokenError::KeySetUnavailable(e.to_string()))?;

            let err = match fetched {
                Ok(found) => break found,
                Err(err) => err,
            };
            warn!(url = %discovery_url, attempt = attempt, error = %err, "Key discovery failed");
            match wait_for_next_attempt(ctx, retry, attempt).await {
                Ok(()) => attempt += 1,
                Err(WaitError::Exhausted { .. }) => return Err(err),
                Err(e) => return Err(TokenError::KeySetUnavailable(e.to_string())),
            }
        };

        info!(issuer = %issuer, jwks_uri = %jwks_uri, keys = keys.keys.len(), "Loaded issuer signing keys");
        Ok(Self {
            http,
            jwks_uri: Some(jwks_uri),
            keys: RwLock::new(keys),
            validation: validation(issuer, audience),
        })
    }

    /// Verifier over a fixed key set; unknown keys are never refetched
    pub fn from_jwks(keys: JwkSet, issuer: &str, audience: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            jwks_uri: None,
            keys: RwLock::new(keys),
            validation: validation(issuer, audience),
        }
    }

    fn decoding_key(&self, kid: &str) -> Option<Result<DecodingKey, TokenError>> {
        self.keys.read().find(kid).map(|jwk| {
            DecodingKey::from_jwk(jwk).map_err(|e| TokenError::UnknownKey(format!("{}: {}", kid, e)))
        })
    }

    async fn refresh(&self) -> Result<(), TokenError> {
        let Some(jwks_uri) = &self.jwks_uri else {
            return Ok(());
        };
        let keys = fetch_key_set(&self.http, jwks_uri).await?;
        debug!(jwks_uri = %jwks_uri, keys = keys.keys.len(), "Refreshed issuer signing keys");
        *self.keys.write() = keys;
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, raw: &str) -> Result<VerifiedToken, TokenError> {
        let header =
            jsonwebtoken::decode_header(raw).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::Invalid(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| TokenError::Malformed("token has no kid".to_string()))?;

        let key = match self.decoding_key(&kid) {
            Some(key) => key?,
            None => {
                self.refresh().await?;
                self.decoding_key(&kid)
                    .ok_or_else(|| TokenError::UnknownKey(kid.clone()))??
            }
        };

        let data = jsonwebtoken::decode::<serde_json::Value>(raw, &key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed(e.to_string()),
                _ => TokenError::Invalid(e.to_string()),
            })?;
        Ok(VerifiedToken { claims: data.claims })
    }
}

fn validation(issuer: &str, audience: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[audience]);
    // Google signs tokens with either form of its issuer
    if issuer == GOOGLE_ISSUER {
        validation.set_issuer(&[GOOGLE_ISSUER, "accounts.google.com"]);
    } else {
        validation.set_issuer(&[issuer]);
    }
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);
    validation
}

async fn fetch_jwks_uri(http: &reqwest::Client, url: &str) -> Result<String, TokenError> {
    let doc: DiscoveryDocument = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TokenError::KeySetUnavailable(e.to_string()))?
        .json()
        .await
        .map_err(|e| TokenError::KeySetUnavailable(format!("bad discovery document: {}", e)))?;
    Ok(doc.jwks_uri)
}

async fn fetch_key_set(http: &reqwest::Client, url: &str) -> Result<JwkSet, TokenError> {
    http.get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TokenError::KeySetUnavailable(e.to_string()))?
        .json()
        .await
        .map_err(|e| TokenError::KeySetUnavailable(format!("bad key set: {}", e)))
}
