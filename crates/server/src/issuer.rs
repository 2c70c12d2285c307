//! TLS credential issuer.
//!
//! Resolves an authority, signs a fresh leaf and packages authority
//! certificate, leaf certificate and key as PEM. Every TLS ticket kind goes
//! through [`TlsIssuer::issue`]; kinds differ only in their key usages.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use pem::{EncodeConfig, LineEnding, Pem};
use rsa::pkcs1::EncodeRsaPrivateKey;
use tracing::{debug, info, warn};
use wicket_common::AuthorityRef;
use wicket_protocol::{KeyUsage, TicketKind, TlsCredentials};

use crate::authority::{AuthorityError, CertificateAuthority, DRIFT_MARGIN};
use crate::errors::ServiceError;
use crate::secrets::SecretStore;

/// Parameters of one issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    authority: AuthorityRef,
    common_name: String,
    ttl: Duration,
    subject_alt_names: Vec<String>,
    key_usages: Vec<KeyUsage>,
}

impl IssuanceRequest {
    pub fn new(
        authority: impl Into<AuthorityRef>,
        common_name: impl Into<String>,
        ttl: Duration,
        subject_alt_names: Vec<String>,
        key_usages: &[KeyUsage],
    ) -> Result<Self, ServiceError> {
        let common_name = common_name.into();
        if common_name.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "common name must not be empty".to_string(),
            ));
        }
        if ttl.is_zero() {
            return Err(ServiceError::InvalidRequest(
                "ttl must be positive".to_string(),
            ));
        }
        if key_usages.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "at least one key usage is required".to_string(),
            ));
        }

        let mut key_usages = key_usages.to_vec();
        key_usages.sort();
        key_usages.dedup();

        Ok(Self {
            authority: authority.into(),
            common_name,
            ttl,
            subject_alt_names,
            key_usages,
        })
    }

    /// Request with the key usages of a TLS ticket kind
    pub fn for_kind(
        kind: TicketKind,
        authority: impl Into<AuthorityRef>,
        common_name: impl Into<String>,
        ttl: Duration,
        subject_alt_names: Vec<String>,
    ) -> Result<Self, ServiceError> {
        if !kind.is_tls() {
            return Err(ServiceError::InvalidRequest(format!(
                "{} tickets carry no certificate",
                kind
            )));
        }
        Self::new(authority, common_name, ttl, subject_alt_names, kind.key_usage())
    }

    pub fn authority(&self) -> &AuthorityRef {
        &self.authority
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_usages(&self) -> &[KeyUsage] {
        &self.key_usages
    }

    /// Split SANs into IP addresses and DNS names
    fn split_sans(&self) -> (Vec<IpAddr>, Vec<String>) {
        let mut ips = Vec::new();
        let mut dns = Vec::new();
        for san in &self.subject_alt_names {
            match san.parse::<IpAddr>() {
                Ok(ip) => ips.push(ip),
                Err(_) => dns.push(san.clone()),
            }
        }
        (ips, dns)
    }
}

/// Issues TLS credentials from authorities held in a secret store.
///
/// Issuance is blocking CPU work (RSA key generation); async callers run it
/// on the blocking pool.
#[derive(Clone)]
pub struct TlsIssuer {
    store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for TlsIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIssuer").finish_non_exhaustive()
    }
}

impl TlsIssuer {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn issue(&self, request: &IssuanceRequest) -> Result<TlsCredentials, ServiceError> {
        let authority = request.authority();

        let material = self.store.lookup(authority).map_err(|e| {
            warn!(authority = %authority, error = %e, "Authority lookup failed");
            ServiceError::AuthorityUnavailable {
                authority: authority.to_string(),
                reason: e.to_string(),
            }
        })?;

        let ca = CertificateAuthority::init(&material, DRIFT_MARGIN).map_err(|e| {
            warn!(authority = %authority, error = %e, "Authority initialization failed");
            ServiceError::AuthorityInit(e.to_string())
        })?;

        let (ip_sans, dns_sans) = request.split_sans();
        let issued = ca
            .issue_with_key_usage(
                request.common_name(),
                request.ttl(),
                &ip_sans,
                &dns_sans,
                request.key_usages(),
            )
            .map_err(|e| match e {
                AuthorityError::Init(msg) => ServiceError::AuthorityInit(msg),
                AuthorityError::Issue(msg) => ServiceError::Issuance(msg),
            })?;

        let key_der = issued
            .key
            .to_pkcs1_der()
            .map_err(|e| ServiceError::Encoding(format!("private key: {}", e)))?;

        let credentials = TlsCredentials::new(
            encode_pem("CERTIFICATE", ca.cert_der().to_vec()),
            encode_pem("CERTIFICATE", issued.cert_der),
            encode_pem("RSA PRIVATE KEY", key_der.as_bytes().to_vec()),
        );

        info!(
            authority = %authority,
            common_name = %request.common_name(),
            ttl_secs = request.ttl().as_secs(),
            "Issued TLS credentials"
        );
        debug!(usages = ?request.key_usages(), "Issued key usages");
        Ok(credentials)
    }
}

fn encode_pem(tag: &str, der: Vec<u8>) -> String {
    pem::encode_config(
        &Pem::new(tag, der),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}
