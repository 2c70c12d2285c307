//! TLS credential bundle carried by TLS-based tickets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extended key usage a leaf certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    /// TLS WWW server authentication
    ServerAuth,
    /// TLS WWW client authentication
    ClientAuth,
}

impl KeyUsage {
    /// Both usages, in canonical order
    pub const BOTH: [KeyUsage; 2] = [KeyUsage::ServerAuth, KeyUsage::ClientAuth];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::ServerAuth => "server_auth",
            KeyUsage::ClientAuth => "client_auth",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PEM-encoded authority certificate, leaf certificate and private key.
///
/// The three blobs are always produced together by one issuance; a bundle
/// with only some of them filled in is never constructed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCredentials {
    /// Certificate of the authority that signed `cert`
    pub authority_cert: String,
    /// Leaf certificate
    pub cert: String,
    /// Leaf private key (`RSA PRIVATE KEY`)
    pub key: String,
}

impl TlsCredentials {
    pub fn new(
        authority_cert: impl Into<String>,
        cert: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            authority_cert: authority_cert.into(),
            cert: cert.into(),
            key: key.into(),
        }
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("authority_cert", &format_args!("<{} bytes>", self.authority_cert.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}
