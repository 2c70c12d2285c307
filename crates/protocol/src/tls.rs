//! TLS configuration for the ticket transport.
//!
//! The server authenticates itself with a certificate chain and, when a
//! client CA is configured, asks callers for a client certificate. The
//! public key of that certificate is the caller identity that blessings get
//! bound to.
//!
//! Configs are built against an explicit aws-lc-rs provider so they do not
//! depend on a process-wide default being installed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;

use crate::errors::TicketProtocolError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn tls_err(context: &str, err: impl std::fmt::Display) -> TicketProtocolError {
    TicketProtocolError::Tls(format!("{}: {}", context, err))
}

/// Parse every certificate in a PEM blob
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TicketProtocolError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_err("failed to parse certificates", e))?;
    if certs.is_empty() {
        return Err(TicketProtocolError::Tls(
            "no certificates found in PEM input".to_string(),
        ));
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM blob
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TicketProtocolError> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_err("failed to parse private key", e))?
        .ok_or_else(|| TicketProtocolError::Tls("no private key found in PEM input".to_string()))
}

/// Load certificates from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TicketProtocolError> {
    let file = File::open(path)
        .map_err(|e| tls_err(&format!("failed to open {}", path.display()), e))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_err(&format!("failed to parse {}", path.display()), e))?;
    if certs.is_empty() {
        return Err(TicketProtocolError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    debug!(path = %path.display(), count = certs.len(), "Loaded certificates");
    Ok(certs)
}

/// Load a private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TicketProtocolError> {
    let file = File::open(path)
        .map_err(|e| tls_err(&format!("failed to open {}", path.display()), e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_err(&format!("failed to parse {}", path.display()), e))?
        .ok_or_else(|| {
            TicketProtocolError::Tls(format!("no private key found in {}", path.display()))
        })
}

fn root_store(roots: Vec<CertificateDer<'static>>) -> Result<RootCertStore, TicketProtocolError> {
    let mut store = RootCertStore::empty();
    for cert in roots {
        store
            .add(cert)
            .map_err(|e| tls_err("failed to add CA certificate", e))?;
    }
    Ok(store)
}

/// Client certificate policy of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Never ask for a client certificate
    None,
    /// Ask, and verify if presented
    Optional,
    /// Refuse handshakes without a valid client certificate
    Required,
}

/// Build a server config.
///
/// `client_roots` is the CA set client certificates are verified against; it
/// must be present unless `client_auth` is [`ClientAuth::None`].
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Option<Vec<CertificateDer<'static>>>,
    client_auth: ClientAuth,
) -> Result<Arc<ServerConfig>, TicketProtocolError> {
    let provider = provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err("unsupported protocol versions", e))?;

    let builder = match (client_auth, client_roots) {
        (ClientAuth::None, _) => builder.with_no_client_auth(),
        (_, None) => {
            return Err(TicketProtocolError::Tls(
                "client authentication requires a client CA".to_string(),
            ))
        }
        (mode, Some(roots)) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(roots)?), provider);
            let verifier = if mode == ClientAuth::Optional {
                verifier.allow_unauthenticated()
            } else {
                verifier
            };
            let verifier = verifier
                .build()
                .map_err(|e| tls_err("client verifier error", e))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder
        .with_single_cert(cert_chain, key)
        .map_err(|e| tls_err("server config error", e))?;
    Ok(Arc::new(config))
}

/// Build a client config trusting `roots`, optionally presenting a client
/// certificate.
pub fn client_config(
    roots: Vec<CertificateDer<'static>>,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
) -> Result<Arc<ClientConfig>, TicketProtocolError> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err("unsupported protocol versions", e))?
        .with_root_certificates(root_store(roots)?);

    let config = match identity {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| tls_err("client config error", e))?,
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Identity extracted from a peer certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// DER SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
    /// Subject distinguished name, RFC 4514 style
    pub subject: String,
}

/// Read the subject key and name of a peer's end-entity certificate
pub fn peer_identity(cert: &CertificateDer<'_>) -> Result<PeerIdentity, TicketProtocolError> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| tls_err("failed to parse peer certificate", e))?;
    Ok(PeerIdentity {
        public_key: parsed.public_key().raw.to_vec(),
        subject: parsed.subject().to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::test_utils::TestPki;
    use super::*;
    use rcgen::ExtendedKeyUsagePurpose;

    #[test]
    fn test_parse_rejects_empty_input() {
        assert!(parse_certs(b"").is_err());
        assert!(parse_private_key(b"not a key").is_err());
    }

    #[test]
    fn test_server_and_client_configs_build() {
        let pki = TestPki::new();
        let (cert, key) = pki.leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let (client_cert, client_key) = pki.leaf("alice", ExtendedKeyUsagePurpose::ClientAuth);
        let roots = parse_certs(pki.ca_pem().as_bytes()).unwrap();

        for mode in [ClientAuth::None, ClientAuth::Optional, ClientAuth::Required] {
            server_config(
                parse_certs(cert.as_bytes()).unwrap(),
                parse_private_key(key.as_bytes()).unwrap(),
                Some(roots.clone()),
                mode,
            )
            .unwrap();
        }

        client_config(
            roots.clone(),
            Some((
                parse_certs(client_cert.as_bytes()).unwrap(),
                parse_private_key(client_key.as_bytes()).unwrap(),
            )),
        )
        .unwrap();
        client_config(roots, None).unwrap();
    }

    #[test]
    fn test_client_auth_without_roots_is_error() {
        let pki = TestPki::new();
        let (cert, key) = pki.leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let result = server_config(
            parse_certs(cert.as_bytes()).unwrap(),
            parse_private_key(key.as_bytes()).unwrap(),
            None,
            ClientAuth::Required,
        );
        assert!(matches!(result, Err(TicketProtocolError::Tls(_))));
    }

    #[test]
    fn test_peer_identity_reads_spki_and_subject() {
        let pki = TestPki::new();
        let (cert, key) = pki.leaf("alice", ExtendedKeyUsagePurpose::ClientAuth);
        let der = parse_certs(cert.as_bytes()).unwrap().remove(0);

        let identity = peer_identity(&der).unwrap();
        let key_pair = rcgen::KeyPair::from_pem(&key).unwrap();

        assert_eq!(identity.public_key, key_pair.public_key_der());
        assert!(identity.subject.contains("CN=alice"));
    }
}
