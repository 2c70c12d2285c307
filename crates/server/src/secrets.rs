//! Storage of certificate authority material.
//!
//! An authority is referenced by a `/`-separated name (an [`AuthorityRef`])
//! and stored as a single PEM blob holding the CA certificate and its
//! private key.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use wicket_common::AuthorityRef;

/// Secret store errors
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("authority '{0}' not found")]
    NotFound(String),

    #[error("invalid authority reference '{0}'")]
    InvalidReference(String),

    #[error("failed to read authority '{reference}': {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// PEM-encoded CA certificate plus private key.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorityMaterial(String);

impl AuthorityMaterial {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn pem(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthorityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorityMaterial(<{} bytes>)", self.0.len())
    }
}

/// Source of authority material.
///
/// Lookups are blocking; callers on the async runtime run them on the
/// blocking pool together with issuance.
pub trait SecretStore: Send + Sync {
    fn lookup(&self, authority: &AuthorityRef) -> Result<AuthorityMaterial, SecretStoreError>;
}

/// Authorities stored as `<root>/<reference>.pem`
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a reference to its file, refusing anything that escapes the root
    fn path_for(&self, authority: &AuthorityRef) -> Result<PathBuf, SecretStoreError> {
        let reference = authority.as_str();
        let invalid = || SecretStoreError::InvalidReference(reference.to_string());

        if reference.is_empty() || reference.starts_with('/') || reference.contains('\\') {
            return Err(invalid());
        }
        let relative = Path::new(reference);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid());
        }
        Ok(self.root.join(format!("{}.pem", reference)))
    }
}

impl SecretStore for FileSecretStore {
    fn lookup(&self, authority: &AuthorityRef) -> Result<AuthorityMaterial, SecretStoreError> {
        let path = self.path_for(authority)?;
        debug!(authority = %authority, path = %path.display(), "Reading authority");
        match std::fs::read_to_string(&path) {
            Ok(pem) => Ok(AuthorityMaterial::new(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretStoreError::NotFound(authority.to_string()))
            }
            Err(source) => Err(SecretStoreError::Io {
                reference: authority.to_string(),
                source,
            }),
        }
    }
}

/// In-memory authorities, for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, AuthorityMaterial>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, authority: impl Into<String>, material: AuthorityMaterial) {
        self.entries.write().insert(authority.into(), material);
    }
}

impl SecretStore for MemorySecretStore {
    fn lookup(&self, authority: &AuthorityRef) -> Result<AuthorityMaterial, SecretStoreError> {
        self.entries
            .read()
            .get(authority.as_str())
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(authority.to_string()))
    }
}
