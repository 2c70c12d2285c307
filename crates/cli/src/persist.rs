//! Writing credential bundles to disk.
//!
//! Each file is written to a temporary file next to its destination, given
//! its final mode, then renamed into place. Readers see either the old file
//! or the complete new one, and the key is never world-readable, not even
//! briefly.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use wicket_protocol::TlsCredentials;

use crate::errors::CliError;

/// Mode of the authority certificate and certificate files
pub const CERT_MODE: u32 = 0o644;

/// Mode of the private key file
pub const KEY_MODE: u32 = 0o600;

/// Destinations for the three PEM blobs of a TLS ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub authority_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl OutputPaths {
    /// Build from the command-line flags, which are all-or-none.
    ///
    /// Empty values count as unset.
    pub fn from_flags(
        authority_cert: Option<PathBuf>,
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
    ) -> Result<Option<Self>, CliError> {
        let set = |p: Option<PathBuf>| p.filter(|p| !p.as_os_str().is_empty());
        match (set(authority_cert), set(cert), set(key)) {
            (None, None, None) => Ok(None),
            (Some(authority_cert), Some(cert), Some(key)) => Ok(Some(Self {
                authority_cert,
                cert,
                key,
            })),
            (a, c, k) => {
                let shown = |p: &Option<PathBuf>| {
                    p.as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                };
                Err(CliError::Usage(format!(
                    "--authority-cert={:?}, --cert={:?}, --key={:?} must be all empty or all set",
                    shown(&a),
                    shown(&c),
                    shown(&k)
                )))
            }
        }
    }
}

/// Write authority certificate, certificate, then key
pub fn save_credentials(paths: &OutputPaths, credentials: &TlsCredentials) -> Result<(), CliError> {
    write_atomic(&paths.authority_cert, credentials.authority_cert.as_bytes(), CERT_MODE)?;
    write_atomic(&paths.cert, credentials.cert.as_bytes(), CERT_MODE)?;
    write_atomic(&paths.key, credentials.key.as_bytes(), KEY_MODE)
}

/// Replace `path` with `contents`, created with `mode`
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), CliError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_err = |e| CliError::io(path.display(), e);

    // Created owner-only; loosened below if the mode asks for it
    let mut tmp = tempfile::Builder::new()
        .prefix(".wicket-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    set_mode(tmp.as_file(), mode).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(path = %path.display(), mode = %format!("{:o}", mode), "Wrote file");
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &std::fs::File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &std::fs::File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
