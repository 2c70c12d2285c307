//! Certificate validation
//!
//! Validates listener certificates and the certificate authorities tickets
//! are issued from: existence, parseability and expiry.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Validate listener TLS files
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(tls) = &config.tls else {
        return result;
    };

    if !tls.cert_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Certificate not found: {:?}", tls.cert_file),
        ));
    } else {
        record(&mut result, load_and_validate_cert(&tls.cert_file, ErrorCategory::Certificate));
    }

    if !tls.key_file.exists() {
        result.add_error(ValidationError::new(
            ErrorCategory::Certificate,
            format!("Private key not found: {:?}", tls.key_file),
        ));
    }

    if let Some(ca) = &tls.client_ca_file {
        if !ca.exists() {
            result.add_error(ValidationError::new(
                ErrorCategory::Certificate,
                format!("Client CA not found: {:?}", ca),
            ));
        } else {
            record(&mut result, load_and_validate_cert(ca, ErrorCategory::Certificate));
        }
    }

    result
}

/// Validate the authority file of every TLS ticket
pub fn validate_authorities(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    let authorities: BTreeSet<&str> = config
        .tickets
        .iter()
        .filter(|t| t.kind.is_tls())
        .filter_map(|t| t.authority.as_deref())
        .collect();

    for authority in authorities {
        let path = config.secrets.authority_path(authority);
        if !path.exists() {
            result.add_error(ValidationError::new(
                ErrorCategory::Authority,
                format!("Authority '{}' not found at {:?}", authority, path),
            ));
            continue;
        }
        record(&mut result, load_and_validate_cert(&path, ErrorCategory::Authority));
    }

    result
}

fn record(
    result: &mut ValidationResult,
    outcome: Result<Option<ValidationWarning>, ValidationError>,
) {
    match outcome {
        Ok(Some(expiry_warning)) => result.add_warning(expiry_warning),
        Ok(None) => {}
        Err(e) => result.add_error(e),
    }
}

/// Load the first certificate of a PEM file and check its expiry
fn load_and_validate_cert(
    cert_path: &Path,
    category: ErrorCategory,
) -> Result<Option<ValidationWarning>, ValidationError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            category,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let blocks = pem::parse_many(&cert_pem).map_err(|e| {
        ValidationError::new(
            category,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;
    let pem = blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| {
            ValidationError::new(category, format!("No certificate in {:?}", cert_path))
        })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            category,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    if expiry_time < now {
        return Err(ValidationError::new(
            category,
            format!(
                "Certificate expired: {:?} (expired at {})",
                cert_path,
                cert.validity().not_after
            ),
        ));
    }

    // Warn if expiring within 30 days
    let thirty_days = Duration::from_secs(30 * 86400);
    if expiry_time < now + thirty_days {
        return Ok(Some(ValidationWarning::new(format!(
            "Certificate expires soon: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}
