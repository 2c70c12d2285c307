//! Configuration linting for risky settings
//!
//! Flags configurations that load fine but probably do not do what the
//! operator wants.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Certificates living longer than this are flagged
const LONG_TTL_SECS: u64 = 30 * 86_400;

/// Lint configuration
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    // Blessings bind to the caller's TLS client key
    if config.blesser.is_some() {
        match &config.tls {
            None => result.add_error(ValidationError::new(
                ErrorCategory::Identity,
                "Blesser is configured but the listener has no TLS, so callers have no key to bless",
            )),
            Some(tls) if tls.client_ca_file.is_none() => result.add_error(ValidationError::new(
                ErrorCategory::Identity,
                "Blesser is configured but tls.client_ca_file is not set, so callers have no key to bless",
            )),
            Some(_) => {}
        }

        match &config.identity {
            None => result.add_error(ValidationError::new(
                ErrorCategory::Identity,
                "Blesser is configured without an [identity] to sign with",
            )),
            Some(identity) if identity.key_file.is_none() => {
                result.add_warning(ValidationWarning::new(format!(
                    "Identity '{}' has no key_file; blessings will not survive a restart",
                    identity.name
                )))
            }
            Some(_) => {}
        }
    }

    for ticket in &config.tickets {
        if let Some(ttl) = ticket.ttl_secs {
            if ttl > LONG_TTL_SECS {
                result.add_warning(ValidationWarning::new(format!(
                    "Ticket '{}' issues certificates valid for {} days (short-lived credentials recommended)",
                    ticket.name,
                    ttl / 86_400
                )));
            }
        }
    }

    if config.tls.is_none() && !config.tickets.is_empty() {
        result.add_warning(ValidationWarning::new(
            "Listener serves tickets over plain TCP (configure [tls] for production)",
        ));
    }

    if config.tickets.is_empty() && config.blesser.is_none() {
        result.add_warning(ValidationWarning::new(
            "No tickets and no blesser configured; the server has nothing to serve",
        ));
    }

    result
}
