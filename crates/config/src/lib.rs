//! Configuration module for the Wicket ticket service.
//!
//! The service is configured from one TOML file. Every section except
//! `[[tickets]]` has usable defaults, so a minimal file only lists tickets:
//!
//! ```toml
//! [secrets]
//! root = "/etc/wicket/authorities"
//!
//! [[tickets]]
//! name = "reflow/gdc/aws"
//! kind = "docker_server"
//! authority = "docker-ca"
//! common_name = "docker.example.com"
//! ttl_secs = 3600
//! ```
//!
//! Loading runs three passes: TOML parsing, per-field constraints via
//! `validator`, and cross-field checks ([`Config::validate`]). Checks that
//! touch the filesystem live in [`validate`] and only run when asked for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use validator::Validate;
use wicket_common::{Backoff, MaxRetries};
use wicket_protocol::{TicketKind, TicketName};

pub mod validate;

pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Top-level configuration
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Listener TLS; plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Local signing identity used to mint blessings
    #[serde(default)]
    #[validate(nested)]
    pub identity: Option<IdentityConfig>,

    /// Google identity blesser; `bless_google` is refused when absent
    #[serde(default)]
    #[validate(nested)]
    pub blesser: Option<BlesserConfig>,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Retry policy for outbound calls made by the service
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,

    #[serde(default)]
    #[validate(nested)]
    pub tickets: Vec<TicketConfig>,
}

impl Config {
    /// Load, parse and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            tickets = config.tickets.len(),
            blesser = config.blesser.is_some(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field constraints and cross-field rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut seen = HashSet::new();
        for ticket in &self.tickets {
            let name = TicketName::new(&ticket.name)
                .map_err(|e| ConfigError::Invalid(format!("ticket '{}': {}", ticket.name, e)))?;
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ticket name '{}'",
                    ticket.name
                )));
            }
            ticket.validate_kind()?;
        }

        if let Some(blesser) = &self.blesser {
            if !blesser.email_suffix.starts_with('@') && !blesser.email_suffix.starts_with('.') {
                return Err(ConfigError::Invalid(format!(
                    "blesser email_suffix '{}' must start with '@' or '.'",
                    blesser.email_suffix
                )));
            }
        }

        if let Some(tls) = &self.tls {
            if tls.require_client_auth && tls.client_ca_file.is_none() {
                return Err(ConfigError::Invalid(
                    "tls.require_client_auth needs tls.client_ca_file".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Find a ticket definition by name
    pub fn ticket(&self, name: &str) -> Option<&TicketConfig> {
        let wanted = TicketName::new(name).ok()?;
        self.tickets
            .iter()
            .find(|t| TicketName::new(&t.name).ok().as_ref() == Some(&wanted))
    }

    /// Minimal valid configuration for tests
    pub fn default_for_testing() -> Self {
        Self {
            secrets: SecretsConfig {
                root: PathBuf::from("/tmp/wicket-test-authorities"),
            },
            ..Default::default()
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_address")]
    #[validate(length(min = 1))]
    pub address: String,
    /// Connections with no request for this long are closed
    #[serde(default = "default_idle_timeout")]
    #[validate(range(min = 1))]
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_idle_timeout() -> u64 {
    60
}

/// Listener TLS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// CA that client certificates must chain to
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
    /// Refuse clients without a certificate
    #[serde(default = "default_require_client_auth")]
    pub require_client_auth: bool,
}

fn default_require_client_auth() -> bool {
    true
}

/// Local signing identity
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Blessing name of the service
    #[serde(default = "default_identity_name")]
    #[validate(length(min = 1))]
    pub name: String,
    /// File holding a base64 Ed25519 seed; a random key is used when absent
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_identity_name() -> String {
    "wicket".to_string()
}

/// Google identity blesser settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BlesserConfig {
    /// Required `hd` claim
    #[validate(length(min = 1))]
    pub hosted_domain: String,
    /// Required suffix of the `email` claim, e.g. `@example.com`
    #[validate(length(min = 2))]
    pub email_suffix: String,
    /// Expected `aud` claim (OAuth client id)
    #[validate(length(min = 1))]
    pub audience: String,
    /// OIDC issuer
    #[serde(default = "default_issuer")]
    #[validate(length(min = 1))]
    pub issuer: String,
    /// Lifetime of minted blessings
    #[serde(default = "default_expiration")]
    #[validate(range(min = 1))]
    pub expiration_secs: u64,
}

impl BlesserConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

fn default_issuer() -> String {
    "https://accounts.google.com".to_string()
}

fn default_expiration() -> u64 {
    // 1 day
    86_400
}

/// Where certificate authorities are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    #[serde(default = "default_secrets_root")]
    pub root: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            root: default_secrets_root(),
        }
    }
}

fn default_secrets_root() -> PathBuf {
    PathBuf::from("/etc/wicket/authorities")
}

impl SecretsConfig {
    /// File an authority reference is stored in, `<root>/<authority>.pem`
    pub fn authority_path(&self, authority: &str) -> PathBuf {
        self.root.join(format!("{}.pem", authority.trim_matches('/')))
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_initial_wait_ms")]
    #[validate(range(min = 1))]
    pub initial_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    #[validate(range(min = 1))]
    pub max_wait_ms: u64,
    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_wait_ms: default_initial_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            multiplier: default_multiplier(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy these settings describe
    pub fn policy(&self) -> MaxRetries<Backoff> {
        MaxRetries::new(
            Backoff::new(
                Duration::from_millis(self.initial_wait_ms),
                Duration::from_millis(self.max_wait_ms),
                self.multiplier,
            ),
            self.max_retries,
        )
    }
}

fn default_initial_wait_ms() -> u64 {
    250
}

fn default_max_wait_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    5
}

/// One servable ticket
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TicketConfig {
    /// Hierarchical ticket name, e.g. `reflow/gdc/aws`
    #[validate(length(min = 1))]
    pub name: String,
    pub kind: TicketKind,

    /// Authority reference in the secret store (TLS kinds)
    #[serde(default)]
    pub authority: Option<String>,
    /// Leaf certificate common name (TLS kinds)
    #[serde(default)]
    pub common_name: Option<String>,
    /// Leaf certificate lifetime (TLS kinds)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub ttl_secs: Option<u64>,
    /// DNS names or IP addresses (TLS kinds)
    #[serde(default)]
    pub subject_alt_names: Vec<String>,

    /// Payload (generic data)
    #[serde(default)]
    pub data: Option<String>,
}

impl TicketConfig {
    /// Certificate lifetime, if set
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    fn validate_kind(&self) -> Result<(), ConfigError> {
        let invalid = |what: &str| {
            Err(ConfigError::Invalid(format!(
                "ticket '{}' ({}): {}",
                self.name, self.kind, what
            )))
        };

        if self.kind.is_tls() {
            if self.authority.as_deref().is_none_or(str::is_empty) {
                return invalid("authority is required");
            }
            if self.common_name.as_deref().is_none_or(str::is_empty) {
                return invalid("common_name is required");
            }
            match self.ttl_secs {
                None => return invalid("ttl_secs is required"),
                Some(0) => return invalid("ttl_secs must be positive"),
                Some(_) => {}
            }
            if self.data.is_some() {
                return invalid("data is only valid for generic_data tickets");
            }
        } else {
            if self.data.is_none() {
                return invalid("data is required");
            }
            if self.authority.is_some() || self.common_name.is_some() || self.ttl_secs.is_some() {
                return invalid("certificate fields are only valid for TLS tickets");
            }
        }
        Ok(())
    }
}
