//! Wicket ticket server - main entry point

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use wicket_common::{init_tracing, CallContext, LogFormat};
use wicket_config::{validate, Config, IdentityConfig, TlsConfig};
use wicket_protocol::tls::{self, ClientAuth};
use wicket_protocol::{Principal, TicketServer};
use wicket_server::{
    ClaimPolicy, FileSecretStore, GoogleBlesser, OidcVerifier, TicketRegistry, TicketService,
};

/// How long startup may spend fetching the blesser's signing keys
const KEY_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Wicket - short-lived credential ticket service
#[derive(Parser, Debug)]
#[command(name = "wicket-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "WICKET_CONFIG")]
    config: Option<PathBuf>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log format: text or json
    #[arg(long = "log-format", default_value = "text")]
    log_format: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = LogFormat::from_str_loose(&cli.log_format)
        .with_context(|| format!("Unknown log format '{}'", cli.log_format))?;
    let log_level = if cli.verbose { "debug" } else { "info" };
    init_tracing(log_level, format);

    let config = load_config(cli.config.as_deref())?;

    if cli.test {
        return test_config(&config, cli.config.as_deref());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime.block_on(run_server(config))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).context("Failed to load configuration file")
        }
        None => {
            warn!("No configuration specified, using defaults");
            Config::from_toml("").context("Failed to build default configuration")
        }
    }
}

/// Test configuration and exit
fn test_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let result = validate::validate_all(config);

    info!("Configuration test results:");
    info!("  - {} ticket(s)", config.tickets.len());
    info!("  - blesser {}", if config.blesser.is_some() { "enabled" } else { "disabled" });
    for warning in &result.warnings {
        warn!("{}", warning.message);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }

    let shown = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    if !result.is_ok() {
        bail!(
            "configuration file {} has {} error(s)",
            shown,
            result.errors.len()
        );
    }

    println!("wicket: configuration file {} test is successful", shown);
    Ok(())
}

/// Run the ticket server until Ctrl-C
async fn run_server(config: Config) -> Result<()> {
    let root = CallContext::background();

    let principal = match &config.identity {
        Some(identity) => Some(Arc::new(load_principal(identity)?)),
        None => None,
    };

    let registry =
        TicketRegistry::from_config(&config.tickets).context("Invalid ticket definitions")?;
    let store = Arc::new(FileSecretStore::new(&config.secrets.root));
    let mut service = TicketService::new(registry, store);

    if let Some(blesser) = &config.blesser {
        if principal.is_none() {
            bail!("blesser is configured without an [identity] to sign with");
        }
        let discovery_ctx = root.with_timeout(KEY_DISCOVERY_TIMEOUT);
        let verifier = OidcVerifier::discover(
            &blesser.issuer,
            &blesser.audience,
            &discovery_ctx,
            &config.retry.policy(),
        )
        .await
        .context("Failed to load identity token signing keys")?;
        service = service.with_blesser(GoogleBlesser::new(
            Arc::new(verifier),
            ClaimPolicy::new(&blesser.hosted_domain, &blesser.email_suffix),
            blesser.expiration(),
        ));
        info!(
            hosted_domain = %blesser.hosted_domain,
            expiration_secs = blesser.expiration_secs,
            "Google blesser enabled"
        );
    }

    info!(
        tickets = service.registry().len(),
        secrets = %config.secrets.root.display(),
        "Ticket service ready"
    );

    let mut server =
        TicketServer::new(Arc::new(service)).with_idle_timeout(config.server.idle_timeout());
    if let Some(principal) = principal {
        server = server.with_principal(principal);
    }
    match &config.tls {
        Some(tls_config) => server = server.with_tls(load_tls(tls_config)?),
        None => warn!("Serving tickets over plain TCP"),
    }

    let listener = TcpListener::bind(&config.server.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.address))?;

    let shutdown = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping");
            shutdown.cancel();
        }
    });

    server.serve(listener, root).await.context("Server failed")?;
    info!("Wicket stopped");
    Ok(())
}

fn load_principal(identity: &IdentityConfig) -> Result<Principal> {
    match &identity.key_file {
        Some(path) => {
            let seed = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read identity key {}", path.display()))?;
            let principal = Principal::from_seed_base64(&identity.name, &seed)
                .with_context(|| format!("Invalid identity key {}", path.display()))?;
            info!(name = %identity.name, "Loaded signing identity");
            Ok(principal)
        }
        None => {
            warn!(
                name = %identity.name,
                "No identity key_file configured, generated an ephemeral signing key"
            );
            Ok(Principal::generate(&identity.name))
        }
    }
}

fn load_tls(config: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    let chain = tls::load_certs(&config.cert_file).context("Failed to load server certificate")?;
    let key = tls::load_private_key(&config.key_file).context("Failed to load server key")?;

    let (client_roots, client_auth) = match &config.client_ca_file {
        Some(path) => {
            let roots = tls::load_certs(path).context("Failed to load client CA")?;
            let mode = if config.require_client_auth {
                ClientAuth::Required
            } else {
                ClientAuth::Optional
            };
            (Some(roots), mode)
        }
        None => (None, ClientAuth::None),
    };
    info!(client_auth = ?client_auth, "TLS enabled");

    tls::server_config(chain, key, client_roots, client_auth).context("Invalid TLS configuration")
}
