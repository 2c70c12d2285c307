//! wicket-ticket - fetch a ticket from a Wicket server
//!
//! ```text
//! wicket-ticket --server ticket.example.com:8443 reflow/gdc/aws
//! wicket-ticket /127.0.0.1:8443/reflow/gdc/aws
//! wicket-ticket reflow/gdc/aws --authority-cert ca.pem --cert cert.pem --key key.pem
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use wicket_cli::{consume, CliError, ConsumeOptions, OutputPaths};
use wicket_common::{init_tracing, CallContext, LogFormat};
use wicket_protocol::tls::{client_config, load_certs, load_private_key};
use wicket_protocol::{ClientConfig, TicketAddress, TicketClient};

/// Retrieve a ticket from a Wicket server
#[derive(Parser, Debug)]
#[command(name = "wicket-ticket")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ticket name, or /host:port/name to address a server directly
    ticket: String,

    /// Timeout for the whole request, retries included
    #[arg(long = "timeout", default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Print JSON even for tickets that have special handling
    #[arg(long = "json-only")]
    json_only: bool,

    /// PEM file to store the CA certificate of a TLS ticket
    #[arg(long = "authority-cert")]
    authority_cert: Option<PathBuf>,

    /// PEM file to store the certificate of a TLS ticket
    #[arg(long = "cert")]
    cert: Option<PathBuf>,

    /// PEM file to store the private key of a TLS ticket
    #[arg(long = "key")]
    key: Option<PathBuf>,

    /// Default server as host:port
    #[arg(long = "server", env = "WICKET_SERVER")]
    server: Option<String>,

    /// CA certificate to verify the server with; enables TLS
    #[arg(long = "ca-cert")]
    ca_cert: Option<PathBuf>,

    /// Client certificate presented to the server
    #[arg(long = "client-cert", requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// Private key of the client certificate
    #[arg(long = "client-key", requires = "client_cert")]
    client_key: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    init_tracing(log_level, LogFormat::Text);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("wicket-ticket: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wicket-ticket: {:#}", err);
            let code = err
                .downcast_ref::<CliError>()
                .map(CliError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Everything that can be a usage error is checked before dialing
    let paths = OutputPaths::from_flags(cli.authority_cert, cli.cert, cli.key)?;
    let address = TicketAddress::parse(&cli.ticket)
        .map_err(|e| CliError::Usage(format!("bad ticket name: {}", e)))?;
    let endpoint = address
        .endpoint_or(cli.server.as_deref())
        .ok_or_else(|| {
            CliError::Usage(
                "no server given; use --server, WICKET_SERVER or a /host:port/ ticket prefix"
                    .to_string(),
            )
        })?
        .to_string();
    if cli.client_cert.is_some() && cli.ca_cert.is_none() {
        return Err(CliError::Usage("--client-cert needs --ca-cert".to_string()).into());
    }

    let mut config = ClientConfig::new(&endpoint);
    if let Some(ca_cert) = &cli.ca_cert {
        let roots = load_certs(ca_cert).context("Failed to load --ca-cert")?;
        let identity = match (&cli.client_cert, &cli.client_key) {
            (Some(cert), Some(key)) => Some((
                load_certs(cert).context("Failed to load --client-cert")?,
                load_private_key(key).context("Failed to load --client-key")?,
            )),
            _ => None,
        };
        config = config.with_tls(client_config(roots, identity)?);
    }
    let client = TicketClient::new(config).context("Invalid server address")?;

    debug!(endpoint = %endpoint, name = %address.name, timeout = ?cli.timeout, "Fetching ticket");
    let ctx = CallContext::background().with_timeout(cli.timeout);
    let options = ConsumeOptions {
        json_only: cli.json_only,
        paths,
    };

    let mut stdout = std::io::stdout().lock();
    consume(&client, &ctx, &address.name, &options, &mut stdout)
        .await
        .with_context(|| format!("Failed to get ticket '{}'", address.name))?;
    Ok(())
}
