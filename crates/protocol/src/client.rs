//! Ticket client for fetching tickets from a ticket server.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use wicket_common::{
    wait_for_next_attempt, Backoff, CallContext, MaxRetries, RequestId, RetryPolicy, WaitError,
};

use crate::blessing::Blessing;
use crate::errors::TicketProtocolError;
use crate::frame::{read_frame, write_frame};
use crate::naming::TicketName;
use crate::protocol::{Method, TicketRequest, TicketResponse, PROTOCOL_VERSION};
use crate::ticket::Ticket;

/// Connection settings for a [`TicketClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Server endpoint as `host:port`
    pub endpoint: String,
    /// TLS settings; plain TCP when `None`
    pub tls: Option<Arc<rustls::ClientConfig>>,
    /// Name to verify the server certificate against; defaults to the
    /// endpoint host
    pub server_name: Option<String>,
    /// Retry policy for transport failures
    pub retry: Arc<dyn RetryPolicy>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls: None,
            server_name: None,
            retry: Arc::new(default_retry_policy()),
        }
    }

    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Default client policy: 250ms doubling to 5s, at most 5 retries.
pub fn default_retry_policy() -> MaxRetries<Backoff> {
    MaxRetries::new(
        Backoff::new(Duration::from_millis(250), Duration::from_secs(5), 2.0),
        5,
    )
}

/// Client for the ticket service.
///
/// Each call opens its own connection, so a client can be shared freely.
/// Transport failures are retried under the configured policy, bounded by
/// the caller's [`CallContext`]; server-side errors are returned as-is.
pub struct TicketClient {
    config: ClientConfig,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl TicketClient {
    pub fn new(config: ClientConfig) -> Result<Self, TicketProtocolError> {
        let tls = match &config.tls {
            Some(tls_config) => {
                let name = match &config.server_name {
                    Some(name) => name.clone(),
                    None => endpoint_host(&config.endpoint)?.to_string(),
                };
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|_| TicketProtocolError::Tls(format!("invalid server name '{}'", name)))?;
                Some((TlsConnector::from(tls_config.clone()), server_name))
            }
            None => None,
        };
        Ok(Self { config, tls })
    }

    /// Server endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Fetch the named ticket
    pub async fn get(
        &self,
        ctx: &CallContext,
        name: &TicketName,
    ) -> Result<Ticket, TicketProtocolError> {
        self.call(
            ctx,
            Method::Get {
                name: name.as_str().to_string(),
            },
        )
        .await?
        .into_ticket()
    }

    /// Exchange a Google ID token for a blessing bound to this client's
    /// TLS certificate key
    pub async fn bless_google(
        &self,
        ctx: &CallContext,
        id_token: &str,
    ) -> Result<Blessing, TicketProtocolError> {
        self.call(
            ctx,
            Method::BlessGoogle {
                id_token: id_token.to_string(),
            },
        )
        .await?
        .into_blessing()
    }

    async fn call(
        &self,
        ctx: &CallContext,
        method: Method,
    ) -> Result<TicketResponse, TicketProtocolError> {
        let mut attempt = 0;
        loop {
            let request = TicketRequest::new(RequestId::new().as_str(), method.clone());
            let err = match ctx.run(self.call_once(&request)).await? {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            warn!(
                endpoint = %self.config.endpoint,
                method = request.method.name(),
                attempt = attempt,
                error = %err,
                "Ticket call failed, retrying"
            );
            match wait_for_next_attempt(ctx, self.config.retry.as_ref(), attempt).await {
                Ok(()) => attempt += 1,
                Err(WaitError::Cancelled) => return Err(TicketProtocolError::Cancelled),
                Err(WaitError::Timeout) => return Err(TicketProtocolError::Timeout),
                Err(WaitError::Exhausted { .. }) => return Err(err),
            }
        }
    }

    async fn call_once(
        &self,
        request: &TicketRequest,
    ) -> Result<TicketResponse, TicketProtocolError> {
        let tcp = TcpStream::connect(&self.config.endpoint)
            .await
            .map_err(|e| {
                TicketProtocolError::ConnectionFailed(format!("{}: {}", self.config.endpoint, e))
            })?;
        let _ = tcp.set_nodelay(true);

        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector
                    .connect(server_name.clone(), tcp)
                    .await
                    .map_err(|e| TicketProtocolError::Tls(format!("handshake failed: {}", e)))?;
                exchange(stream, request).await
            }
            None => exchange(tcp, request).await,
        }
    }
}

async fn exchange<S>(
    mut stream: S,
    request: &TicketRequest,
) -> Result<TicketResponse, TicketProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(
        request_id = %request.request_id,
        method = request.method.name(),
        "Sending ticket request"
    );
    write_frame(&mut stream, request).await?;
    let response: TicketResponse = read_frame(&mut stream)
        .await?
        .ok_or(TicketProtocolError::ConnectionClosed)?;

    if response.version != PROTOCOL_VERSION {
        return Err(TicketProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: response.version,
        });
    }
    if response.request_id != request.request_id {
        return Err(TicketProtocolError::UnexpectedResponse(format!(
            "response for request '{}' while waiting for '{}'",
            response.request_id, request.request_id
        )));
    }
    Ok(response)
}

/// Host part of a `host:port` endpoint, without IPv6 brackets
fn endpoint_host(endpoint: &str) -> Result<&str, TicketProtocolError> {
    let (host, _port) = endpoint.rsplit_once(':').ok_or_else(|| {
        TicketProtocolError::InvalidName(format!("endpoint '{}' has no port", endpoint))
    })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TicketProtocolError::InvalidName(format!(
            "endpoint '{}' has no host",
            endpoint
        )));
    }
    Ok(host)
}
