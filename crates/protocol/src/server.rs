//! Ticket server for serving tickets over the framed protocol.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use wicket_common::{CallContext, RequestId};

use crate::blessing::{Blessing, Principal};
use crate::errors::{RemoteError, TicketProtocolError};
use crate::frame::{read_frame, write_frame};
use crate::naming::TicketName;
use crate::protocol::{Method, ResponseBody, TicketRequest, TicketResponse, PROTOCOL_VERSION};
use crate::ticket::Ticket;
use crate::tls::peer_identity;

/// What a handler knows about the call it is serving.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Request id, as sent by the client
    pub request_id: String,
    /// Remote socket address
    pub remote_addr: SocketAddr,
    /// DER SubjectPublicKeyInfo of the caller's TLS client certificate
    pub remote_public_key: Option<Vec<u8>>,
    /// Subject name of the caller's TLS client certificate
    pub remote_subject: Option<String>,
    /// Signing identity of this server, if it has one
    pub local_principal: Option<Arc<Principal>>,
}

/// Trait for implementing ticket service logic
#[async_trait]
pub trait TicketHandler: Send + Sync {
    /// Build the named ticket
    async fn get(&self, call: &CallInfo, name: &TicketName) -> Result<Ticket, RemoteError>;

    /// Exchange a Google ID token for a blessing
    async fn bless_google(&self, _call: &CallInfo, _id_token: &str) -> Result<Blessing, RemoteError> {
        Err(RemoteError::bad_request(
            "this server does not bless Google identities",
        ))
    }
}

/// How long a connection may sit without a request before it is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct Shared {
    handler: Arc<dyn TicketHandler>,
    principal: Option<Arc<Principal>>,
    idle_timeout: Duration,
}

/// Accept loop dispatching framed requests to a [`TicketHandler`].
pub struct TicketServer {
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
}

impl TicketServer {
    /// Create a new ticket server
    pub fn new(handler: Arc<dyn TicketHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                principal: None,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
            }),
            tls: None,
        }
    }

    /// Close connections that send no request for `idle_timeout`.
    ///
    /// Also bounds the TLS handshake.
    pub fn with_idle_timeout(self, idle_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler: self.shared.handler.clone(),
                principal: self.shared.principal.clone(),
                idle_timeout,
            }),
            tls: self.tls,
        }
    }

    /// Terminate TLS on accepted connections
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(TlsAcceptor::from(config));
        self
    }

    /// Expose a local signing identity to handlers
    pub fn with_principal(self, principal: Arc<Principal>) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler: self.shared.handler.clone(),
                principal: Some(principal),
                idle_timeout: self.shared.idle_timeout,
            }),
            tls: self.tls,
        }
    }

    /// Serve connections from `listener` until `shutdown` is done.
    ///
    /// In-flight connections are cancelled together with `shutdown`.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CallContext,
    ) -> Result<(), TicketProtocolError> {
        info!(
            address = ?listener.local_addr().ok(),
            tls = self.tls.is_some(),
            "Ticket server listening"
        );

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.done() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote_addr)) => {
                    let shared = Arc::clone(&self.shared);
                    let tls = self.tls.clone();
                    let conn_ctx = shutdown.child();
                    tokio::spawn(async move {
                        let served = conn_ctx
                            .run(accept_connection(stream, remote_addr, tls, shared))
                            .await;
                        match served {
                            Ok(Ok(())) => debug!(remote = %remote_addr, "Connection closed"),
                            Ok(Err(e)) => {
                                warn!(remote = %remote_addr, error = %e, "Connection failed")
                            }
                            Err(_) => debug!(remote = %remote_addr, "Connection dropped on shutdown"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Ticket server stopped");
        Ok(())
    }
}

async fn accept_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
) -> Result<(), TicketProtocolError> {
    let _ = stream.set_nodelay(true);
    let Some(acceptor) = tls else {
        return handle_connection(stream, Peer::anonymous(remote_addr), &shared).await;
    };

    let stream = tokio::time::timeout(shared.idle_timeout, acceptor.accept(stream))
        .await
        .map_err(|_| TicketProtocolError::Timeout)?
        .map_err(|e| TicketProtocolError::Tls(format!("handshake failed: {}", e)))?;

    let mut peer = Peer::anonymous(remote_addr);
    if let Some(cert) = stream.get_ref().1.peer_certificates().and_then(|c| c.first()) {
        let identity = peer_identity(cert)?;
        debug!(remote = %remote_addr, subject = %identity.subject, "Authenticated client certificate");
        peer.public_key = Some(identity.public_key);
        peer.subject = Some(identity.subject);
    }
    handle_connection(stream, peer, &shared).await
}

struct Peer {
    addr: SocketAddr,
    public_key: Option<Vec<u8>>,
    subject: Option<String>,
}

impl Peer {
    fn anonymous(addr: SocketAddr) -> Self {
        Self {
            addr,
            public_key: None,
            subject: None,
        }
    }
}

/// Serve requests on one connection until the client hangs up
async fn handle_connection<S>(
    mut stream: S,
    peer: Peer,
    shared: &Shared,
) -> Result<(), TicketProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = read_frame::<_, TicketRequest>(&mut stream);
        let request = match tokio::time::timeout(shared.idle_timeout, next).await {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(
                    remote = %peer.addr,
                    idle_timeout = ?shared.idle_timeout,
                    "Closing idle connection"
                );
                break;
            }
        };
        let request_id = if request.request_id.is_empty() {
            RequestId::new().to_string()
        } else {
            request.request_id.clone()
        };

        let body = if request.version != PROTOCOL_VERSION {
            warn!(
                request_id = %request_id,
                remote = %peer.addr,
                version = request.version,
                "Rejecting request with unsupported protocol version"
            );
            ResponseBody::Error(RemoteError::bad_request(format!(
                "unsupported protocol version {} (server speaks {})",
                request.version, PROTOCOL_VERSION
            )))
        } else {
            let call = CallInfo {
                request_id: request_id.clone(),
                remote_addr: peer.addr,
                remote_public_key: peer.public_key.clone(),
                remote_subject: peer.subject.clone(),
                local_principal: shared.principal.clone(),
            };
            dispatch(shared.handler.as_ref(), &call, request.method).await
        };

        write_frame(&mut stream, &TicketResponse::new(request_id, body)).await?;
    }
    Ok(())
}

async fn dispatch(handler: &dyn TicketHandler, call: &CallInfo, method: Method) -> ResponseBody {
    let method_name = method.name();
    let result = match method {
        Method::Get { name } => match TicketName::new(&name) {
            Ok(name) => handler.get(call, &name).await.map(ResponseBody::Ticket),
            Err(e) => Err(RemoteError::bad_request(e.to_string())),
        },
        Method::BlessGoogle { id_token } => handler
            .bless_google(call, &id_token)
            .await
            .map(ResponseBody::Blessing),
    };

    match result {
        Ok(body) => {
            info!(
                request_id = %call.request_id,
                remote = %call.remote_addr,
                method = method_name,
                "Request served"
            );
            body
        }
        Err(err) => {
            warn!(
                request_id = %call.request_id,
                remote = %call.remote_addr,
                method = method_name,
                code = %err.code,
                error = %err.message,
                "Request failed"
            );
            ResponseBody::Error(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    struct StaticHandler;

    #[async_trait]
    impl TicketHandler for StaticHandler {
        async fn get(&self, _call: &CallInfo, name: &TicketName) -> Result<Ticket, RemoteError> {
            match name.as_str() {
                "notes/motd" => Ok(Ticket::generic("hello")),
                other => Err(RemoteError::new(ErrorCode::NotFound, other)),
            }
        }
    }

    fn shared() -> Shared {
        Shared {
            handler: Arc::new(StaticHandler),
            principal: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    fn peer() -> Peer {
        Peer::anonymous("127.0.0.1:4000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_connection_serves_several_requests() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(async move { handle_connection(server, peer(), &shared()).await });

        let get = |name: &str, id: &str| {
            TicketRequest::new(id, Method::Get { name: name.to_string() })
        };

        write_frame(&mut client, &get("notes/motd", "1")).await.unwrap();
        let first: TicketResponse = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(first.request_id, "1");
        assert_eq!(first.into_ticket().unwrap(), Ticket::generic("hello"));

        write_frame(&mut client, &get("missing", "2")).await.unwrap();
        let second: TicketResponse = read_frame(&mut client).await.unwrap().unwrap();
        match second.into_ticket() {
            Err(TicketProtocolError::Remote(err)) => assert_eq!(err.code, ErrorCode::NotFound),
            other => panic!("unexpected: {:?}", other),
        }

        drop(client);
        serving.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_closed() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let serving = tokio::spawn(async move {
            let shared = Shared {
                idle_timeout: Duration::from_secs(5),
                ..shared()
            };
            handle_connection(server, peer(), &shared).await
        });

        let request = TicketRequest::new("1", Method::Get { name: "notes/motd".into() });
        write_frame(&mut client, &request).await.unwrap();
        let response: TicketResponse = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(response.into_ticket().unwrap(), Ticket::generic("hello"));

        // Then silence: the server hangs up on its own
        serving.await.unwrap().unwrap();
        assert!(read_frame::<_, TicketResponse>(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_name_and_version_are_bad_request() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move { handle_connection(server, peer(), &shared()).await });

        let request = TicketRequest::new("1", Method::Get { name: "a//b".into() });
        write_frame(&mut client, &request).await.unwrap();
        let response: TicketResponse = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            response.body,
            ResponseBody::Error(RemoteError { code: ErrorCode::BadRequest, .. })
        ));

        let mut request = TicketRequest::new("2", Method::Get { name: "notes/motd".into() });
        request.version = PROTOCOL_VERSION + 1;
        write_frame(&mut client, &request).await.unwrap();
        let response: TicketResponse = read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(
            response.body,
            ResponseBody::Error(RemoteError { code: ErrorCode::BadRequest, .. })
        ));
    }

    #[tokio::test]
    async fn test_blessing_not_served_by_default() {
        let call = CallInfo {
            request_id: "r".into(),
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            remote_public_key: None,
            remote_subject: None,
            local_principal: None,
        };
        let body = dispatch(
            &StaticHandler,
            &call,
            Method::BlessGoogle {
                id_token: "t".into(),
            },
        )
        .await;
        assert!(matches!(
            body,
            ResponseBody::Error(RemoteError { code: ErrorCode::BadRequest, .. })
        ));
    }
}
