//! Ticket service: the [`TicketHandler`] behind the server binary.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use wicket_protocol::{Blessing, CallInfo, RemoteError, Ticket, TicketHandler, TicketName};

use crate::blesser::GoogleBlesser;
use crate::errors::ServiceError;
use crate::issuer::TlsIssuer;
use crate::registry::{TicketRegistry, TicketSource};
use crate::secrets::SecretStore;

/// Serves registered tickets and, when configured, Google blessings.
#[derive(Debug)]
pub struct TicketService {
    registry: TicketRegistry,
    issuer: TlsIssuer,
    blesser: Option<GoogleBlesser>,
}

impl TicketService {
    pub fn new(registry: TicketRegistry, store: Arc<dyn SecretStore>) -> Self {
        Self {
            registry,
            issuer: TlsIssuer::new(store),
            blesser: None,
        }
    }

    pub fn with_blesser(mut self, blesser: GoogleBlesser) -> Self {
        self.blesser = Some(blesser);
        self
    }

    pub fn registry(&self) -> &TicketRegistry {
        &self.registry
    }

    /// Build a ticket. TLS issuance runs on the blocking pool.
    pub async fn build(&self, name: &TicketName) -> Result<Ticket, ServiceError> {
        match self.registry.resolve(name)? {
            TicketSource::Generic(data) => Ok(Ticket::generic(data.clone())),
            TicketSource::Tls { kind, request } => {
                let kind = *kind;
                let issuer = self.issuer.clone();
                let request = request.clone();
                let credentials = tokio::task::spawn_blocking(move || issuer.issue(&request))
                    .await
                    .map_err(|e| ServiceError::Issuance(format!("issuance task failed: {}", e)))??;
                Ticket::tls(kind, credentials).ok_or_else(|| {
                    ServiceError::InvalidRequest(format!("{} is not a TLS kind", kind))
                })
            }
        }
    }
}

#[async_trait]
impl TicketHandler for TicketService {
    async fn get(&self, call: &CallInfo, name: &TicketName) -> Result<Ticket, RemoteError> {
        match self.build(name).await {
            Ok(ticket) => {
                info!(
                    request_id = %call.request_id,
                    remote = %call.remote_addr,
                    name = %name,
                    kind = %ticket.kind(),
                    "Served ticket"
                );
                Ok(ticket)
            }
            Err(e) => {
                warn!(
                    request_id = %call.request_id,
                    remote = %call.remote_addr,
                    name = %name,
                    error = %e,
                    "Ticket request failed"
                );
                Err(e.into())
            }
        }
    }

    async fn bless_google(&self, call: &CallInfo, id_token: &str) -> Result<Blessing, RemoteError> {
        let Some(blesser) = &self.blesser else {
            return Err(RemoteError::bad_request(
                "this server does not bless Google identities",
            ));
        };
        blesser.bless(call, id_token).await.map_err(RemoteError::from)
    }
}
