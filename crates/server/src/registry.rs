//! Ticket registry: maps ticket names to how each ticket is produced.

use std::collections::BTreeMap;

use tracing::debug;
use wicket_config::TicketConfig;
use wicket_protocol::{TicketKind, TicketName};

use crate::errors::ServiceError;
use crate::issuer::IssuanceRequest;

/// How a named ticket is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketSource {
    /// Fixed payload returned as-is
    Generic(Vec<u8>),
    /// Freshly issued TLS credentials
    Tls {
        kind: TicketKind,
        request: IssuanceRequest,
    },
}

impl TicketSource {
    pub fn kind(&self) -> TicketKind {
        match self {
            TicketSource::Generic(_) => TicketKind::GenericData,
            TicketSource::Tls { kind, .. } => *kind,
        }
    }

    fn from_config(ticket: &TicketConfig) -> Result<Self, ServiceError> {
        if !ticket.kind.is_tls() {
            let data = ticket.data.clone().unwrap_or_default();
            return Ok(TicketSource::Generic(data.into_bytes()));
        }

        let missing = |field: &str| {
            ServiceError::InvalidRequest(format!("ticket '{}' has no {}", ticket.name, field))
        };
        let request = IssuanceRequest::for_kind(
            ticket.kind,
            ticket.authority.as_deref().ok_or_else(|| missing("authority"))?,
            ticket
                .common_name
                .clone()
                .ok_or_else(|| missing("common_name"))?,
            ticket.ttl().ok_or_else(|| missing("ttl_secs"))?,
            ticket.subject_alt_names.clone(),
        )?;
        Ok(TicketSource::Tls {
            kind: ticket.kind,
            request,
        })
    }
}

/// Every ticket the service can hand out
#[derive(Debug, Clone, Default)]
pub struct TicketRegistry {
    entries: BTreeMap<TicketName, TicketSource>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(tickets: &[TicketConfig]) -> Result<Self, ServiceError> {
        let mut registry = Self::new();
        for ticket in tickets {
            let name = TicketName::new(&ticket.name)
                .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
            registry.insert(name, TicketSource::from_config(ticket)?)?;
        }
        Ok(registry)
    }

    /// Register a ticket; names must be unique
    pub fn insert(&mut self, name: TicketName, source: TicketSource) -> Result<(), ServiceError> {
        if self.entries.contains_key(&name) {
            return Err(ServiceError::InvalidRequest(format!(
                "duplicate ticket name '{}'",
                name
            )));
        }
        debug!(name = %name, kind = %source.kind(), "Registered ticket");
        self.entries.insert(name, source);
        Ok(())
    }

    pub fn resolve(&self, name: &TicketName) -> Result<&TicketSource, ServiceError> {
        self.entries
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &TicketName> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
