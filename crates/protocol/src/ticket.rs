//! The ticket variant model.
//!
//! A [`Ticket`] is a closed sum type: exactly one payload kind per value,
//! selected by the variant itself. Handling code either `match`es on the
//! enum or implements [`TicketVisitor`], whose methods have no default
//! bodies. Either way, adding a kind is a compile error at every dispatch
//! site until the new kind is handled.
//!
//! # Wire form
//!
//! Tickets serialize adjacently tagged:
//!
//! ```json
//! { "kind": "docker_server", "value": { "credentials": { "authority_cert": "...", "cert": "...", "key": "..." } } }
//! { "kind": "generic_data", "value": { "data": "aGVsbG8=" } }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::credentials::{KeyUsage, TlsCredentials};

/// Tag identifying a ticket kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    GenericData,
    TlsClient,
    TlsServer,
    DockerGeneric,
    DockerServer,
    DockerClient,
}

impl TicketKind {
    /// Every kind, each exactly once
    pub const ALL: [TicketKind; 6] = [
        TicketKind::GenericData,
        TicketKind::TlsClient,
        TicketKind::TlsServer,
        TicketKind::DockerGeneric,
        TicketKind::DockerServer,
        TicketKind::DockerClient,
    ];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::GenericData => "generic_data",
            TicketKind::TlsClient => "tls_client",
            TicketKind::TlsServer => "tls_server",
            TicketKind::DockerGeneric => "docker_generic",
            TicketKind::DockerServer => "docker_server",
            TicketKind::DockerClient => "docker_client",
        }
    }

    /// Whether tickets of this kind carry a [`TlsCredentials`] bundle
    pub fn is_tls(&self) -> bool {
        !matches!(self, TicketKind::GenericData)
    }

    /// Extended key usages requested when issuing this kind.
    ///
    /// Empty for [`TicketKind::GenericData`], which is not issued by a CA.
    pub fn key_usage(&self) -> &'static [KeyUsage] {
        match self {
            TicketKind::GenericData => &[],
            TicketKind::TlsClient | TicketKind::TlsServer | TicketKind::DockerGeneric => {
                &KeyUsage::BOTH
            }
            TicketKind::DockerServer => &[KeyUsage::ServerAuth],
            TicketKind::DockerClient => &[KeyUsage::ClientAuth],
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown ticket kind '{}'", s))
    }
}

/// A freshly issued credential returned by the ticket service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Ticket {
    /// Opaque bytes, typically printable text
    GenericData {
        #[serde(with = "crate::serde_b64")]
        data: Vec<u8>,
    },
    TlsClient { credentials: TlsCredentials },
    TlsServer { credentials: TlsCredentials },
    DockerGeneric { credentials: TlsCredentials },
    DockerServer { credentials: TlsCredentials },
    DockerClient { credentials: TlsCredentials },
}

impl Ticket {
    /// Build a generic data ticket
    pub fn generic(data: impl Into<Vec<u8>>) -> Self {
        Ticket::GenericData { data: data.into() }
    }

    /// Wrap a credential bundle in the ticket of the given TLS kind.
    ///
    /// Returns `None` for [`TicketKind::GenericData`], which carries no
    /// credentials.
    pub fn tls(kind: TicketKind, credentials: TlsCredentials) -> Option<Self> {
        let ticket = match kind {
            TicketKind::GenericData => return None,
            TicketKind::TlsClient => Ticket::TlsClient { credentials },
            TicketKind::TlsServer => Ticket::TlsServer { credentials },
            TicketKind::DockerGeneric => Ticket::DockerGeneric { credentials },
            TicketKind::DockerServer => Ticket::DockerServer { credentials },
            TicketKind::DockerClient => Ticket::DockerClient { credentials },
        };
        Some(ticket)
    }

    /// Tag of this ticket
    pub fn kind(&self) -> TicketKind {
        match self {
            Ticket::GenericData { .. } => TicketKind::GenericData,
            Ticket::TlsClient { .. } => TicketKind::TlsClient,
            Ticket::TlsServer { .. } => TicketKind::TlsServer,
            Ticket::DockerGeneric { .. } => TicketKind::DockerGeneric,
            Ticket::DockerServer { .. } => TicketKind::DockerServer,
            Ticket::DockerClient { .. } => TicketKind::DockerClient,
        }
    }

    /// Raw payload of a generic data ticket
    pub fn generic_data(&self) -> Option<&[u8]> {
        match self {
            Ticket::GenericData { data } => Some(data),
            _ => None,
        }
    }

    /// Credential bundle of any TLS-based ticket
    pub fn tls_credentials(&self) -> Option<&TlsCredentials> {
        match self {
            Ticket::GenericData { .. } => None,
            Ticket::TlsClient { credentials }
            | Ticket::TlsServer { credentials }
            | Ticket::DockerGeneric { credentials }
            | Ticket::DockerServer { credentials }
            | Ticket::DockerClient { credentials } => Some(credentials),
        }
    }

    /// Dispatch to the visitor method for this ticket's kind
    pub fn visit<V: TicketVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Ticket::GenericData { data } => visitor.generic_data(data),
            Ticket::TlsClient { credentials } => visitor.tls_client(credentials),
            Ticket::TlsServer { credentials } => visitor.tls_server(credentials),
            Ticket::DockerGeneric { credentials } => visitor.docker_generic(credentials),
            Ticket::DockerServer { credentials } => visitor.docker_server(credentials),
            Ticket::DockerClient { credentials } => visitor.docker_client(credentials),
        }
    }
}

/// One handler per ticket kind.
///
/// None of the methods have default bodies, so every implementor is forced
/// to decide what each kind means for it.
pub trait TicketVisitor {
    type Output;

    fn generic_data(&mut self, data: &[u8]) -> Self::Output;
    fn tls_client(&mut self, credentials: &TlsCredentials) -> Self::Output;
    fn tls_server(&mut self, credentials: &TlsCredentials) -> Self::Output;
    fn docker_generic(&mut self, credentials: &TlsCredentials) -> Self::Output;
    fn docker_server(&mut self, credentials: &TlsCredentials) -> Self::Output;
    fn docker_client(&mut self, credentials: &TlsCredentials) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn creds(tag: &str) -> TlsCredentials {
        TlsCredentials::new(format!("{tag}-ca"), format!("{tag}-cert"), format!("{tag}-key"))
    }

    #[test]
    fn test_kind_names_are_unique_and_invertible() {
        let names: HashSet<_> = TicketKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), TicketKind::ALL.len());

        for kind in TicketKind::ALL {
            assert_eq!(kind.as_str().parse::<TicketKind>(), Ok(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("docker".parse::<TicketKind>().is_err());
    }

    #[test]
    fn test_tls_constructor_matches_kind() {
        for kind in TicketKind::ALL {
            match Ticket::tls(kind, creds("x")) {
                Some(ticket) => {
                    assert!(kind.is_tls());
                    assert_eq!(ticket.kind(), kind);
                    assert_eq!(ticket.tls_credentials(), Some(&creds("x")));
                    assert!(ticket.generic_data().is_none());
                }
                None => assert_eq!(kind, TicketKind::GenericData),
            }
        }
    }

    #[test]
    fn test_generic_ticket_accessors() {
        let ticket = Ticket::generic("hello");
        assert_eq!(ticket.kind(), TicketKind::GenericData);
        assert_eq!(ticket.generic_data(), Some(&b"hello"[..]));
        assert!(ticket.tls_credentials().is_none());
    }

    #[test]
    fn test_equality_requires_same_kind_and_payload() {
        let server = Ticket::tls(TicketKind::TlsServer, creds("a")).unwrap();
        let docker_server = Ticket::tls(TicketKind::DockerServer, creds("a")).unwrap();
        let other_payload = Ticket::tls(TicketKind::TlsServer, creds("b")).unwrap();

        assert_eq!(server, server.clone());
        assert_ne!(server, docker_server);
        assert_ne!(server, other_payload);
    }

    #[test]
    fn test_key_usage_per_kind() {
        assert!(TicketKind::GenericData.key_usage().is_empty());
        assert_eq!(TicketKind::DockerGeneric.key_usage(), &KeyUsage::BOTH);
        assert_eq!(TicketKind::TlsServer.key_usage(), &KeyUsage::BOTH);
        assert_eq!(TicketKind::TlsClient.key_usage(), &KeyUsage::BOTH);
        assert_eq!(TicketKind::DockerServer.key_usage(), &[KeyUsage::ServerAuth]);
        assert_eq!(TicketKind::DockerClient.key_usage(), &[KeyUsage::ClientAuth]);
    }

    #[test]
    fn test_json_shape() {
        let ticket = Ticket::generic("hi");
        let value = serde_json::to_value(&ticket).unwrap();
        assert_eq!(value["kind"], "generic_data");
        assert_eq!(value["value"]["data"], "aGk=");

        let ticket = Ticket::tls(TicketKind::DockerServer, creds("d")).unwrap();
        let value = serde_json::to_value(&ticket).unwrap();
        assert_eq!(value["kind"], "docker_server");
        assert_eq!(value["value"]["credentials"]["key"], "d-key");
    }

    #[test]
    fn test_json_round_trip_every_kind() {
        let mut tickets = vec![Ticket::generic(vec![0u8, 159, 146, 150])];
        for kind in TicketKind::ALL.into_iter().filter(TicketKind::is_tls) {
            tickets.push(Ticket::tls(kind, creds(kind.as_str())).unwrap());
        }

        for ticket in tickets {
            let json = serde_json::to_string(&ticket).unwrap();
            let decoded: Ticket = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, ticket);
        }
    }

    struct KindNamer;

    impl TicketVisitor for KindNamer {
        type Output = &'static str;

        fn generic_data(&mut self, _data: &[u8]) -> &'static str {
            "generic"
        }
        fn tls_client(&mut self, _credentials: &TlsCredentials) -> &'static str {
            "tls-client"
        }
        fn tls_server(&mut self, _credentials: &TlsCredentials) -> &'static str {
            "tls-server"
        }
        fn docker_generic(&mut self, _credentials: &TlsCredentials) -> &'static str {
            "docker"
        }
        fn docker_server(&mut self, _credentials: &TlsCredentials) -> &'static str {
            "docker-server"
        }
        fn docker_client(&mut self, _credentials: &TlsCredentials) -> &'static str {
            "docker-client"
        }
    }

    #[test]
    fn test_visitor_dispatch() {
        assert_eq!(Ticket::generic("x").visit(&mut KindNamer), "generic");
        let ticket = Ticket::tls(TicketKind::DockerClient, creds("c")).unwrap();
        assert_eq!(ticket.visit(&mut KindNamer), "docker-client");
    }
}
