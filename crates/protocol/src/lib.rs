//! Wicket Protocol
//!
//! Everything a ticket client and a ticket server share:
//!
//! - **Tickets**: the closed [`Ticket`] sum type and its TLS credential bundle
//! - **Blessings**: signed, expiring delegations minted by a [`Principal`]
//! - **Wire protocol**: versioned JSON requests and responses in
//!   length-prefixed frames
//! - **Transport**: TCP with optional mutual TLS, a retrying [`TicketClient`]
//!   and a [`TicketServer`] dispatching to a [`TicketHandler`]

pub mod blessing;
pub mod client;
pub mod credentials;
pub mod errors;
pub mod frame;
pub mod naming;
pub mod protocol;
pub mod server;
pub mod ticket;
pub mod tls;

pub use blessing::{Blessing, BlessingError, Caveat, Principal, CHAIN_SEPARATOR};
pub use client::{ClientConfig, TicketClient};
pub use credentials::{KeyUsage, TlsCredentials};
pub use errors::{ErrorCode, RemoteError, TicketProtocolError};
pub use naming::{TicketAddress, TicketName};
pub use protocol::{
    Method, ResponseBody, TicketRequest, TicketResponse, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use server::{CallInfo, TicketHandler, TicketServer, DEFAULT_IDLE_TIMEOUT};
pub use ticket::{Ticket, TicketKind, TicketVisitor};

/// Serde adapter encoding byte fields as standard base64 strings.
pub(crate) mod serde_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
