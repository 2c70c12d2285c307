//! Ticket protocol types and constants.
//!
//! This module defines the wire messages exchanged between ticket clients and
//! the ticket service. Each message travels as one length-prefixed JSON frame
//! (see [`crate::frame`]).

use serde::{Deserialize, Serialize};

use crate::blessing::Blessing;
use crate::errors::{RemoteError, TicketProtocolError};
use crate::ticket::Ticket;

/// Ticket protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message size (10MB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Remote method invoked by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Method {
    /// Fetch a freshly built ticket by name
    Get { name: String },
    /// Exchange a Google ID token for a blessing bound to the caller's key
    BlessGoogle { id_token: String },
}

impl Method {
    /// Method name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Method::Get { .. } => "get",
            Method::BlessGoogle { .. } => "bless_google",
        }
    }
}

/// Request sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    /// Protocol version
    pub version: u32,
    /// Client-chosen id echoed in the response
    pub request_id: String,
    /// Invoked method and its arguments
    #[serde(flatten)]
    pub method: Method,
}

impl TicketRequest {
    pub fn new(request_id: impl Into<String>, method: Method) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: request_id.into(),
            method,
        }
    }
}

/// Result carried by a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum ResponseBody {
    Ticket(Ticket),
    Blessing(Blessing),
    Error(RemoteError),
}

/// Response sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketResponse {
    /// Protocol version
    pub version: u32,
    /// Id of the request this answers
    pub request_id: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl TicketResponse {
    pub fn new(request_id: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: request_id.into(),
            body,
        }
    }

    pub fn error(request_id: impl Into<String>, error: RemoteError) -> Self {
        Self::new(request_id, ResponseBody::Error(error))
    }

    /// Unwrap a ticket result
    pub fn into_ticket(self) -> Result<Ticket, TicketProtocolError> {
        match self.body {
            ResponseBody::Ticket(ticket) => Ok(ticket),
            ResponseBody::Error(err) => Err(err.into()),
            ResponseBody::Blessing(_) => Err(TicketProtocolError::UnexpectedResponse(
                "expected a ticket, got a blessing".to_string(),
            )),
        }
    }

    /// Unwrap a blessing result
    pub fn into_blessing(self) -> Result<Blessing, TicketProtocolError> {
        match self.body {
            ResponseBody::Blessing(blessing) => Ok(blessing),
            ResponseBody::Error(err) => Err(err.into()),
            ResponseBody::Ticket(_) => Err(TicketProtocolError::UnexpectedResponse(
                "expected a blessing, got a ticket".to_string(),
            )),
        }
    }
}
