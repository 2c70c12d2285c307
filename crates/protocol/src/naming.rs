//! Ticket names and server addressing.
//!
//! A ticket is named by a `/`-separated path such as `reflow/gdc/aws`. A
//! command-line argument may also pin the server explicitly by starting with
//! an endpoint segment: `/tickets.example.com:8443/reflow/gdc/aws`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::TicketProtocolError;

/// Validated hierarchical ticket name.
///
/// Stored without leading or trailing separators; never empty and never
/// containing an empty segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketName(String);

impl TicketName {
    pub fn new(name: &str) -> Result<Self, TicketProtocolError> {
        let trimmed = name.trim_matches('/');
        if trimmed.is_empty() {
            return Err(TicketProtocolError::InvalidName(
                "ticket name is empty".to_string(),
            ));
        }
        if trimmed.split('/').any(|segment| segment.is_empty()) {
            return Err(TicketProtocolError::InvalidName(format!(
                "empty segment in '{}'",
                name
            )));
        }
        if trimmed.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(TicketProtocolError::InvalidName(format!(
                "relative segment in '{}'",
                name
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for TicketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TicketName {
    type Err = TicketProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TicketName {
    type Error = TicketProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TicketName> for String {
    fn from(name: TicketName) -> Self {
        name.0
    }
}

/// A ticket name plus the server it should be fetched from, if pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketAddress {
    /// `host:port` from an explicit `/host:port/...` argument
    pub endpoint: Option<String>,
    pub name: TicketName,
}

impl TicketAddress {
    /// Parse a command-line ticket argument.
    pub fn parse(arg: &str) -> Result<Self, TicketProtocolError> {
        if let Some(rest) = arg.strip_prefix('/') {
            if let Some((first, remainder)) = rest.split_once('/') {
                if is_endpoint(first) {
                    return Ok(Self {
                        endpoint: Some(first.to_string()),
                        name: TicketName::new(remainder)?,
                    });
                }
            } else if is_endpoint(rest) {
                return Err(TicketProtocolError::InvalidName(format!(
                    "'{}' names a server but no ticket",
                    arg
                )));
            }
        }
        Ok(Self {
            endpoint: None,
            name: TicketName::new(arg)?,
        })
    }

    /// Endpoint to dial, falling back to `default_endpoint`
    pub fn endpoint_or<'a>(&'a self, default_endpoint: Option<&'a str>) -> Option<&'a str> {
        self.endpoint.as_deref().or(default_endpoint)
    }
}

impl FromStr for TicketAddress {
    type Err = TicketProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `host:port` with a numeric port. Bracketed IPv6 hosts are accepted.
fn is_endpoint(segment: &str) -> bool {
    match segment.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_names_are_normalised() {
        let name = TicketName::new("/reflow/gdc/aws/").unwrap();
        assert_eq!(name.as_str(), "reflow/gdc/aws");
        assert_eq!(name.segments().collect::<Vec<_>>(), ["reflow", "gdc", "aws"]);
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["", "/", "//", "a//b", "a/../b", "./a"] {
            assert!(TicketName::new(bad).is_err(), "'{bad}' should be rejected");
        }
    }

    #[test]
    fn test_explicit_endpoint() {
        let addr = TicketAddress::parse("/tickets.example.com:8443/reflow/gdc/aws").unwrap();
        assert_eq!(addr.endpoint.as_deref(), Some("tickets.example.com:8443"));
        assert_eq!(addr.name.as_str(), "reflow/gdc/aws");
        assert_eq!(addr.endpoint_or(Some("other:1")), Some("tickets.example.com:8443"));

        let v6 = TicketAddress::parse("/[::1]:9000/a").unwrap();
        assert_eq!(v6.endpoint.as_deref(), Some("[::1]:9000"));
    }

    #[test]
    fn test_relative_address_uses_default_server() {
        let addr = TicketAddress::parse("reflow/gdc/aws").unwrap();
        assert!(addr.endpoint.is_none());
        assert_eq!(addr.endpoint_or(Some("default:8443")), Some("default:8443"));

        // A leading separator without an endpoint is just a relative name
        let addr = TicketAddress::parse("/reflow/gdc/aws").unwrap();
        assert!(addr.endpoint.is_none());
        assert_eq!(addr.name.as_str(), "reflow/gdc/aws");
    }

    #[test]
    fn test_endpoint_without_ticket_is_rejected() {
        assert!(TicketAddress::parse("/host:8443").is_err());
        assert!(TicketAddress::parse("/host:8443/").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let name: TicketName = serde_json::from_str("\"a/b\"").unwrap();
        assert_eq!(name.as_str(), "a/b");
        assert!(serde_json::from_str::<TicketName>("\"a//b\"").is_err());
    }
}
