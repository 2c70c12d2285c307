//! Wicket ticket service.
//!
//! Hands out short-lived credentials by name. TLS tickets are issued on
//! demand by a certificate authority loaded from the secret store; generic
//! tickets return a configured payload. When a blesser is configured the
//! service also exchanges Google ID tokens for blessings bound to the
//! caller's TLS client key.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!  TicketServer ─────► │  TicketService   │
//!  (wicket-protocol)   └──┬────────────┬──┘
//!                         │            │
//!                 ┌───────▼──────┐  ┌──▼────────────┐
//!                 │TicketRegistry│  │ GoogleBlesser │
//!                 └───────┬──────┘  └──┬────────────┘
//!                 ┌───────▼──────┐  ┌──▼────────────┐
//!                 │  TlsIssuer   │  │ TokenVerifier │
//!                 └───────┬──────┘  │ (OidcVerifier)│
//!          ┌──────────────▼──────┐  └───────────────┘
//!          │ SecretStore +       │
//!          │ CertificateAuthority│
//!          └─────────────────────┘
//! ```

pub mod authority;
pub mod blesser;
pub mod errors;
pub mod issuer;
pub mod oidc;
pub mod registry;
pub mod secrets;
pub mod service;

pub use authority::{CertificateAuthority, IssuedCertificate, DRIFT_MARGIN};
pub use blesser::{
    ClaimCheck, ClaimPolicy, GoogleBlesser, IdentityClaims, TokenError, TokenVerifier,
    VerifiedToken,
};
pub use errors::ServiceError;
pub use issuer::{IssuanceRequest, TlsIssuer};
pub use oidc::{OidcVerifier, GOOGLE_ISSUER};
pub use registry::{TicketRegistry, TicketSource};
pub use secrets::{AuthorityMaterial, FileSecretStore, MemorySecretStore, SecretStore};
pub use service::TicketService;
