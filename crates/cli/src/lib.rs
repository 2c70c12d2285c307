//! Wicket ticket client.
//!
//! Fetches one named ticket and either prints it or saves its TLS bundle.
//! Everything the `wicket-ticket` binary does lives here so it can be
//! driven from tests without a terminal.

pub mod consumer;
pub mod errors;
pub mod persist;

pub use consumer::{consume, emit, ConsumeOptions, Outcome, TicketFetcher};
pub use errors::{CliError, USAGE_EXIT_CODE};
pub use persist::{save_credentials, write_atomic, OutputPaths, CERT_MODE, KEY_MODE};
