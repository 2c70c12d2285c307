//! Wicket Common Library
//!
//! Shared building blocks for the Wicket ticket service and its clients:
//!
//! - **Retry**: stateless backoff policies and a cancellable retry wait
//! - **Context**: explicitly threaded cancellation and deadlines
//! - **Identifiers**: type-safe request ids and authority references
//! - **Observability**: tracing subscriber setup

pub mod context;
pub mod ids;
pub mod observability;
pub mod retry;

pub use context::{CallContext, ContextError};
pub use ids::{AuthorityRef, RequestId};
pub use observability::{init_tracing, LogFormat};
pub use retry::{wait_for_next_attempt, Backoff, MaxRetries, RetryPolicy, WaitError};
