//! Foundational low-level utilities shared across ticket desk crates.
//!
//! Provides the retry/backoff policy used by every outbound HTTP client
//! (chat platform, upload service, classifier) so they fail and retry the
//! same way.

pub mod http_retry;

pub use http_retry::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error, RetryPolicy,
};
