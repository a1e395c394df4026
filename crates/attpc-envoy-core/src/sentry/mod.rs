//! Sentry envoys.
//!
//! The Sentry is a small HTTP service running on each DataRouter host. It
//! replaces the Surveyor page with a JSON API and adds the catalog and backup
//! operations.

pub mod envoy;
pub mod types;

pub use envoy::{startup_sentry_envoys, SentryConfig, SentryEnvoy};
pub use types::{
    SentryOperation, SentryOperationResponse, SentryParameters, SentryResponse,
    SentryServerStatus, SentryStatus,
};
