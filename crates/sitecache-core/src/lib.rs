//! Sitecache core - credential caching and document/list operations for agents.
//!
//! Agents hold an opaque broker session handle. For every tool call this
//! crate turns that handle into a delegated bearer credential (from the local
//! store when possible, from the token broker when not), calls the upstream
//! document/list API with it, and reports the outcome in a uniform
//! `{success, ...}` envelope.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod operations;
pub mod retry;
pub mod utils;

pub use api::{ApiError, UpstreamClient};
pub use auth::{BrokerClient, BrokerError, CredentialResolver, SessionHandle, TokenBroker};
pub use cache::{CredentialStore, StoreStats};
pub use config::Config;
pub use operations::{OperationError, Operations};
pub use retry::RetryPolicy;
