//! Authentication module for obtaining delegated bearer credentials.
//!
//! This module provides:
//! - `SessionHandle`, `Credential`, `CacheKey`: the values passed around
//! - `BrokerClient`: exchanges a session handle with the token broker
//! - `CredentialResolver`: cache-first resolution with coalesced exchanges
//!
//! This server never runs an OAuth flow itself; the broker owns the user's
//! session lifetime, and credential expiry always comes from the broker.

pub mod broker;
pub mod credential;
pub mod resolver;

pub use broker::{BrokerClient, BrokerError, TokenBroker};
pub use credential::{CacheKey, Credential, SessionHandle};
pub use resolver::CredentialResolver;
