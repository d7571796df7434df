//! REST client module for the upstream document/list API.
//!
//! This module provides the `UpstreamClient` for issuing authenticated calls
//! on behalf of a broker session, plus the `ApiError` taxonomy and
//! `SiteLocator` for naming sites by URL or id.
//!
//! The API uses bearer authentication; credentials come from the
//! `CredentialResolver` and are never obtained here directly.

pub mod client;
pub mod error;
pub mod locator;

pub use client::{encode_segment, UpstreamClient, UpstreamRequest, MAX_PAGE_SIZE};
pub use error::ApiError;
pub use locator::{LocatorError, SiteLocator};
