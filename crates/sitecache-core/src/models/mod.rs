//! Data models for upstream sites, lists and list items.
//!
//! Each upstream response type (`Site`, `List`, `ListItem`) deserializes the
//! API's camelCase JSON and converts into the snake_case summary handed back
//! to tool callers (`SiteSummary`, `ListSummary`, `ItemSummary`).

pub mod list;
pub mod site;

pub use list::{ItemSummary, List, ListItem, ListSummary, UpdatedItem};
pub use site::{Site, SiteSummary};
