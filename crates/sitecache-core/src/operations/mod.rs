//! Tool operations over sites, lists and list items.
//!
//! Each operation validates its own arguments before any network call,
//! delegates to the `UpstreamClient`, and reports its outcome through the
//! uniform envelope: `{"success": true, ...payload}` or
//! `{"success": false, "error": "..."}`. Nothing escapes `dispatch` as an
//! error; the calling agent branches on `success`.

mod args;
mod lists;
mod sites;

pub use args::SiteArgs;
pub use lists::{
    CreateListItemArgs, CreatedItem, GetListItemsArgs, ItemListing, ListListing, ListListsArgs,
    UpdateListItemArgs, UpdatedItemResult,
};
pub use sites::{GetSiteArgs, ListSitesArgs, SiteDetail, SiteListing};

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, LocatorError, UpstreamClient};
use crate::auth::{BrokerClient, BrokerError, CredentialResolver};
use crate::cache::CredentialStore;
use crate::config::Config;

// ============================================================================
// Tool Names
// ============================================================================

pub const LIST_SITES: &str = "sharepoint_list_sites";
pub const GET_SITE: &str = "sharepoint_get_site";
pub const LIST_LISTS: &str = "sharepoint_list_lists";
pub const GET_LIST_ITEMS: &str = "sharepoint_get_list_items";
pub const CREATE_LIST_ITEM: &str = "sharepoint_create_list_item";
pub const UPDATE_LIST_ITEM: &str = "sharepoint_update_list_item";

/// Every tool `dispatch` understands, in listing order
pub const TOOL_NAMES: [&str; 6] = [
    GET_SITE,
    LIST_SITES,
    LIST_LISTS,
    GET_LIST_ITEMS,
    CREATE_LIST_ITEM,
    UPDATE_LIST_ITEM,
];

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<BrokerError> for OperationError {
    fn from(e: BrokerError) -> Self {
        OperationError::Api(ApiError::Broker(e))
    }
}

impl From<LocatorError> for OperationError {
    fn from(e: LocatorError) -> Self {
        OperationError::InvalidArguments(e.to_string())
    }
}

impl OperationError {
    /// Message reported to the calling agent in the failure envelope.
    /// Broker failures get instructions the user can act on.
    pub fn message(&self) -> String {
        match self {
            OperationError::Api(ApiError::Broker(e)) => match e {
                BrokerError::SessionInvalidOrExpired => {
                    "Your session has expired or is invalid. Unlock the vault again to get a new session token."
                        .to_string()
                }
                BrokerError::ProviderNotConfigured => {
                    "Microsoft 365 is not configured for this account. Add Microsoft 365 credentials in the vault dashboard."
                        .to_string()
                }
                BrokerError::InsufficientScope => {
                    "This session is not allowed to access Microsoft 365 (insufficient scope).".to_string()
                }
                BrokerError::Unauthorized => {
                    "Server authentication with the credential broker failed. Contact your administrator (invalid broker API key)."
                        .to_string()
                }
                BrokerError::TransientUnavailable(_) => {
                    "The credential broker is not responding. Please try again in a moment.".to_string()
                }
                BrokerError::InvalidResponse(detail) => {
                    format!("The credential broker returned an unexpected response: {}", detail)
                }
            },
            other => other.to_string(),
        }
    }
}

/// Wrap an operation outcome in the uniform envelope.
pub fn envelope(result: Result<Value, OperationError>) -> Value {
    match result {
        Ok(Value::Object(mut payload)) => {
            payload.insert("success".to_string(), Value::Bool(true));
            Value::Object(payload)
        }
        Ok(other) => json!({ "success": true, "result": other }),
        Err(e) => json!({ "success": false, "error": e.message() }),
    }
}

/// Decode tool arguments; a missing argument object counts as empty.
fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, OperationError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| OperationError::InvalidArguments(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>, ApiError> {
    values
        .into_iter()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| ApiError::InvalidResponse(format!("unexpected item shape: {}", e)))
        })
        .collect()
}

fn to_payload<T: Serialize>(output: T) -> Result<Value, OperationError> {
    serde_json::to_value(output)
        .map_err(|e| ApiError::InvalidResponse(format!("failed to encode result: {}", e)).into())
}

// ============================================================================
// Operations
// ============================================================================

/// Entry point for the six tool operations.
/// Clone is cheap - everything behind it is shared.
#[derive(Clone)]
pub struct Operations {
    client: UpstreamClient,
}

impl Operations {
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    /// Wire the store, broker, resolver and upstream client from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let cache_dir = config.cache_dir()?;
        let store = CredentialStore::open(cache_dir.clone(), config.safety_margin())
            .with_context(|| format!("Failed to open credential store at {}", cache_dir.display()))?;
        let broker = BrokerClient::new(
            &config.broker_url,
            &config.provider,
            config.broker_api_key.clone(),
            config.broker_timeout(),
            config.broker_retry,
        )
        .context("Failed to create broker client")?;
        let resolver = CredentialResolver::new(Arc::new(store), Arc::new(broker), config.provider.clone());
        let client = UpstreamClient::new(
            &config.graph_url,
            Arc::new(resolver),
            config.request_timeout(),
            config.upstream_retry,
            config.rate_limit_retry,
        )
        .context("Failed to create upstream client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.client.resolver().store()
    }

    /// Run `tool` and always answer with an envelope.
    pub async fn dispatch(&self, tool: &str, arguments: Value) -> Value {
        info!(tool, "Tool call");
        let result = self.call_tool(tool, arguments).await;
        match result {
            Ok(_) => info!(tool, "Tool call succeeded"),
            Err(ref e) => warn!(tool, error = %e, "Tool call failed"),
        }
        envelope(result)
    }

    /// Run `tool`, returning its payload without the envelope.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, OperationError> {
        match tool {
            LIST_SITES => to_payload(self.list_sites(parse_args(arguments)?).await?),
            GET_SITE => to_payload(self.get_site(parse_args(arguments)?).await?),
            LIST_LISTS => to_payload(self.list_lists(parse_args(arguments)?).await?),
            GET_LIST_ITEMS => to_payload(self.get_list_items(parse_args(arguments)?).await?),
            CREATE_LIST_ITEM => to_payload(self.create_list_item(parse_args(arguments)?).await?),
            UPDATE_LIST_ITEM => to_payload(self.update_list_item(parse_args(arguments)?).await?),
            other => Err(OperationError::UnknownTool(other.to_string())),
        }
    }
}
