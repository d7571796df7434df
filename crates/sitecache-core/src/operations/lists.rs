use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::args::{field_map, required, session_handle, string_or_number, SiteArgs};
use super::{decode_all, OperationError, Operations};
use crate::api::{encode_segment, ApiError, UpstreamRequest};
use crate::models::{ItemSummary, List, ListItem, ListSummary, UpdatedItem};

/// Items returned when the caller does not say
const DEFAULT_MAX_ITEMS: i64 = 100;

/// `max_results` for items is clamped to this
const MAX_ITEMS: i64 = 500;

/// Lets the upstream evaluate filters on non-indexed columns instead of refusing them
const PREFER_HEADER: &str = "Prefer";
const NON_INDEXED_QUERIES: &str = "HonorNonIndexedQueriesWarningMayFailRandomly";

// ===== Arguments =====

#[derive(Debug, Clone, Deserialize)]
pub struct ListListsArgs {
    pub session_token: String,
    #[serde(flatten)]
    pub site: SiteArgs,
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetListItemsArgs {
    pub session_token: String,
    #[serde(flatten)]
    pub site: SiteArgs,
    pub list_id: String,
    pub max_results: Option<i64>,
    pub filter: Option<String>,
    pub select: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateListItemArgs {
    pub session_token: String,
    #[serde(flatten)]
    pub site: SiteArgs,
    pub list_id: String,
    pub fields: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateListItemArgs {
    pub session_token: String,
    #[serde(flatten)]
    pub site: SiteArgs,
    pub list_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub item_id: String,
    pub fields: Option<Value>,
}

// ===== Results =====

#[derive(Debug, Clone, Serialize)]
pub struct ListListing {
    pub site_id: String,
    pub count: usize,
    pub lists: Vec<ListSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemListing {
    pub site_id: String,
    pub list_id: String,
    pub count: usize,
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedItem {
    pub item: ItemSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatedItemResult {
    pub item: UpdatedItem,
}

fn lists_path(site_id: &str) -> String {
    format!("/sites/{}/lists", encode_segment(site_id))
}

fn items_path(site_id: &str, list_id: &str) -> String {
    format!("{}/{}/items", lists_path(site_id), encode_segment(list_id))
}

/// `$expand` value for item queries, narrowed to `select` when given
fn expand_fields(select: Option<&str>) -> String {
    match select.map(str::trim).filter(|s| !s.is_empty()) {
        Some(select) => format!("fields($select={})", select),
        None => "fields".to_string(),
    }
}

fn clamp_max_items(requested: Option<i64>) -> usize {
    requested.unwrap_or(DEFAULT_MAX_ITEMS).clamp(1, MAX_ITEMS) as usize
}

impl Operations {
    /// Lists in a site, hidden ones only on request.
    pub async fn list_lists(&self, args: ListListsArgs) -> Result<ListListing, OperationError> {
        let locator = args.site.locator()?;
        let session = session_handle(&args.session_token)?;

        let client = self.client();
        let site_id = client.resolve_site_id(&session, &locator).await?;
        let values = client
            .list(&session, UpstreamRequest::get(lists_path(&site_id)), usize::MAX)
            .await?;
        let lists: Vec<List> = decode_all(values)?;
        let total = lists.len();

        let lists: Vec<ListSummary> = lists
            .iter()
            .filter(|list| args.include_hidden || !list.is_hidden())
            .map(List::to_summary)
            .collect();
        debug!(site_id = %site_id, total, shown = lists.len(), "Listed lists");

        Ok(ListListing {
            site_id,
            count: lists.len(),
            lists,
        })
    }

    /// Items of one list with their field values.
    ///
    /// `filter` and `select` go to the upstream untouched; a malformed
    /// expression comes back as the upstream's own `InvalidQuery`.
    pub async fn get_list_items(&self, args: GetListItemsArgs) -> Result<ItemListing, OperationError> {
        let locator = args.site.locator()?;
        let list_id = required("list_id", &args.list_id)?.to_string();
        let session = session_handle(&args.session_token)?;
        let limit = clamp_max_items(args.max_results);

        let filter = args
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        let client = self.client();
        let site_id = client.resolve_site_id(&session, &locator).await?;
        let mut request = UpstreamRequest::get(items_path(&site_id, &list_id))
            .query("$expand", expand_fields(args.select.as_deref()));
        if let Some(filter) = filter {
            request = request
                .query("$filter", filter)
                .header(PREFER_HEADER, NON_INDEXED_QUERIES);
        }
        let items: Vec<ListItem> = decode_all(client.list(&session, request, limit).await?)?;

        let items: Vec<ItemSummary> = items.iter().map(ListItem::to_summary).collect();
        Ok(ItemListing {
            site_id,
            list_id,
            count: items.len(),
            items,
        })
    }

    /// Create an item from a column-name to value mapping.
    pub async fn create_list_item(&self, args: CreateListItemArgs) -> Result<CreatedItem, OperationError> {
        let locator = args.site.locator()?;
        let list_id = required("list_id", &args.list_id)?.to_string();
        let fields = field_map(args.fields)?;
        let session = session_handle(&args.session_token)?;

        let client = self.client();
        let site_id = client.resolve_site_id(&session, &locator).await?;
        let request = UpstreamRequest::post(items_path(&site_id, &list_id), json!({ "fields": fields }));
        let created: ListItem = client.call_as(&session, &request).await?;
        debug!(site_id = %site_id, list_id = %list_id, item_id = %created.id, "Created list item");

        Ok(CreatedItem {
            item: created.to_summary(),
        })
    }

    /// Change only the given fields of an existing item.
    /// Sending the same fields twice leaves the item in the same state.
    pub async fn update_list_item(&self, args: UpdateListItemArgs) -> Result<UpdatedItemResult, OperationError> {
        let locator = args.site.locator()?;
        let list_id = required("list_id", &args.list_id)?.to_string();
        let item_id = required("item_id", &args.item_id)?.to_string();
        let fields = field_map(args.fields)?;
        let session = session_handle(&args.session_token)?;

        let client = self.client();
        let site_id = client.resolve_site_id(&session, &locator).await?;
        let path = format!("{}/{}/fields", items_path(&site_id, &list_id), encode_segment(&item_id));
        let stored = match client
            .call(&session, &UpstreamRequest::patch(path, Value::Object(fields)))
            .await?
        {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ApiError::InvalidResponse(format!(
                    "expected updated fields, got {}",
                    other
                ))
                .into())
            }
        };

        Ok(UpdatedItemResult {
            item: UpdatedItem {
                id: item_id,
                fields: stored,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_fields() {
        assert_eq!(expand_fields(None), "fields");
        assert_eq!(expand_fields(Some("  ")), "fields");
        assert_eq!(expand_fields(Some("Title,Status")), "fields($select=Title,Status)");
    }

    #[test]
    fn test_clamp_max_items() {
        assert_eq!(clamp_max_items(None), 100);
        assert_eq!(clamp_max_items(Some(0)), 1);
        assert_eq!(clamp_max_items(Some(10_000)), 500);
        assert_eq!(clamp_max_items(Some(25)), 25);
    }

    #[test]
    fn test_item_paths_encode_ids() {
        assert_eq!(
            items_path("contoso.sharepoint.com,1,2", "My Tasks"),
            "/sites/contoso.sharepoint.com,1,2/lists/My%20Tasks/items"
        );
    }

    #[test]
    fn test_update_args_require_item_id() {
        let args: UpdateListItemArgs = serde_json::from_value(json!({
            "session_token": "S1",
            "site_id": "abc",
            "list_id": "Tasks",
            "item_id": " ",
            "fields": {"Status": "Done"}
        }))
        .unwrap();
        assert!(required("item_id", &args.item_id).is_err());
        assert_eq!(args.site.site_id.as_deref(), Some("abc"));
    }
}
