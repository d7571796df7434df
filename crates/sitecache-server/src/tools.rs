//! Tool definitions advertised by `tools/list`.

use serde_json::{json, Value};
use sitecache_core::operations::{
    CREATE_LIST_ITEM, GET_LIST_ITEMS, GET_SITE, LIST_LISTS, LIST_SITES, UPDATE_LIST_ITEM,
};

fn session_token() -> Value {
    json!({
        "type": "string",
        "description": "REQUIRED: vault session token. Obtain it by unlocking the vault first; it is exchanged for a Microsoft 365 credential on every call."
    })
}

fn site_url() -> Value {
    json!({
        "type": "string",
        "description": "Full SharePoint site URL, e.g. https://contoso.sharepoint.com/sites/engineering. Provide this or site_id, not both."
    })
}

fn site_id() -> Value {
    json!({
        "type": "string",
        "description": "SharePoint site id. Provide this or site_url, not both."
    })
}

fn list_id() -> Value {
    json!({
        "type": "string",
        "description": "List id or list title."
    })
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// Every tool, in the order clients see them
pub fn definitions() -> Vec<Value> {
    vec![
        tool(
            GET_SITE,
            "Get SharePoint site information (name, description, URL, timestamps) by site URL or site id.",
            json!({
                "session_token": session_token(),
                "site_url": site_url(),
                "site_id": site_id(),
            }),
            &["session_token"],
        ),
        tool(
            LIST_SITES,
            "List SharePoint sites the user can access, optionally filtered by a search term. Without a search, falls back to a broad discovery search when nothing is followed.",
            json!({
                "session_token": session_token(),
                "search": {
                    "type": "string",
                    "description": "Free-text search over site names."
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 500,
                    "default": 50,
                    "description": "Maximum number of sites to return."
                },
            }),
            &["session_token"],
        ),
        tool(
            LIST_LISTS,
            "List the lists and document libraries in a SharePoint site.",
            json!({
                "session_token": session_token(),
                "site_url": site_url(),
                "site_id": site_id(),
                "include_hidden": {
                    "type": "boolean",
                    "default": false,
                    "description": "Include hidden system lists."
                },
            }),
            &["session_token"],
        ),
        tool(
            GET_LIST_ITEMS,
            "Get items from a SharePoint list with their field values. Supports OData filters such as \"fields/Status eq 'Active'\".",
            json!({
                "session_token": session_token(),
                "site_url": site_url(),
                "site_id": site_id(),
                "list_id": list_id(),
                "max_results": {
                    "type": "integer",
                    "default": 100,
                    "description": "Maximum number of items to return (clamped to 1-500)."
                },
                "filter": {
                    "type": "string",
                    "description": "OData filter expression, passed to SharePoint as-is."
                },
                "select": {
                    "type": "string",
                    "description": "Comma-separated field names to return, e.g. \"Title,Status,DueDate\"."
                },
            }),
            &["session_token", "list_id"],
        ),
        tool(
            CREATE_LIST_ITEM,
            "Create a new item in a SharePoint list. Field names are internal column names, e.g. {\"Title\": \"New task\", \"Status\": \"Active\"}.",
            json!({
                "session_token": session_token(),
                "site_url": site_url(),
                "site_id": site_id(),
                "list_id": list_id(),
                "fields": {
                    "type": "object",
                    "description": "Column name to value mapping for the new item."
                },
            }),
            &["session_token", "list_id", "fields"],
        ),
        tool(
            UPDATE_LIST_ITEM,
            "Update fields of an existing SharePoint list item. Only the given fields change.",
            json!({
                "session_token": session_token(),
                "site_url": site_url(),
                "site_id": site_id(),
                "list_id": list_id(),
                "item_id": {
                    "type": "string",
                    "description": "Id of the item to update."
                },
                "fields": {
                    "type": "object",
                    "description": "Column name to value mapping of the fields to change."
                },
            }),
            &["session_token", "list_id", "item_id", "fields"],
        ),
    ]
}
