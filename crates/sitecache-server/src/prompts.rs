//! Workflow prompts served by `prompts/list` and `prompts/get`.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PromptError {
    #[error("Unknown prompt: {0}")]
    Unknown(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),
}

struct Prompt {
    name: &'static str,
    description: &'static str,
    arguments: &'static [(&'static str, &'static str)],
}

const PROMPTS: [Prompt; 3] = [
    Prompt {
        name: "get_site_info_workflow",
        description: "Get comprehensive SharePoint site information",
        arguments: &[("site_url", "SharePoint site URL")],
    },
    Prompt {
        name: "list_items_workflow",
        description: "Browse SharePoint list items",
        arguments: &[
            ("site_url", "SharePoint site URL"),
            ("list_id", "List id or title"),
        ],
    },
    Prompt {
        name: "create_item_workflow",
        description: "Create item in SharePoint list",
        arguments: &[
            ("site_url", "SharePoint site URL"),
            ("list_id", "List id or title"),
            ("fields", "Field values for the new item"),
        ],
    },
];

pub fn definitions() -> Vec<Value> {
    PROMPTS
        .iter()
        .map(|p| {
            let arguments: Vec<Value> = p
                .arguments
                .iter()
                .map(|(name, description)| {
                    json!({"name": name, "description": description, "required": true})
                })
                .collect();
            json!({
                "name": p.name,
                "description": p.description,
                "arguments": arguments,
            })
        })
        .collect()
}

/// Argument as text; objects such as `fields` are rendered as JSON
fn argument(args: &Map<String, Value>, name: &'static str) -> Result<String, PromptError> {
    match args.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Null) | Some(Value::String(_)) | None => Err(PromptError::MissingArgument(name)),
        Some(other) => Ok(other.to_string()),
    }
}

/// Render prompt `name` as a `prompts/get` result
pub fn render(name: &str, args: &Map<String, Value>) -> Result<Value, PromptError> {
    let prompt = PROMPTS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| PromptError::Unknown(name.to_string()))?;

    let text = match prompt.name {
        "get_site_info_workflow" => format!(
            "Get information about SharePoint site: {}\n\n\
             Use sharepoint_get_site tool with session_token and site_url.\n\
             Then use sharepoint_list_lists to show available lists in the site.",
            argument(args, "site_url")?
        ),
        "list_items_workflow" => format!(
            "Get items from SharePoint list: {} in site: {}\n\n\
             Use sharepoint_get_list_items with session_token, site_url, and list_id.",
            argument(args, "list_id")?,
            argument(args, "site_url")?
        ),
        _ => format!(
            "Create item in SharePoint list: {}\nSite: {}\nFields: {}\n\n\
             Use sharepoint_create_list_item with session_token, site_url, list_id, and fields.",
            argument(args, "list_id")?,
            argument(args, "site_url")?,
            argument(args, "fields")?
        ),
    };

    Ok(json!({
        "description": prompt.description,
        "messages": [
            {"role": "user", "content": {"type": "text", "text": text}}
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_definitions_list_three_prompts() {
        let defs = definitions();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[2]["arguments"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_render_site_info() {
        let out = render(
            "get_site_info_workflow",
            &args(json!({"site_url": "https://contoso.sharepoint.com/sites/engineering"})),
        )
        .unwrap();
        let text = out["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("https://contoso.sharepoint.com/sites/engineering"));
        assert!(text.contains("sharepoint_get_site"));
        assert_eq!(out["messages"][0]["role"], "user");
    }

    #[test]
    fn test_render_create_item_formats_fields() {
        let out = render(
            "create_item_workflow",
            &args(json!({"site_url": "https://x", "list_id": "Tasks", "fields": {"Title": "Test"}})),
        )
        .unwrap();
        let text = out["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains(r#"Fields: {"Title":"Test"}"#));
    }

    #[test]
    fn test_render_errors() {
        assert_eq!(
            render("nope", &Map::new()),
            Err(PromptError::Unknown("nope".to_string()))
        );
        assert_eq!(
            render("list_items_workflow", &args(json!({"site_url": "https://x"}))),
            Err(PromptError::MissingArgument("list_id"))
        );
    }
}
