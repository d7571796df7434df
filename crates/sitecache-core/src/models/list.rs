use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// List as returned by the upstream API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct List {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "webUrl")]
    pub web_url: Option<String>,
    #[serde(rename = "createdDateTime")]
    pub created_date_time: Option<String>,
    /// Some tenants report visibility at the top level
    pub hidden: Option<bool>,
    pub list: Option<ListInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInfo {
    pub template: Option<String>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListSummary {
    pub id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub web_url: Option<String>,
    pub list_template: Option<String>,
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
}

impl List {
    pub fn is_hidden(&self) -> bool {
        self.hidden
            .or_else(|| self.list.as_ref().and_then(|l| l.hidden))
            .unwrap_or(false)
    }

    pub fn to_summary(&self) -> ListSummary {
        ListSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            web_url: self.web_url.clone(),
            list_template: self.list.as_ref().and_then(|l| l.template.clone()),
            hidden: self.is_hidden(),
            description: self.description.clone(),
            created_date_time: self.created_date_time.clone(),
        }
    }
}

/// List item as returned by the upstream API (with `$expand=fields`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(rename = "webUrl")]
    pub web_url: Option<String>,
    #[serde(rename = "createdDateTime")]
    pub created_date_time: Option<String>,
    #[serde(rename = "lastModifiedDateTime")]
    pub last_modified_date_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub fields: Map<String, Value>,
    pub web_url: Option<String>,
    pub created_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<String>,
}

impl ListItem {
    pub fn to_summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id.clone(),
            fields: self.fields.clone(),
            web_url: self.web_url.clone(),
            created_date_time: self.created_date_time.clone(),
            last_modified_date_time: self.last_modified_date_time.clone(),
        }
    }
}

/// Result of a field update: the item id and the fields as now stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatedItem {
    pub id: String,
    pub fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_read_from_either_location() {
        let top: List = serde_json::from_str(r#"{"id":"1","hidden":true}"#).unwrap();
        assert!(top.is_hidden());
        let nested: List =
            serde_json::from_str(r#"{"id":"2","list":{"template":"genericList","hidden":true}}"#).unwrap();
        assert!(nested.is_hidden());
        assert_eq!(nested.to_summary().list_template.as_deref(), Some("genericList"));
        let visible: List = serde_json::from_str(r#"{"id":"3"}"#).unwrap();
        assert!(!visible.is_hidden());
    }

    #[test]
    fn test_item_summary_keeps_fields() {
        let item: ListItem = serde_json::from_str(
            r#"{"id":"42","fields":{"Title":"Test","Priority":2},"webUrl":"https://x/42","createdDateTime":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        let summary = item.to_summary();
        assert_eq!(summary.id, "42");
        assert_eq!(summary.fields["Title"], "Test");
        assert_eq!(summary.fields["Priority"], 2);
    }
}
