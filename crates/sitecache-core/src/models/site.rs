use serde::{Deserialize, Serialize};

/// Site as returned by the upstream API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Site {
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
    #[serde(rename = "lastModifiedDateTime")]
    pub last_modified_date_time: Option<String>,
}

/// Site as reported to tool callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSummary {
    pub id: String,
    pub name: Option<String>,
    pub web_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<String>,
}

impl Site {
    /// Prefer the short `name`, fall back to `displayName`
    pub fn display(&self) -> Option<String> {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.display_name.clone())
    }

    pub fn to_summary(&self) -> SiteSummary {
        SiteSummary {
            id: self.id.clone(),
            name: self.display(),
            web_url: self.web_url.clone(),
            description: self.description.clone(),
            created_date_time: self.created_date_time.clone(),
            last_modified_date_time: self.last_modified_date_time.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_summary_falls_back_to_display_name() {
        let json = r#"{"id":"contoso.sharepoint.com,1,2","displayName":"Engineering","webUrl":"https://contoso.sharepoint.com/sites/engineering"}"#;
        let site: Site = serde_json::from_str(json).unwrap();
        let summary = site.to_summary();
        assert_eq!(summary.name.as_deref(), Some("Engineering"));

        let out = serde_json::to_value(&summary).unwrap();
        assert_eq!(out["web_url"], "https://contoso.sharepoint.com/sites/engineering");
        assert!(out.get("description").is_none());
    }
}
