//! Argument checks shared by the operations.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::OperationError;
use crate::api::SiteLocator;
use crate::auth::SessionHandle;

/// The site an operation targets: exactly one of `site_url` / `site_id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteArgs {
    pub site_url: Option<String>,
    pub site_id: Option<String>,
}

impl SiteArgs {
    pub fn locator(&self) -> Result<SiteLocator, OperationError> {
        Ok(SiteLocator::from_args(
            self.site_url.as_deref(),
            self.site_id.as_deref(),
        )?)
    }
}

pub(crate) fn session_handle(token: &str) -> Result<SessionHandle, OperationError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(OperationError::InvalidArguments(
            "session_token must not be empty".to_string(),
        ));
    }
    Ok(SessionHandle::new(token))
}

pub(crate) fn required<'a>(name: &str, value: &'a str) -> Result<&'a str, OperationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(OperationError::InvalidArguments(format!(
            "{} must not be empty",
            name
        )));
    }
    Ok(value)
}

/// Item ids are numeric strings upstream; accept them as JSON numbers too
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

/// `fields` must be a JSON object of column name to value
pub(crate) fn field_map(fields: Option<Value>) -> Result<Map<String, Value>, OperationError> {
    match fields {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(OperationError::InvalidArguments(
            "fields must be a JSON object".to_string(),
        )),
        None => Err(OperationError::InvalidArguments(
            "fields is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_handle_rejects_blank() {
        assert!(session_handle("  ").is_err());
        assert_eq!(session_handle(" S1 ").unwrap().expose(), "S1");
    }

    #[test]
    fn test_field_map() {
        assert_eq!(field_map(Some(json!({"Title": "x"}))).unwrap()["Title"], "x");
        assert!(field_map(Some(json!(["Title"]))).is_err());
        assert!(field_map(None).is_err());
    }

    #[derive(Deserialize)]
    struct Id {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
    }

    #[test]
    fn test_ids_accept_numbers() {
        let id: Id = serde_json::from_value(json!({"id": 42})).unwrap();
        assert_eq!(id.id, "42");
        let id: Id = serde_json::from_value(json!({"id": "42"})).unwrap();
        assert_eq!(id.id, "42");
        assert!(serde_json::from_value::<Id>(json!({"id": true})).is_err());
    }

    #[test]
    fn test_site_args_need_exactly_one() {
        let both = SiteArgs {
            site_url: Some("https://contoso.sharepoint.com/sites/a".into()),
            site_id: Some("abc".into()),
        };
        assert!(matches!(both.locator(), Err(OperationError::InvalidArguments(_))));
        assert!(SiteArgs::default().locator().is_err());
    }
}
