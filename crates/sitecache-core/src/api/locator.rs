use thiserror::Error;
use url::Url;

use super::encode_segment;

/// How a caller names a site: by its web URL or by the upstream site id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteLocator {
    Url(Url),
    Id(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("Either site_url or site_id must be provided")]
    Missing,

    #[error("Provide only one of site_url or site_id, not both")]
    Ambiguous,

    #[error("Invalid site URL format: {0}")]
    InvalidUrl(String),
}

impl SiteLocator {
    /// Build a locator from exactly one of `site_url` / `site_id`.
    /// Blank strings count as absent.
    pub fn from_args(site_url: Option<&str>, site_id: Option<&str>) -> Result<Self, LocatorError> {
        let site_url = site_url.map(str::trim).filter(|s| !s.is_empty());
        let site_id = site_id.map(str::trim).filter(|s| !s.is_empty());
        match (site_url, site_id) {
            (Some(_), Some(_)) => Err(LocatorError::Ambiguous),
            (None, None) => Err(LocatorError::Missing),
            (Some(raw), None) => Self::parse_url(raw).map(SiteLocator::Url),
            (None, Some(id)) => Ok(SiteLocator::Id(id.to_string())),
        }
    }

    fn parse_url(raw: &str) -> Result<Url, LocatorError> {
        let url = Url::parse(raw).map_err(|e| LocatorError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LocatorError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                raw
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(LocatorError::InvalidUrl(format!("{}: missing host", raw)));
        }
        Ok(url)
    }

    /// API path that fetches the site this locator names.
    ///
    /// `https://contoso.sharepoint.com/sites/engineering` becomes
    /// `/sites/contoso.sharepoint.com:/sites/engineering:`; a bare host URL
    /// becomes `/sites/contoso.sharepoint.com` (the root site).
    pub fn lookup_path(&self) -> String {
        match self {
            SiteLocator::Id(id) => format!("/sites/{}", encode_segment(id)),
            SiteLocator::Url(url) => {
                let host = url.host_str().unwrap_or_default();
                let path = url.path().trim_end_matches('/');
                if path.is_empty() {
                    format!("/sites/{}", host)
                } else {
                    format!("/sites/{}:{}:", host, path)
                }
            }
        }
    }
}
