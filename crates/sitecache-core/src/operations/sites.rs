use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::args::{session_handle, SiteArgs};
use super::{decode_all, OperationError, Operations};
use crate::api::UpstreamRequest;
use crate::auth::SessionHandle;
use crate::models::{Site, SiteSummary};

/// Sites returned when the caller does not say
const DEFAULT_MAX_SITES: i64 = 50;

/// Upper bound on `max_results` for site listings
const MAX_SITES: i64 = 500;

/// Terms tried when a plain listing finds nothing; they match most site names
const DISCOVERY_TERMS: [&str; 5] = ["site", "team", "project", "department", "group"];

#[derive(Debug, Clone, Deserialize)]
pub struct ListSitesArgs {
    pub session_token: String,
    pub search: Option<String>,
    pub max_results: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetSiteArgs {
    pub session_token: String,
    #[serde(flatten)]
    pub site: SiteArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteListing {
    pub count: usize,
    pub sites: Vec<SiteSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteDetail {
    pub site: SiteSummary,
}

impl Operations {
    /// Sites the session can reach, optionally narrowed by a search term.
    pub async fn list_sites(&self, args: ListSitesArgs) -> Result<SiteListing, OperationError> {
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_SITES);
        if !(1..=MAX_SITES).contains(&max_results) {
            return Err(OperationError::InvalidArguments(format!(
                "max_results must be between 1 and {}",
                MAX_SITES
            )));
        }
        let limit = max_results as usize;
        let session = session_handle(&args.session_token)?;
        let search = args
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut request = UpstreamRequest::get("/sites");
        if let Some(term) = search {
            request = request.query("search", term);
        }
        let mut sites: Vec<Site> = decode_all(self.client().list(&session, request, limit).await?)?;

        if sites.is_empty() && search.is_none() {
            info!("No sites listed, trying broad discovery search");
            sites = self.discover_sites(&session, limit).await;
            if !sites.is_empty() {
                info!(count = sites.len(), "Broad discovery found sites");
            }
        }

        let sites: Vec<SiteSummary> = sites.iter().map(Site::to_summary).collect();
        Ok(SiteListing {
            count: sites.len(),
            sites,
        })
    }

    /// Search a handful of common terms, de-duplicating by id, until `limit`
    /// sites are found. A failing term is skipped.
    async fn discover_sites(&self, session: &SessionHandle, limit: usize) -> Vec<Site> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for term in DISCOVERY_TERMS {
            let request = UpstreamRequest::get("/sites").query("search", term);
            let page = match self.client().list(session, request, limit).await {
                Ok(values) => values,
                Err(e) => {
                    warn!(term, error = %e, "Discovery search failed");
                    continue;
                }
            };
            let sites: Vec<Site> = match decode_all(page) {
                Ok(sites) => sites,
                Err(e) => {
                    warn!(term, error = %e, "Discovery search returned unexpected data");
                    continue;
                }
            };
            debug!(term, count = sites.len(), "Discovery search");

            for site in sites {
                if !site.id.is_empty() && seen.insert(site.id.clone()) {
                    found.push(site);
                }
            }
            if found.len() >= limit {
                break;
            }
        }

        found.truncate(limit);
        found
    }

    /// One site by URL or id.
    pub async fn get_site(&self, args: GetSiteArgs) -> Result<SiteDetail, OperationError> {
        let locator = args.site.locator()?;
        let session = session_handle(&args.session_token)?;
        let site: Site = self
            .client()
            .call_as(&session, &UpstreamRequest::get(locator.lookup_path()))
            .await?;
        Ok(SiteDetail {
            site: site.to_summary(),
        })
    }
}
