use super::{SearchProvider, finalize_links, on_domain};
use crate::error::TransportError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const CUSTOM_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// The API returns at most this many items per request.
const PAGE_SIZE: usize = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

/// Stateless search through the Google Custom Search JSON API.
#[derive(Debug, Clone)]
pub struct LibrarySearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl LibrarySearch {
    pub fn new(api_key: String, engine_id: String, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: CUSTOM_SEARCH_ENDPOINT.to_string(),
            api_key,
            engine_id,
        })
    }

    async fn request(&self, query: &str, num: usize) -> Result<Vec<String>, TransportError> {
        let num = num.clamp(1, PAGE_SIZE).to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
            });
        }
        let body = resp.text().await?;
        parse_links(&body)
    }
}

fn parse_links(body: &str) -> Result<Vec<String>, TransportError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    Ok(parsed.items.into_iter().map(|i| i.link).collect())
}

impl SearchProvider for LibrarySearch {
    fn name(&self) -> &str {
        "library"
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn search(&self, query: &str, max_links: usize) -> Vec<String> {
        match self.request(query, max_links).await {
            Ok(raw) => {
                let links = finalize_links(raw, |u| on_domain(u, "google.com"), max_links);
                info!(links = links.len(), "Search complete");
                links
            }
            Err(e) => {
                warn!(error = %e, "Custom search request failed");
                Vec::new()
            }
        }
    }
}
