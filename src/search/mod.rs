//! Search providers: `query -> ranked candidate URLs`.
//!
//! | Provider | Module | Method |
//! |----------|--------|--------|
//! | [`BrowserSearch`] | [`browser`] | renders a results page through a stateful page transport |
//! | [`LibrarySearch`] | [`library`] | stateless call to the Google Custom Search JSON API |
//! | [`FilingsSearch`] | [`filings`] | SEC EDGAR company browse feed, resolved to primary 10-K documents |
//!
//! Every provider follows the same contract: results come back in provider
//! rank order, the engine's own pages are excluded, at most `max_links` are
//! returned, and a provider-level failure is logged and yields an empty list.

pub mod browser;
pub mod filings;
pub mod library;

pub use browser::{BrowserSearch, SearchEngine};
pub use filings::FilingsSearch;
pub use library::LibrarySearch;

use crate::fetch::HttpTransport;
use itertools::Itertools;
use url::Url;

/// A source of candidate URLs for a rendered query.
pub trait SearchProvider {
    fn name(&self) -> &str;

    /// Ranked URLs for `query`, capped at `max_links`. Never fails.
    async fn search(&self, query: &str, max_links: usize) -> Vec<String>;
}

/// The provider variants a run can be configured with.
pub enum SearchBackend {
    Browser(BrowserSearch<HttpTransport>),
    Library(LibrarySearch),
    Filings(FilingsSearch<HttpTransport>),
}

impl SearchProvider for SearchBackend {
    fn name(&self) -> &str {
        match self {
            SearchBackend::Browser(p) => p.name(),
            SearchBackend::Library(p) => p.name(),
            SearchBackend::Filings(p) => p.name(),
        }
    }

    async fn search(&self, query: &str, max_links: usize) -> Vec<String> {
        match self {
            SearchBackend::Browser(p) => p.search(query, max_links).await,
            SearchBackend::Library(p) => p.search(query, max_links).await,
            SearchBackend::Filings(p) => p.search(query, max_links).await,
        }
    }
}

/// True if `url`'s host is `domain` or one of its subdomains.
pub fn on_domain(url: &Url, domain: &str) -> bool {
    url.host_str()
        .map(|h| h == domain || h.ends_with(&format!(".{domain}")))
        .unwrap_or(false)
}

/// Shared post-processing for raw result URLs: keep absolute http(s)
/// URLs, drop the engine's own pages, dedupe in discovery order, cap.
pub fn finalize_links<I, F>(urls: I, is_own_page: F, max_links: usize) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    F: Fn(&Url) -> bool,
{
    urls.into_iter()
        .filter_map(|raw| Url::parse(raw.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| !is_own_page(u))
        .map(|u| u.to_string())
        .unique()
        .take(max_links)
        .collect()
}
