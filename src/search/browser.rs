use super::{SearchProvider, finalize_links, on_domain};
use crate::fetch::PageTransport;
use crate::pacing::{HostPacer, PauseRange};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where a results page lives and how to read it.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    pub name: &'static str,
    /// Results URL with the encoded query appended.
    pub query_url: &'static str,
    pub domain: &'static str,
    pub result_selector: &'static str,
    /// Query parameter carrying the target of the engine's redirect links.
    pub redirect_param: &'static str,
}

impl SearchEngine {
    pub fn google() -> Self {
        Self {
            name: "google",
            query_url: "https://www.google.com/search?hl=en&q=",
            domain: "google.com",
            result_selector: "div.g a[href], a[href^='/url?']",
            redirect_param: "q",
        }
    }

    pub fn duckduckgo() -> Self {
        Self {
            name: "duckduckgo",
            query_url: "https://html.duckduckgo.com/html/?q=",
            domain: "duckduckgo.com",
            result_selector: "a.result__a[href]",
            redirect_param: "uddg",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "google" => Some(Self::google()),
            "duckduckgo" | "ddg" => Some(Self::duckduckgo()),
            _ => None,
        }
    }

    fn results_url(&self, query: &str) -> String {
        format!("{}{}", self.query_url, urlencoding::encode(query))
    }

    /// Resolve a result href to its target, unwrapping engine redirects.
    fn target(&self, base: &Url, href: &str) -> Option<String> {
        let url = base.join(href).ok()?;
        if on_domain(&url, self.domain) {
            return url
                .query_pairs()
                .find(|(k, _)| k == self.redirect_param)
                .map(|(_, v)| v.into_owned());
        }
        Some(url.to_string())
    }

    /// Result links from a rendered results page, in page order.
    pub fn result_links(&self, page_url: &str, body: &str) -> Vec<String> {
        let (Ok(base), Ok(selector)) = (Url::parse(page_url), Selector::parse(self.result_selector))
        else {
            return Vec::new();
        };
        let html = Html::parse_document(body);
        html.select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| self.target(&base, href))
            .collect()
    }
}

/// Search through a rendered results page.
///
/// The transport is a stateful session (cookies survive between queries),
/// so each worker should own its own `BrowserSearch`.
pub struct BrowserSearch<T> {
    transport: T,
    engine: SearchEngine,
    pacer: Arc<HostPacer>,
    page_load_timeout: Duration,
    settle: PauseRange,
}

impl<T: PageTransport> BrowserSearch<T> {
    pub fn new(
        transport: T,
        engine: SearchEngine,
        pacer: Arc<HostPacer>,
        page_load_timeout: Duration,
        settle: PauseRange,
    ) -> Self {
        Self {
            transport,
            engine,
            pacer,
            page_load_timeout,
            settle,
        }
    }
}

impl<T: PageTransport> SearchProvider for BrowserSearch<T> {
    fn name(&self) -> &str {
        self.engine.name
    }

    #[instrument(level = "info", skip_all, fields(engine = self.engine.name, %query))]
    async fn search(&self, query: &str, max_links: usize) -> Vec<String> {
        let url = self.engine.results_url(query);
        self.pacer.wait(&url).await;

        let page = match timeout(self.page_load_timeout, self.transport.load(&url)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!(error = %e, "Search page failed to load");
                return Vec::new();
            }
            Err(_) => {
                warn!(timeout = ?self.page_load_timeout, "Search page load timed out");
                return Vec::new();
            }
        };
        // results render after load
        self.settle.pause().await;

        let raw = self.engine.result_links(&page.url, &page.body);
        debug!(raw = raw.len(), "Collected result anchors");
        let links = finalize_links(raw, |u| on_domain(u, self.engine.domain), max_links);
        info!(links = links.len(), "Search complete");
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::RawPage;
    use std::sync::Mutex;

    struct OnePage {
        body: Option<String>,
        requested: Mutex<Vec<String>>,
    }

    impl PageTransport for OnePage {
        async fn load(&self, url: &str) -> Result<RawPage, TransportError> {
            self.requested.lock().unwrap().push(url.to_string());
            match &self.body {
                Some(b) => Ok(RawPage::html(url, b)),
                None => Err(TransportError::Status { code: 429 }),
            }
        }
    }

    fn provider(body: Option<&str>, engine: SearchEngine) -> BrowserSearch<OnePage> {
        BrowserSearch::new(
            OnePage {
                body: body.map(str::to_string),
                requested: Mutex::new(Vec::new()),
            },
            engine,
            Arc::new(HostPacer::new(Duration::ZERO)),
            Duration::from_secs(30),
            PauseRange::none(),
        )
    }

    const GOOGLE_PAGE: &str = r#"<html><body>
        <div class="g"><a href="https://www.reuters.com/acme-q4">Acme Q4</a></div>
        <div class="g"><a href="https://support.google.com/websearch">Help</a></div>
        <a href="/url?q=https://www.cnbc.com/acme&amp;sa=U">CNBC</a>
        <div class="g"><a href="https://www.reuters.com/acme-q4">Acme Q4 again</a></div>
        <div class="g"><a href="https://investors.acme.com/">IR</a></div>
        <a href="/preferences">Settings</a>
        </body></html>"#;

    #[tokio::test]
    async fn test_google_results_in_rank_order_without_engine_pages() {
        let p = provider(Some(GOOGLE_PAGE), SearchEngine::google());
        let links = p.search("Acme Corp revenue growth", 10).await;
        assert_eq!(
            links,
            vec![
                "https://www.reuters.com/acme-q4",
                "https://www.cnbc.com/acme",
                "https://investors.acme.com/",
            ]
        );
        let requested = p.transport.requested.lock().unwrap();
        assert_eq!(
            requested[0],
            "https://www.google.com/search?hl=en&q=Acme%20Corp%20revenue%20growth"
        );
    }

    #[tokio::test]
    async fn test_max_links_caps_results() {
        let p = provider(Some(GOOGLE_PAGE), SearchEngine::google());
        assert_eq!(p.search("acme", 1).await, vec!["https://www.reuters.com/acme-q4"]);
    }

    #[tokio::test]
    async fn test_duckduckgo_redirects_unwrapped() {
        let body = r#"<html><body>
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.fool.com%2Facme&amp;rut=x">Fool</a>
            <a class="result__a" href="https://www.sec.gov/acme">SEC</a>
            </body></html>"#;
        let p = provider(Some(body), SearchEngine::duckduckgo());
        assert_eq!(
            p.search("acme", 10).await,
            vec!["https://www.fool.com/acme", "https://www.sec.gov/acme"]
        );
    }

    #[tokio::test]
    async fn test_failed_results_page_yields_nothing() {
        let p = provider(None, SearchEngine::google());
        assert!(p.search("acme", 10).await.is_empty());
    }

    #[test]
    fn test_engine_by_name() {
        assert_eq!(SearchEngine::by_name("ddg").unwrap().domain, "duckduckgo.com");
        assert!(SearchEngine::by_name("altavista").is_none());
    }
}
