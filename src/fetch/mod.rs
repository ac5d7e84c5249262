//! Content fetcher: `url -> FetchResult` under timeout and retry discipline.
//!
//! A [`ContentFetcher`] wraps a [`PageTransport`] (the thing that actually
//! talks to the network) and owns everything around it:
//!
//! 1. per-host pacing through a shared [`HostPacer`]
//! 2. a page-load timeout on every attempt, with a fixed pause and a
//!    bounded number of attempts on timeout
//! 3. obstruction handling (cookie banners, popups) on the parsed DOM
//! 4. wall detection: pages still showing a paywall or login wall after
//!    dismissal come back as [`FetchStatus::Blocked`]
//! 5. extraction of visible paragraph text (or, for pages without any,
//!    the text of leaf blocks such as filing documents) and a publication date
//!
//! Nothing here returns an error to the caller. Every failure is folded
//! into the [`FetchStatus`] of the result.

pub mod dates;
pub mod obstruction;

use crate::error::TransportError;
use crate::models::{FetchResult, FetchStatus};
use crate::pacing::HostPacer;
use chrono::NaiveDate;
use obstruction::ObstructionHandler;
use reqwest::header::CONTENT_TYPE;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Browser-like user agent sent with every page request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

pub const DEFAULT_WALL_SELECTORS: &[&str] = &[
    r#"[class*="paywall"]"#,
    r#"[id*="paywall"]"#,
    r#"[class*="regwall"]"#,
    r#"[class*="login-wall"]"#,
];

/// Visible phrases that only a wall shows. Phrases that also appear as
/// ordinary page chrome belong in the cleaner's boilerplate instead.
pub const DEFAULT_WALL_MARKERS: &[&str] = &[
    "log in to continue",
    "sign in to continue reading",
    "this article is for subscribers",
    "to continue reading, subscribe",
];

/// A page as delivered by a transport, before any processing.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final URL after redirects.
    pub url: String,
    pub content_type: String,
    pub body: String,
}

/// Something that can load a page. Implementations may be stateful
/// (cookies, a browser session); each worker owns its own.
pub trait PageTransport {
    async fn load(&self, url: &str) -> Result<RawPage, TransportError>;
}

/// reqwest-backed transport with a cookie store and a browser user agent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        Self::with_user_agent(BROWSER_USER_AGENT, request_timeout)
    }

    /// SEC EDGAR rejects browser user agents; it wants a contact string.
    pub fn with_user_agent(user_agent: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl PageTransport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn load(&self, url: &str) -> Result<RawPage, TransportError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        // xml covers EDGAR's Atom feeds
        if !(content_type.contains("html") || content_type.contains("xml") || content_type.starts_with("text/")) {
            return Err(TransportError::UnsupportedContent(content_type));
        }

        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(RawPage {
            url: final_url,
            content_type,
            body,
        })
    }
}

/// Timeout, retry and extraction settings for a [`ContentFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub page_load_timeout: Duration,
    /// Total attempts on timeout, including the first.
    pub max_attempts: u32,
    pub retry_pause: Duration,
    pub recency_window_days: i64,
    pub wall_selectors: Vec<String>,
    pub wall_markers: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            page_load_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_pause: Duration::from_secs(2),
            recency_window_days: 730,
            wall_selectors: DEFAULT_WALL_SELECTORS.iter().map(|s| s.to_string()).collect(),
            wall_markers: DEFAULT_WALL_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Loads candidate pages and reduces them to their paragraph text.
///
/// Every load is paced per host, clears obstructions, and is classified
/// into a [`FetchStatus`]. Only `Ok` results carry text.
pub struct ContentFetcher<T> {
    transport: T,
    config: FetcherConfig,
    handlers: Vec<Box<dyn ObstructionHandler + Send + Sync>>,
    pacer: Arc<HostPacer>,
    run_date: NaiveDate,
    paragraphs: Selector,
    blocks: Selector,
    walls: Vec<Selector>,
    markers: Vec<String>,
}

impl<T: PageTransport> ContentFetcher<T> {
    /// # Arguments
    ///
    /// * `transport` - Page session owned by this fetcher
    /// * `config` - Retry, timeout and wall detection settings
    /// * `handlers` - Obstruction handlers, run in order on every page
    /// * `pacer` - Per-host pacing shared by all workers
    /// * `run_date` - Stamped on every result
    ///
    /// # Returns
    ///
    /// A fetcher; invalid wall selectors are logged and skipped.
    pub fn new(
        transport: T,
        config: FetcherConfig,
        handlers: Vec<Box<dyn ObstructionHandler + Send + Sync>>,
        pacer: Arc<HostPacer>,
        run_date: NaiveDate,
    ) -> Self {
        let walls = config
            .wall_selectors
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!(selector = %s, error = ?e, "Ignoring invalid wall selector");
                    None
                }
            })
            .collect();
        let markers = config
            .wall_markers
            .iter()
            .map(|m| m.to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        Self {
            transport,
            config,
            handlers,
            pacer,
            run_date,
            paragraphs: Selector::parse("p").unwrap(),
            blocks: Selector::parse("div, td, li").unwrap(),
            walls,
            markers,
        }
    }

    /// Fetch `url`. Never fails; see [`FetchStatus`] for the outcomes.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let t0 = Instant::now();
        let mut attempts = 0u32;

        let page = match self.load_with_retry(url, &mut attempts).await {
            Ok(page) => page,
            Err(status) => return self.result(url, status, t0, attempts),
        };

        let status = self.extract(&page);
        match &status {
            FetchStatus::Ok { text, date } => {
                info!(chars = text.chars().count(), %date, "Extracted page text")
            }
            other => debug!(status = ?other, "Page yielded no usable text"),
        }
        self.result(url, status, t0, attempts)
    }

    /// Load `url` under the same pacing, timeout and retry discipline as
    /// [`fetch`](Self::fetch), but hand back the raw page for callers that
    /// read the markup themselves.
    ///
    /// # Returns
    ///
    /// The loaded page, or the non-`Ok` [`FetchStatus`] the load ended in.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn load_page(&self, url: &str) -> Result<RawPage, FetchStatus> {
        let mut attempts = 0u32;
        self.load_with_retry(url, &mut attempts).await
    }

    async fn load_with_retry(&self, url: &str, attempts: &mut u32) -> Result<RawPage, FetchStatus> {
        loop {
            *attempts += 1;
            self.pacer.wait(url).await;

            match timeout(self.config.page_load_timeout, self.transport.load(url)).await {
                Ok(Ok(page)) => return Ok(page),
                Ok(Err(TransportError::Timeout)) | Err(_) => {
                    if *attempts >= self.config.max_attempts {
                        warn!(attempts = *attempts, "Page load timed out; giving up");
                        return Err(FetchStatus::TimedOut);
                    }
                    warn!(
                        attempt = *attempts,
                        max = self.config.max_attempts,
                        pause = ?self.config.retry_pause,
                        "Page load timed out; retrying"
                    );
                    sleep(self.config.retry_pause).await;
                }
                Ok(Err(e)) if e.is_blocking_status() => {
                    warn!(error = %e, "Request refused; treating as blocked");
                    return Err(FetchStatus::Blocked);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Fetch failed");
                    return Err(FetchStatus::Error(e.to_string()));
                }
            }
        }
    }

    fn result(&self, url: &str, status: FetchStatus, t0: Instant, attempts: u32) -> FetchResult {
        FetchResult {
            url: url.to_string(),
            status,
            elapsed: t0.elapsed(),
            attempts,
        }
    }

    /// Turn a loaded page into a status. Synchronous: the parsed DOM never
    /// lives across an await point.
    fn extract(&self, page: &RawPage) -> FetchStatus {
        if !page.content_type.contains("html") {
            if page.content_type.contains("xml") {
                debug!(content_type = %page.content_type, "Feed or data document; no article text");
                return FetchStatus::Empty;
            }
            let text = page.body.trim();
            if text.is_empty() {
                return FetchStatus::Empty;
            }
            if self.shows_wall_marker(text) {
                return FetchStatus::Blocked;
            }
            let date = dates::resolve_date(
                dates::date_in_text(text),
                self.run_date,
                self.config.recency_window_days,
            );
            return FetchStatus::Ok {
                text: text.to_string(),
                date,
            };
        }

        let mut html = Html::parse_document(&page.body);
        for handler in &self.handlers {
            if handler.dismiss(&mut html) {
                debug!(handler = handler.name(), "Dismissed obstruction");
            }
        }

        if self.walls.iter().any(|sel| html.select(sel).next().is_some()) {
            debug!("Wall element still present after dismissal");
            return FetchStatus::Blocked;
        }
        if self.shows_wall_marker(&visible_text(&html)) {
            debug!("Wall marker text still present after dismissal");
            return FetchStatus::Blocked;
        }

        let mut text = block_text(html.select(&self.paragraphs));
        if text.is_empty() {
            // filing documents lay their text out in divs and table cells
            text = block_text(
                html.select(&self.blocks)
                    .filter(|b| b.select(&self.blocks).next().is_none()),
            );
            if !text.is_empty() {
                debug!("No paragraphs; using leaf block text");
            }
        }
        if text.is_empty() {
            return FetchStatus::Empty;
        }

        let date = dates::resolve_date(
            dates::date_in_markup(&html, &text),
            self.run_date,
            self.config.recency_window_days,
        );
        FetchStatus::Ok { text, date }
    }

    fn shows_wall_marker(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.markers.iter().any(|m| lower.contains(m.as_str()))
    }
}

/// Visible, non-blank blocks joined by single spaces.
fn block_text<'a>(blocks: impl Iterator<Item = ElementRef<'a>>) -> String {
    blocks
        .filter(is_visible)
        .map(|b| b.text().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every text node a reader would see. Script bodies and hidden subtrees
/// are skipped.
fn visible_text(html: &Html) -> String {
    html.root_element()
        .descendants()
        .filter(|n| n.parent().and_then(ElementRef::wrap).is_some_and(|p| is_visible(&p)))
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// False if the element or any ancestor is hidden or non-rendered.
pub(crate) fn is_visible(el: &ElementRef) -> bool {
    std::iter::once(**el)
        .chain(el.ancestors())
        .filter_map(|n| n.value().as_element())
        .all(|e| {
            let style = e.attr("style").unwrap_or("").replace(' ', "").to_lowercase();
            !matches!(e.name(), "script" | "style" | "noscript" | "template")
                && e.attr("hidden").is_none()
                && e.attr("aria-hidden") != Some("true")
                && !style.contains("display:none")
                && !style.contains("visibility:hidden")
        })
}
