use super::{SearchProvider, finalize_links};
use crate::error::TransportError;
use crate::fetch::{PageTransport, RawPage};
use crate::pacing::HostPacer;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const EDGAR_BROWSE_ENDPOINT: &str = "https://www.sec.gov/cgi-bin/browse-edgar";

static INDEX_ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("table.tableFile tr").unwrap());
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Primary 10-K documents, found through the SEC EDGAR company browse feed.
///
/// The feed lists filing index pages; each index is loaded and resolved to
/// the document whose type matches the form, so the links returned point
/// at the filing text itself. The first token of the query is the EDGAR
/// company identifier (a ticker or CIK), so filings fields should use a
/// `{ticker}` template.
pub struct FilingsSearch<T> {
    transport: T,
    pacer: Arc<HostPacer>,
    page_load_timeout: Duration,
    form_type: String,
}

impl<T: PageTransport> FilingsSearch<T> {
    /// # Arguments
    ///
    /// * `transport` - Must send a contact user agent (`"Company admin@company.com"`);
    ///   EDGAR rejects browser user agents
    /// * `pacer` - Shared host pacer; EDGAR throttles bursts
    /// * `page_load_timeout` - Bound on each feed or index load
    pub fn new(transport: T, pacer: Arc<HostPacer>, page_load_timeout: Duration) -> Self {
        Self {
            transport,
            pacer,
            page_load_timeout,
            form_type: "10-K".to_string(),
        }
    }

    fn feed_url(&self, company: &str, count: usize) -> String {
        format!(
            "{EDGAR_BROWSE_ENDPOINT}?action=getcompany&CIK={}&type={}&dateb=&owner=include&count={}&output=atom",
            urlencoding::encode(company),
            urlencoding::encode(&self.form_type),
            count.max(1)
        )
    }

    async fn load(&self, url: &str) -> Result<RawPage, TransportError> {
        self.pacer.wait(url).await;
        timeout(self.page_load_timeout, self.transport.load(url))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

/// `<filing-href>` values from an EDGAR company Atom feed, in feed order.
fn filing_links(xml: &str) -> Result<Vec<String>, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut links = Vec::new();
    let mut in_href = false;
    loop {
        match reader
            .read_event()
            .map_err(|e| TransportError::Decode(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"filing-href" => in_href = true,
            Event::End(e) if e.name().as_ref() == b"filing-href" => in_href = false,
            Event::Text(t) if in_href => {
                let href = String::from_utf8_lossy(&t).trim().to_string();
                if !href.is_empty() {
                    links.push(href);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(links)
}

/// The filing's main document, read from its EDGAR index page.
///
/// Picks the first document row whose Type column equals `form_type`,
/// falling back to the first document listed. Inline XBRL viewer links
/// (`/ix?doc=...`) are unwrapped to the raw document.
fn primary_document(index_url: &str, body: &str, form_type: &str) -> Option<String> {
    let base = Url::parse(index_url).ok()?;
    let html = Html::parse_document(body);

    let documents: Vec<(String, &str)> = html
        .select(&INDEX_ROWS)
        .filter_map(|row| {
            let cells: Vec<ElementRef> = row.select(&CELLS).collect();
            let href = cells.get(2)?.select(&ANCHOR).next()?.value().attr("href")?;
            let kind = cells
                .get(3)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .unwrap_or_default();
            Some((kind, href))
        })
        .collect();
    let (_, href) = documents
        .iter()
        .find(|(kind, _)| kind.eq_ignore_ascii_case(form_type))
        .or_else(|| documents.first())?;

    let url = base.join(href).ok()?;
    if url.path() == "/ix" {
        let doc = url.query_pairs().find(|(k, _)| k == "doc").map(|(_, v)| v.into_owned())?;
        return base.join(&doc).ok().map(|u| u.to_string());
    }
    Some(url.to_string())
}

impl<T: PageTransport> SearchProvider for FilingsSearch<T> {
    fn name(&self) -> &str {
        "filings"
    }

    #[instrument(level = "info", skip_all, fields(%query))]
    async fn search(&self, query: &str, max_links: usize) -> Vec<String> {
        let Some(company) = query.split_whitespace().next() else {
            warn!("Empty filings query");
            return Vec::new();
        };
        let raw = match self
            .load(&self.feed_url(company, max_links))
            .await
            .and_then(|feed| filing_links(&feed.body))
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(company, error = %e, "Filings feed request failed");
                return Vec::new();
            }
        };
        // the browse endpoint itself is the engine's own page
        let indexes = finalize_links(raw, |u| u.path().starts_with("/cgi-bin/"), max_links);

        let mut documents = Vec::with_capacity(indexes.len());
        for index in &indexes {
            match self.load(index).await {
                Ok(page) => match primary_document(&page.url, &page.body, &self.form_type) {
                    Some(doc) => {
                        debug!(%index, %doc, "Resolved primary document");
                        documents.push(doc);
                    }
                    None => warn!(%index, "Filing index lists no documents"),
                },
                Err(e) => warn!(%index, error = %e, "Filing index failed to load"),
            }
        }

        let links = finalize_links(documents, |u| u.path().starts_with("/cgi-bin/"), max_links);
        info!(company, indexes = indexes.len(), links = links.len(), "Filings search complete");
        links
    }
}
