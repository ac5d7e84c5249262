//! Competitor discovery: `entity -> competitor entities`.
//!
//! For each registry company a discovery query is searched and the top
//! pages are loaded. Every visible paragraph, list item or heading that
//! talks about competition is read for `Name (TICKER)` mentions; a list
//! item counts when the heading or paragraph just before its list does.
//!
//! A mention is kept when the ticker is a single upper-case token and the
//! name is at most five words. Each competitor becomes an [`Entity`] whose
//! `parent` is the company it was found for, so everything harvested for
//! it can be traced back.

use crate::error::ConfigError;
use crate::fetch::{PageTransport, is_visible};
use crate::models::Entity;
use crate::pacing::PauseRange;
use crate::pipeline::Worker;
use crate::queries::QueryTemplate;
use crate::search::SearchProvider;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

pub const DEFAULT_COMPETITOR_KEYWORDS: &[&str] = &["competitors", "rivals", "similar companies", "competing companies"];

/// A run of capitalized words, then a parenthesized ticker with an
/// optional exchange prefix: `Globex Corp (GBX)`, `Initech (NYSE: INTC)`.
static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:[A-Z&][\w.&'-]*\s+)*[A-Z&][\w.&'-]*)\s*\((?:[A-Za-z]+:\s*)?([A-Z][A-Z0-9.-]{0,9})\)").unwrap()
});

const MAX_NAME_WORDS: usize = 5;

static BLOCKS: Lazy<Selector> = Lazy::new(|| Selector::parse("p, li, h2, h3").unwrap());

/// Limits for one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Pages read per company.
    pub max_links: usize,
    /// Competitors kept per company.
    pub max_per_company: usize,
    pub keywords: Vec<String>,
    /// Pause between companies.
    pub pause: PauseRange,
}

/// Finds competitor companies by searching for and reading competitor pages.
pub struct CompetitorFinder {
    query: QueryTemplate,
    year: i32,
    settings: DiscoverySettings,
    keywords: Vec<String>,
}

impl CompetitorFinder {
    /// # Arguments
    ///
    /// * `template` - Discovery search template (`{company} competitors`)
    /// * `year` - Value for a `{year}` placeholder
    /// * `settings` - Limits and keywords
    ///
    /// # Returns
    ///
    /// A [`ConfigError::Template`] if the template is malformed.
    pub fn new(template: &str, year: i32, settings: DiscoverySettings) -> Result<Self, ConfigError> {
        let keywords = settings
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(Self {
            query: QueryTemplate::parse("competitors", template)?,
            year,
            settings,
            keywords,
        })
    }

    fn mentions_competition(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// True if the block, or for a list item the element introducing its
    /// list, talks about competition.
    fn about_competition(&self, block: &ElementRef) -> bool {
        if self.mentions_competition(&block.text().collect::<String>()) {
            return true;
        }
        if block.value().name() != "li" {
            return false;
        }
        block
            .parent()
            .and_then(|list| list.prev_siblings().find_map(ElementRef::wrap))
            .is_some_and(|intro| self.mentions_competition(&intro.text().collect::<String>()))
    }

    /// `(name, ticker)` mentions on one page, in document order.
    pub fn mentions(&self, body: &str) -> Vec<(String, String)> {
        let html = Html::parse_document(body);
        html.select(&BLOCKS)
            .filter(is_visible)
            .filter(|b| self.about_competition(b))
            .flat_map(|b| {
                let text = b.text().collect::<Vec<_>>().join(" ");
                MENTION
                    .captures_iter(&text)
                    .filter_map(|c| {
                        let words: Vec<&str> = c[1].split_whitespace().collect();
                        if words.len() > MAX_NAME_WORDS {
                            debug!(name = %&c[1], "Skipping mention with an overlong name");
                            return None;
                        }
                        Some((words.join(" "), c[2].to_string()))
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Competitors of `parent`, deduplicated by ticker and capped.
    #[instrument(level = "info", skip_all, fields(parent = %parent))]
    pub async fn discover<S: SearchProvider, T: PageTransport>(
        &self,
        worker: &Worker<S, T>,
        parent: &Entity,
    ) -> Vec<Entity> {
        let query = self.query.render(parent, self.year);
        let links = worker.search.search(&query, self.settings.max_links).await;
        debug!(%query, links = links.len(), "Searched for competitor pages");

        let mut found: Vec<Entity> = Vec::new();
        for url in links {
            if found.len() >= self.settings.max_per_company {
                break;
            }
            let page = match worker.fetcher.load_page(&url).await {
                Ok(page) => page,
                Err(status) => {
                    debug!(%url, ?status, "Competitor page unavailable");
                    continue;
                }
            };
            for (name, ticker) in self.mentions(&page.body) {
                if found.len() >= self.settings.max_per_company {
                    break;
                }
                if ticker == parent.ticker || found.iter().any(|e| e.ticker == ticker) {
                    continue;
                }
                debug!(%name, %ticker, %url, "Found competitor");
                found.push(Entity::competitor_of(name, ticker, parent));
            }
        }
        info!(competitors = found.len(), "Competitor discovery done");
        found
    }

    /// `entities` followed by every competitor not already listed.
    pub async fn with_competitors<S: SearchProvider, T: PageTransport>(
        &self,
        worker: &Worker<S, T>,
        entities: &[Entity],
    ) -> Vec<Entity> {
        let mut all = entities.to_vec();
        for (i, parent) in entities.iter().enumerate() {
            if i > 0 {
                self.settings.pause.pause().await;
            }
            for rival in self.discover(worker, parent).await {
                if all.iter().any(|e| e.ticker == rival.ticker) {
                    debug!(ticker = %rival.ticker, "Competitor already listed");
                    continue;
                }
                all.push(rival);
            }
        }
        all
    }
}
