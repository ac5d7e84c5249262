//! Run configuration.
//!
//! Everything tunable lives in one YAML file deserialized into [`AppConfig`].
//! Every section and key is optional; omitted values fall back to the
//! defaults below, which reproduce the constants the harvesting scripts
//! have always used.
//!
//! ```yaml
//! harvest:
//!   cap: 5
//!   query_pause: [10, 20]
//! remote:
//!   timeout_secs: 600
//! queries:
//!   - field: earnings
//!     template: "{company} quarterly earnings report"
//! competitors:
//!   max_per_company: 3
//! ```

use crate::clean::{ANALYSIS_MIN_CONTENT_CHARS, DEFAULT_BOILERPLATE, GENERAL_MIN_CONTENT_CHARS};
use crate::competitors::{DEFAULT_COMPETITOR_KEYWORDS, DiscoverySettings};
use crate::error::ConfigError;
use crate::fetch::obstruction::{DEFAULT_CONSENT_KEYWORDS, DEFAULT_COOKIE_SELECTORS, DEFAULT_POPUP_SELECTORS};
use crate::fetch::{DEFAULT_WALL_MARKERS, DEFAULT_WALL_SELECTORS, FetcherConfig};
use crate::pacing::PauseRange;
use crate::pipeline::{HarvestSettings, ResearchSettings};
use crate::queries::FieldTemplate;
use crate::remote::OrchestratorConfig;
use crate::search::SearchEngine;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Harvest profile: picks the default quality threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// General search harvesting.
    General,
    /// Filings and competitor harvesting feeding financial analysis.
    Analysis,
}

impl Profile {
    pub fn min_content_chars(self) -> usize {
        match self {
            Profile::General => GENERAL_MIN_CONTENT_CHARS,
            Profile::Analysis => ANALYSIS_MIN_CONTENT_CHARS,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Validated configs only hold values `try_from_secs_f64` accepts.
fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub cap: usize,
    pub max_links: usize,
    /// Overrides the profile's threshold when set.
    pub min_content_chars: Option<usize>,
    pub page_load_timeout_secs: f64,
    pub fetch_attempts: u32,
    pub retry_pause_secs: f64,
    pub recency_window_days: i64,
    /// Minimum spacing between requests to one host, across all workers.
    pub host_interval_secs: f64,
    pub search_engine: String,
    pub search_settle: PauseRange,
    pub query_pause: PauseRange,
    pub entity_pause: PauseRange,
    /// Workers, each with its own search and page sessions.
    pub concurrency: usize,
    pub cookie_selectors: Vec<String>,
    pub consent_keywords: Vec<String>,
    pub popup_selectors: Vec<String>,
    pub wall_selectors: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            cap: 3,
            max_links: 10,
            min_content_chars: None,
            page_load_timeout_secs: 30.0,
            fetch_attempts: 3,
            retry_pause_secs: 2.0,
            recency_window_days: 730,
            host_interval_secs: 2.0,
            search_engine: "google".to_string(),
            search_settle: PauseRange::secs(3, 6),
            query_pause: PauseRange::secs(10, 20),
            entity_pause: PauseRange::secs(5, 10),
            concurrency: 1,
            cookie_selectors: strings(DEFAULT_COOKIE_SELECTORS),
            consent_keywords: strings(DEFAULT_CONSENT_KEYWORDS),
            popup_selectors: strings(DEFAULT_POPUP_SELECTORS),
            wall_selectors: strings(DEFAULT_WALL_SELECTORS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub check_interval_secs: f64,
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_backoff_secs: f64,
    pub session_jitter: PauseRange,
    pub request_timeout_secs: f64,
    /// Entities researched at once.
    pub concurrency: usize,
    pub entity_pause: PauseRange,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5.0,
            timeout_secs: 300.0,
            max_retries: 5,
            base_delay_secs: 10.0,
            max_backoff_secs: 600.0,
            session_jitter: PauseRange::secs(2, 5),
            request_timeout_secs: 60.0,
            concurrency: 1,
            entity_pause: PauseRange::secs(5, 10),
        }
    }
}

/// Competitor discovery and the fields harvested for each competitor found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitorConfig {
    /// Search template for pages listing a company's competitors.
    pub discovery_query: String,
    /// Competitor pages read per company.
    pub max_links: usize,
    /// Competitors kept per company, in discovery order.
    pub max_per_company: usize,
    /// Block text must mention one of these to be read for names.
    pub keywords: Vec<String>,
    pub queries: Vec<FieldTemplate>,
}

impl Default for CompetitorConfig {
    fn default() -> Self {
        Self {
            discovery_query: "{company} competitors".to_string(),
            max_links: 5,
            max_per_company: 5,
            keywords: strings(DEFAULT_COMPETITOR_KEYWORDS),
            queries: default_competitor_queries(),
        }
    }
}

/// Market-analysis templates run for every discovered competitor.
pub fn default_competitor_queries() -> Vec<FieldTemplate> {
    [
        ("products_and_services", "{company} products and services"),
        ("primary_markets", "{company} primary markets"),
        ("submarkets", "{company} submarkets"),
        ("market_size_units", "{company} market size in units"),
        ("market_size_dollars", "{company} market size in dollars"),
    ]
    .iter()
    .map(|(f, t)| FieldTemplate::new(f, t))
    .collect()
}

/// Search templates, one per output field.
pub fn default_queries() -> Vec<FieldTemplate> {
    [
        ("earnings", "{company} quarterly earnings report"),
        ("annual_report", "{company} annual report filetype:pdf"),
        ("stock_analysis", "{company} stock analysis site:fool.com OR site:thestreet.com"),
        ("competitors", "{company} competitors and market share"),
        ("forecast", "{company} stock forecast {year}"),
        ("technical_analysis", "{ticker} stock technical analysis"),
        ("earnings_call", "{company} transcript of an earnings call"),
        ("analyst_report", "{company} an analyst report from an investment bank or research firm"),
    ]
    .iter()
    .map(|(f, t)| FieldTemplate::new(f, t))
    .collect()
}

/// Market-research questions, one per output column.
pub fn default_questions() -> Vec<FieldTemplate> {
    [
        ("DESCRIPTION", "Analyze {company} and provide a detailed description of their business."),
        ("PRODUCTS AND SERVICES", "List and describe the main products and services offered by {company}."),
        ("KEY MARKET 1", "What is {company}'s primary target market or industry vertical?"),
        ("KEY MARKET 2", "What is {company}'s secondary target market?"),
        ("KEY MARKET 3", "What is {company}'s tertiary target market?"),
        ("KEY MARKET 4", "What other significant markets does {company} serve?"),
        ("KEY MARKET SIZE 1", "What is the total addressable market size (in USD) for {company}'s primary market?"),
        ("KEY MARKET SIZE 2", "What is the total addressable market size (in USD) for {company}'s secondary market?"),
        ("KEY MARKET SIZE 3", "What is the total addressable market size (in USD) for {company}'s tertiary market?"),
        ("KEY MARKET SIZE 4", "What is the total addressable market size (in USD) for {company}'s other significant markets?"),
        ("KEY MARKET GROWTH 1", "What is the projected 5-year CAGR for {company}'s primary market?"),
        ("KEY MARKET GROWTH 2", "What is the projected 5-year CAGR for {company}'s secondary market?"),
        ("KEY MARKET GROWTH 3", "What is the projected 5-year CAGR for {company}'s tertiary market?"),
        ("KEY MARKET GROWTH 4", "What is the projected 5-year CAGR for {company}'s other markets?"),
        ("COMPETITIVE STRENGTHS AND WEAKNESSES", "Analyze {company}'s competitive strengths and weaknesses in their market."),
        ("ESTIMATED MARKET SHARE TODAY", "What is {company}'s current estimated market share percentage in their primary market?"),
        ("ESTIMATED MARKET SHARE FORECAST (5 YR)", "What is {company}'s projected market share percentage in 5 years?"),
        ("RELATIVE COMPETITIVE RANKING (NUMBER)", "What is {company}'s competitive ranking among peers (provide a number)?"),
        ("RELATIVE COMPETITIVE RANKING (EXPLANATION)", "Explain {company}'s competitive position relative to key competitors."),
        ("CLASS", "What is {company}'s primary industry classification?"),
        ("SUB CLASS", "What is {company}'s industry sub-classification?"),
        ("SUB SUB CLASS", "What is {company}'s detailed industry category?"),
        ("SIC CODE", "What is the most appropriate SIC code for {company}?"),
        ("NAICS CODE", "What is the most appropriate NAICS code for {company}?"),
        ("LINKEDIN CLASSIFICATION", "How is {company}'s industry classified on LinkedIn?"),
        ("OTHER TAXONOMIES", "What other relevant industry classifications apply to {company}?"),
    ]
    .iter()
    .map(|(f, t)| FieldTemplate::new(f, t))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub harvest: HarvestConfig,
    pub remote: RemoteConfig,
    pub queries: Vec<FieldTemplate>,
    pub questions: Vec<FieldTemplate>,
    pub competitors: CompetitorConfig,
    pub boilerplate: Vec<String>,
    pub wall_markers: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestConfig::default(),
            remote: RemoteConfig::default(),
            queries: default_queries(),
            questions: default_questions(),
            competitors: CompetitorConfig::default(),
            boilerplate: strings(DEFAULT_BOILERPLATE),
            wall_markers: strings(DEFAULT_WALL_MARKERS),
        }
    }
}

impl AppConfig {
    /// Read and validate a YAML config file.
    #[instrument(level = "info", skip_all, fields(%path))]
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        let config = Self::from_yaml(&raw, path)?;
        info!(
            queries = config.queries.len(),
            questions = config.questions.len(),
            cap = config.harvest.cap,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str, path: &str) -> Result<Self, ConfigError> {
        // an empty file is an empty mapping
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Invalid {
                path: path.to_string(),
                reason: e.to_string(),
            })?
        };
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                path: path.to_string(),
                reason: reason.to_string(),
            })
        };
        if self.harvest.cap == 0 {
            return invalid("harvest.cap must be at least 1");
        }
        if self.harvest.max_links == 0 {
            return invalid("harvest.max_links must be at least 1");
        }
        if self.harvest.fetch_attempts == 0 {
            return invalid("harvest.fetch_attempts must be at least 1");
        }
        if self.remote.max_retries == 0 {
            return invalid("remote.max_retries must be at least 1");
        }
        let durations = [
            ("harvest.page_load_timeout_secs", self.harvest.page_load_timeout_secs, true),
            ("harvest.retry_pause_secs", self.harvest.retry_pause_secs, false),
            ("harvest.host_interval_secs", self.harvest.host_interval_secs, false),
            ("remote.check_interval_secs", self.remote.check_interval_secs, true),
            ("remote.timeout_secs", self.remote.timeout_secs, true),
            ("remote.base_delay_secs", self.remote.base_delay_secs, false),
            ("remote.max_backoff_secs", self.remote.max_backoff_secs, false),
            ("remote.request_timeout_secs", self.remote.request_timeout_secs, true),
        ];
        for (key, value, positive) in durations {
            match Duration::try_from_secs_f64(value) {
                Err(e) => return invalid(&format!("{key} = {value} is not a usable duration: {e}")),
                Ok(d) if positive && d.is_zero() => return invalid(&format!("{key} must be positive")),
                Ok(_) => {}
            }
        }
        if self.competitors.max_links == 0 || self.competitors.max_per_company == 0 {
            return invalid("competitors.max_links and competitors.max_per_company must be at least 1");
        }
        if SearchEngine::by_name(&self.harvest.search_engine).is_none() {
            return invalid(&format!("unknown harvest.search_engine {:?}", self.harvest.search_engine));
        }
        Ok(())
    }

    /// Quality threshold: the file's override, else the profile's.
    pub fn min_content_chars(&self, profile: Profile) -> usize {
        self.harvest
            .min_content_chars
            .unwrap_or_else(|| profile.min_content_chars())
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            page_load_timeout: secs(self.harvest.page_load_timeout_secs),
            max_attempts: self.harvest.fetch_attempts,
            retry_pause: secs(self.harvest.retry_pause_secs),
            recency_window_days: self.harvest.recency_window_days,
            wall_selectors: self.harvest.wall_selectors.clone(),
            wall_markers: self.wall_markers.clone(),
        }
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            cap: self.harvest.cap,
            max_links: self.harvest.max_links,
            query_pause: self.harvest.query_pause,
            entity_pause: self.harvest.entity_pause,
        }
    }

    pub fn host_interval(&self) -> Duration {
        secs(self.harvest.host_interval_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        secs(self.harvest.page_load_timeout_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            check_interval: secs(self.remote.check_interval_secs),
            timeout: secs(self.remote.timeout_secs),
            max_retries: self.remote.max_retries,
            base_delay: secs(self.remote.base_delay_secs),
            max_backoff: secs(self.remote.max_backoff_secs),
            session_jitter: self.remote.session_jitter,
            request_timeout: secs(self.remote.request_timeout_secs),
        }
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            max_links: self.competitors.max_links,
            max_per_company: self.competitors.max_per_company,
            keywords: self.competitors.keywords.clone(),
            pause: self.harvest.entity_pause,
        }
    }

    pub fn research_settings(&self) -> ResearchSettings {
        ResearchSettings {
            concurrency: self.remote.concurrency,
            entity_pause: self.remote.entity_pause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::QueryGenerator;

    #[test]
    fn test_defaults_match_observed_constants() {
        let c = AppConfig::default();
        let f = c.fetcher_config();
        assert_eq!(f.page_load_timeout, Duration::from_secs(30));
        assert_eq!(f.max_attempts, 3);
        assert_eq!(f.retry_pause, Duration::from_secs(2));

        let o = c.orchestrator_config();
        assert_eq!(o.check_interval, Duration::from_secs(5));
        assert_eq!(o.timeout, Duration::from_secs(300));
        assert_eq!(o.max_retries, 5);
        assert_eq!(o.base_delay, Duration::from_secs(10));
        assert_eq!(o.session_jitter, PauseRange::secs(2, 5));

        let h = c.harvest_settings();
        assert_eq!(h.max_links, 10);
        assert_eq!(h.query_pause, PauseRange::secs(10, 20));
        assert_eq!(h.entity_pause, PauseRange::secs(5, 10));
        assert_eq!(c.questions.len(), 26);
    }

    #[test]
    fn test_default_templates_parse() {
        let c = AppConfig::default();
        assert!(QueryGenerator::new(&c.queries, 2025).is_ok());
        assert!(QueryGenerator::new(&c.questions, 2025).is_ok());
        assert!(QueryGenerator::new(&c.competitors.queries, 2025).is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
harvest:
  cap: 5
  query_pause: [1, 2]
remote:
  timeout_secs: 600
questions:
  - field: DESCRIPTION
    template: "Describe {company}."
"#;
        let c = AppConfig::from_yaml(yaml, "test.yaml").unwrap();
        assert_eq!(c.harvest.cap, 5);
        assert_eq!(c.harvest.query_pause, PauseRange::secs(1, 2));
        assert_eq!(c.harvest.max_links, 10);
        assert_eq!(c.orchestrator_config().timeout, Duration::from_secs(600));
        assert_eq!(c.orchestrator_config().max_retries, 5);
        assert_eq!(c.questions, vec![FieldTemplate::new("DESCRIPTION", "Describe {company}.")]);
        assert_eq!(c.queries, default_queries());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(AppConfig::from_yaml("  \n", "empty.yaml").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_profile_threshold_and_override() {
        let c = AppConfig::default();
        assert_eq!(c.min_content_chars(Profile::General), 200);
        assert_eq!(c.min_content_chars(Profile::Analysis), 1000);
        let c = AppConfig::from_yaml("harvest:\n  min_content_chars: 500\n", "t.yaml").unwrap();
        assert_eq!(c.min_content_chars(Profile::General), 500);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = AppConfig::from_yaml("harvest:\n  cap: 0\n", "t.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref reason, .. } if reason.contains("cap")));
        let err = AppConfig::from_yaml("harvest: [not, a, map]\n", "t.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = AppConfig::from_yaml("harvest:\n  search_engine: altavista\n", "t.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref reason, .. } if reason.contains("altavista")));
    }

    #[test]
    fn test_unrepresentable_durations_rejected() {
        for yaml in [
            "harvest:\n  page_load_timeout_secs: -1\n",
            "harvest:\n  retry_pause_secs: .nan\n",
            "harvest:\n  host_interval_secs: .inf\n",
            "remote:\n  max_backoff_secs: 1.0e300\n",
            "remote:\n  timeout_secs: 0\n",
        ] {
            let err = AppConfig::from_yaml(yaml, "t.yaml").unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { ref reason, .. } if reason.contains("_secs")),
                "accepted {yaml:?}"
            );
        }
        let c = AppConfig::from_yaml("harvest:\n  host_interval_secs: 0\n", "t.yaml").unwrap();
        assert_eq!(c.host_interval(), Duration::ZERO);
    }

    #[test]
    fn test_competitor_section() {
        let c = AppConfig::from_yaml("competitors:\n  max_per_company: 2\n", "t.yaml").unwrap();
        let d = c.discovery_settings();
        assert_eq!(d.max_per_company, 2);
        assert_eq!(d.max_links, 5);
        assert_eq!(c.competitors.discovery_query, "{company} competitors");
        assert_eq!(c.competitors.queries.len(), 5);
        let err = AppConfig::from_yaml("competitors:\n  max_links: 0\n", "t.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let err = AppConfig::load("/definitely/not/here.yaml").await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
