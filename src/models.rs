//! Data models shared across the harvesting pipeline.
//!
//! - [`Entity`]: a company under analysis, loaded from the registry or
//!   discovered as a competitor of one
//! - [`Query`]: a rendered search string or question for one entity/field
//! - [`CandidateLink`]: an unvalidated URL proposed by a search step
//! - [`FetchResult`]: outcome of fetching one URL
//! - [`HarvestedRecord`]: a quality-gated piece of text ready for persistence
//! - [`RecordSet`]: the final `entity -> field -> value` output
//!
//! Only [`HarvestedRecord`]s and orchestrator answers survive into the
//! record set; links and fetch results are dropped after the step that
//! produced them.

use crate::clean::AcceptedText;
use crate::error::HarvestError;
use crate::utils::source_name;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A company under analysis. Unique by ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub ticker: String,
    /// Ticker of the registry company this one was discovered as a
    /// competitor of. `None` for registry entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            parent: None,
        }
    }

    /// A company found on `parent`'s competitor pages.
    pub fn competitor_of(name: impl Into<String>, ticker: impl Into<String>, parent: &Entity) -> Self {
        Self {
            parent: Some(parent.ticker.clone()),
            ..Self::new(name, ticker)
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.ticker)
    }
}

/// A rendered query for one (entity, field) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Ticker of the entity the query was rendered for.
    pub ticker: String,
    /// Output field this query feeds. Doubles as the template id.
    pub field: String,
    pub text: String,
    pub parent: Option<String>,
}

/// A URL proposed by a search provider, not yet admitted or fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub url: String,
    pub query: String,
    pub ticker: String,
    pub field: String,
    pub parent: Option<String>,
}

impl CandidateLink {
    pub fn from_query(query: &Query, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: query.text.clone(),
            ticker: query.ticker.clone(),
            field: query.field.clone(),
            parent: query.parent.clone(),
        }
    }
}

/// Outcome class of a single fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Visible text was extracted. `date` is the detected publication
    /// date, or the run date when none could be trusted.
    Ok { text: String, date: NaiveDate },
    /// The page loaded but carried no visible block text.
    Empty,
    /// Every attempt hit the page-load timeout.
    TimedOut,
    /// A paywall, login wall or bot defense was detected.
    Blocked,
    /// Any other navigation or extraction failure.
    Error(String),
}

/// Result of fetching one URL, including how long it took.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status: FetchStatus,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl FetchResult {
    /// Classify a non-`Ok` outcome. `Empty` counts as insufficient content.
    pub fn failure(&self) -> Option<HarvestError> {
        match &self.status {
            FetchStatus::Ok { .. } => None,
            FetchStatus::Empty => Some(HarvestError::ContentInsufficient { len: 0, min: 0 }),
            FetchStatus::TimedOut => Some(HarvestError::TransportTimeout {
                attempts: self.attempts,
            }),
            FetchStatus::Blocked => Some(HarvestError::ContentBlocked(self.url.clone())),
            FetchStatus::Error(detail) => Some(HarvestError::Transport(detail.clone())),
        }
    }
}

/// A harvested piece of evidence.
///
/// Can only be built from [`AcceptedText`], so every record that reaches
/// persistence has passed the quality gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedRecord {
    pub ticker: String,
    pub field: String,
    pub date: NaiveDate,
    pub source_name: String,
    pub source_url: String,
    pub query: String,
    pub text: String,
    /// Set on records harvested for a discovered competitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl HarvestedRecord {
    pub fn new(link: &CandidateLink, date: NaiveDate, text: AcceptedText) -> Self {
        Self {
            ticker: link.ticker.clone(),
            field: link.field.clone(),
            date,
            source_name: source_name(&link.url),
            source_url: link.url.clone(),
            query: link.query.clone(),
            text: text.into_inner(),
            parent: link.parent.clone(),
        }
    }
}

/// Value stored under one output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Harvested records, capped per field.
    Records(Vec<HarvestedRecord>),
    /// A single orchestrator answer or its error sentinel.
    Answer(String),
}

/// Everything gathered for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReport {
    pub name: String,
    pub ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntityReport {
    pub fn new(entity: &Entity) -> Self {
        Self {
            name: entity.name.clone(),
            ticker: entity.ticker.clone(),
            parent: entity.parent.clone(),
            fields: BTreeMap::new(),
        }
    }

    /// Number of harvested records under `field` (0 for answers).
    pub fn record_count(&self, field: &str) -> usize {
        match self.fields.get(field) {
            Some(FieldValue::Records(records)) => records.len(),
            _ => 0,
        }
    }
}

/// The output of a run, ready for external persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    /// `harvest` or `research`.
    pub kind: String,
    pub run_date: NaiveDate,
    pub entities: Vec<EntityReport>,
}
