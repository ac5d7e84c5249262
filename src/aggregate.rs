//! Result aggregation: accepted records and answers into one record set.

use crate::models::{Entity, EntityReport, FieldValue, HarvestedRecord, RecordSet};
use crate::remote::RemoteAnswer;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-entity accumulator, in registry order.
///
/// Record fields hold at most `cap` records. Answer fields hold exactly one
/// value, which may be an error sentinel.
#[derive(Debug)]
pub struct Aggregator {
    cap: usize,
    reports: Vec<EntityReport>,
    by_ticker: HashMap<String, usize>,
}

impl Aggregator {
    pub fn new(entities: &[Entity], cap: usize) -> Self {
        Self {
            cap,
            reports: entities.iter().map(EntityReport::new).collect(),
            by_ticker: entities
                .iter()
                .enumerate()
                .map(|(i, e)| (e.ticker.clone(), i))
                .collect(),
        }
    }

    fn report_mut(&mut self, ticker: &str) -> Option<&mut EntityReport> {
        let idx = *self.by_ticker.get(ticker)?;
        self.reports.get_mut(idx)
    }

    /// Make `field` show up for `ticker` even if nothing is harvested for it.
    pub fn open_field(&mut self, ticker: &str, field: &str) {
        if let Some(report) = self.report_mut(ticker) {
            report
                .fields
                .entry(field.to_string())
                .or_insert_with(|| FieldValue::Records(Vec::new()));
        }
    }

    pub fn is_full(&self, ticker: &str, field: &str) -> bool {
        self.by_ticker
            .get(ticker)
            .and_then(|&i| self.reports.get(i))
            .map(|r| r.record_count(field) >= self.cap)
            .unwrap_or(false)
    }

    /// Add `record` to its field. Returns `false` if the field is full,
    /// holds an answer, or the entity is unknown.
    pub fn offer(&mut self, record: HarvestedRecord) -> bool {
        let cap = self.cap;
        let Some(report) = self.report_mut(&record.ticker) else {
            warn!(ticker = %record.ticker, "Record for unknown entity dropped");
            return false;
        };
        let slot = report
            .fields
            .entry(record.field.clone())
            .or_insert_with(|| FieldValue::Records(Vec::new()));
        match slot {
            FieldValue::Records(records) if records.len() < cap => {
                debug!(ticker = %record.ticker, field = %record.field, url = %record.source_url, "Record accepted");
                records.push(record);
                true
            }
            FieldValue::Records(_) => {
                debug!(ticker = %record.ticker, field = %record.field, cap, "Field full; record dropped");
                false
            }
            FieldValue::Answer(_) => false,
        }
    }

    /// Store the single value for an answer field. A field only takes its
    /// first answer.
    pub fn record_answer(&mut self, ticker: &str, field: &str, answer: &RemoteAnswer) -> bool {
        let Some(report) = self.report_mut(ticker) else {
            warn!(%ticker, "Answer for unknown entity dropped");
            return false;
        };
        match report.fields.get(field) {
            Some(FieldValue::Answer(_)) => false,
            Some(FieldValue::Records(r)) if !r.is_empty() => false,
            _ => {
                report
                    .fields
                    .insert(field.to_string(), FieldValue::Answer(answer.to_string()));
                true
            }
        }
    }

    pub fn total_records(&self) -> usize {
        self.reports
            .iter()
            .flat_map(|r| r.fields.values())
            .map(|v| match v {
                FieldValue::Records(records) => records.len(),
                FieldValue::Answer(_) => 0,
            })
            .sum()
    }

    pub fn into_record_set(self, kind: &str, run_date: NaiveDate) -> RecordSet {
        RecordSet {
            kind: kind.to_string(),
            run_date,
            entities: self.reports,
        }
    }
}
