//! Link frontier: the dedup and fan-out gate between search and fetch.
//!
//! Every URL is admitted at most once per run, and each (entity, field)
//! pair admits at most `cap` URLs. Admission consumes a slot whether or
//! not the fetch that follows produces a record.

use crate::models::CandidateLink;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Why a candidate was or wasn't admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    CapReached,
}

#[derive(Debug)]
pub struct Frontier {
    cap: usize,
    seen: HashSet<String>,
    counts: HashMap<(String, String), usize>,
}

impl Frontier {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            seen: HashSet::new(),
            counts: HashMap::new(),
        }
    }

    /// Try to admit `candidate`. On success the URL is marked seen and the
    /// (entity, field) count is incremented.
    pub fn admit(&mut self, candidate: &CandidateLink) -> Admission {
        let key = normalize(&candidate.url);
        if self.seen.contains(&key) {
            return Admission::Duplicate;
        }
        let count = self
            .counts
            .entry((candidate.ticker.clone(), candidate.field.clone()))
            .or_insert(0);
        if *count >= self.cap {
            return Admission::CapReached;
        }
        *count += 1;
        self.seen.insert(key);
        Admission::Admitted
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }
}

/// Dedup key for a URL: parsed form without fragment, or the raw string.
fn normalize(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}
