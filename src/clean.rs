//! Text normalization and the minimum-information quality gate.
//!
//! [`Cleaner::clean`] collapses whitespace and strips consent/subscription
//! boilerplate. [`QualityGate::accept`] admits cleaned text only when it is
//! strictly longer than the configured minimum, and hands back an
//! [`AcceptedText`] token which is the only way to build a
//! [`HarvestedRecord`](crate::models::HarvestedRecord).

use crate::error::{ConfigError, HarvestError};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Phrases removed from every harvested text.
pub const DEFAULT_BOILERPLATE: &[&str] = &[
    "sign up",
    "subscribe to continue",
    "get full access",
    "create a free account",
    "already have an account",
    "log in to access",
    "start your free trial",
    "cookie policy",
];

/// Threshold for general search harvesting.
pub const GENERAL_MIN_CONTENT_CHARS: usize = 200;
/// Threshold for filing and competitor harvesting.
pub const ANALYSIS_MIN_CONTENT_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct Cleaner {
    boilerplate: Option<Regex>,
}

impl Cleaner {
    /// Build a cleaner removing `phrases` (matched case-insensitively).
    ///
    /// # Arguments
    ///
    /// * `phrases` - Literal phrases; blank entries are ignored
    ///
    /// # Returns
    ///
    /// The cleaner, or [`ConfigError::Invalid`] when the phrase list cannot
    /// be compiled into a single pattern.
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, ConfigError> {
        let alternation = phrases
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");

        if alternation.is_empty() {
            return Ok(Self { boilerplate: None });
        }
        let re = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::Invalid {
                path: "boilerplate".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { boilerplate: Some(re) })
    }

    /// Normalize `raw` to single-spaced, trimmed text without boilerplate.
    ///
    /// Runs to a fixed point, so removing one phrase can never leave
    /// behind a double space or a freshly joined phrase:
    /// `clean(clean(t)) == clean(t)`.
    pub fn clean(&self, raw: &str) -> String {
        let mut current = collapse(raw);
        loop {
            let next = match &self.boilerplate {
                Some(re) => collapse(&re.replace_all(&current, "")),
                None => return current,
            };
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

fn collapse(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Text that passed the quality gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedText(String);

impl AcceptedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Minimum-length acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityGate {
    min_chars: usize,
}

impl QualityGate {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    /// Accept `text` iff its length in characters exceeds the minimum.
    pub fn accept(&self, text: String) -> Result<AcceptedText, HarvestError> {
        let len = text.chars().count();
        if len > self.min_chars {
            Ok(AcceptedText(text))
        } else {
            Err(HarvestError::ContentInsufficient {
                len,
                min: self.min_chars,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> Cleaner {
        Cleaner::new(DEFAULT_BOILERPLATE).unwrap()
    }

    #[test]
    fn test_collapses_whitespace_and_trims() {
        let c = cleaner();
        assert_eq!(c.clean("  Revenue\n\n grew\t 12%  "), "Revenue grew 12%");
    }

    #[test]
    fn test_removes_subscribe_phrase() {
        let c = cleaner();
        let out = c.clean("Quarterly results   subscribe to continue   were strong.");
        assert_eq!(out, "Quarterly results were strong.");
        assert!(!out.contains("subscribe to continue"));
        assert!(!out.contains("  "));
    }

    #[test]
    fn test_removal_is_case_insensitive() {
        let c = cleaner();
        assert_eq!(c.clean("Read more. Sign Up today"), "Read more. today");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let c = cleaner();
        let samples = [
            "",
            "   ",
            "plain text",
            "sigsign upn up and more",
            "a sign  up b",
            "cookie policy cookie policy\n\nbody\ttext",
            "start your free trial.   Already have an account? log in to access",
        ];
        for s in samples {
            let once = c.clean(s);
            assert_eq!(c.clean(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_nested_phrase_removed_to_fixed_point() {
        let c = cleaner();
        assert_eq!(c.clean("sigsign upn up and more"), "and more");
    }

    #[test]
    fn test_empty_phrase_list_only_collapses() {
        let c = Cleaner::new::<&str>(&[]).unwrap();
        assert_eq!(c.clean(" sign   up "), "sign up");
    }

    #[test]
    fn test_configured_phrases_are_literal() {
        // regex metacharacters in a phrase must not change its meaning
        let c = Cleaner::new(&["read more (free)", "  ", "a.b"]).unwrap();
        assert_eq!(c.clean("x READ MORE (FREE) y axb a.b z"), "x y axb z");
    }

    #[test]
    fn test_gate_boundary() {
        let gate = QualityGate::new(GENERAL_MIN_CONTENT_CHARS);
        let exact = "x".repeat(GENERAL_MIN_CONTENT_CHARS);
        let one_more = "x".repeat(GENERAL_MIN_CONTENT_CHARS + 1);

        assert_eq!(
            gate.accept(exact),
            Err(HarvestError::ContentInsufficient { len: 200, min: 200 })
        );
        assert_eq!(gate.accept(one_more).unwrap().as_str().len(), 201);
    }

    #[test]
    fn test_gate_counts_chars_not_bytes() {
        let gate = QualityGate::new(3);
        // four chars, twelve bytes
        assert!(gate.accept("€€€€".to_string()).is_ok());
        assert!(gate.accept("€€€".to_string()).is_err());
    }

    #[test]
    fn test_analysis_threshold() {
        let gate = QualityGate::new(ANALYSIS_MIN_CONTENT_CHARS);
        assert!(gate.accept("y".repeat(1000)).is_err());
        assert!(gate.accept("y".repeat(1001)).is_ok());
    }
}
