//! Cookie banner and popup handling.
//!
//! Handlers run in order against the parsed page before text extraction.
//! Each one removes the elements it recognizes from the DOM and reports
//! whether it found anything. None of them can fail the fetch.

use crate::error::ConfigError;
use scraper::{ElementRef, Html, Selector};

pub const DEFAULT_COOKIE_SELECTORS: &[&str] = &[
    r#"button[aria-label="Accept"]"#,
    r#"button[class*="cookie"]"#,
    r#"div[class*="cookie"]"#,
    r#"div[id*="cookie"]"#,
    r#"div[class*="consent"]"#,
    r#"div[id*="consent"]"#,
];

pub const DEFAULT_POPUP_SELECTORS: &[&str] = &[
    "iframe",
    "dialog",
    r#"[role="dialog"]"#,
    r#"div[class*="popup"]"#,
    r#"div[class*="overlay"]"#,
    r#"div[class*="modal"]"#,
];

pub const DEFAULT_CONSENT_KEYWORDS: &[&str] = &["accept all", "accept cookies", "i agree"];

/// A best-effort strategy for clearing one kind of obstruction.
pub trait ObstructionHandler {
    fn name(&self) -> &str;

    /// Remove what this handler recognizes. Returns `true` if anything was removed.
    fn dismiss(&self, page: &mut Html) -> bool;
}

/// Removes every element matching any of a list of CSS selectors.
#[derive(Debug)]
pub struct SelectorDismiss {
    name: String,
    selectors: Vec<Selector>,
}

impl SelectorDismiss {
    pub fn new<S: AsRef<str>>(name: &str, selectors: &[S]) -> Result<Self, ConfigError> {
        let selectors = selectors
            .iter()
            .map(|s| {
                Selector::parse(s.as_ref()).map_err(|e| ConfigError::Invalid {
                    path: format!("{name} selectors"),
                    reason: format!("`{}`: {e:?}", s.as_ref()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            selectors,
        })
    }
}

impl ObstructionHandler for SelectorDismiss {
    fn name(&self) -> &str {
        &self.name
    }

    fn dismiss(&self, page: &mut Html) -> bool {
        let ids: Vec<_> = self
            .selectors
            .iter()
            .flat_map(|sel| page.select(sel))
            .filter(|el| !is_document_root(el))
            .map(|el| el.id())
            .collect();
        let removed = !ids.is_empty();
        for id in ids {
            if let Some(mut node) = page.tree.get_mut(id) {
                node.detach();
            }
        }
        removed
    }
}

/// Finds buttons and links whose text is a consent keyword and removes
/// the banner that contains them.
#[derive(Debug)]
pub struct KeywordDismiss {
    name: String,
    keywords: Vec<String>,
    clickable: Selector,
}

impl KeywordDismiss {
    pub fn new<S: AsRef<str>>(name: &str, keywords: &[S]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            clickable: Selector::parse(r#"button, a, [role="button"]"#).unwrap(),
        }
    }

    fn matches(&self, el: &ElementRef) -> bool {
        let text = el.text().collect::<String>().trim().to_lowercase();
        !text.is_empty() && self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

impl ObstructionHandler for KeywordDismiss {
    fn name(&self) -> &str {
        &self.name
    }

    fn dismiss(&self, page: &mut Html) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let ids: Vec<_> = page
            .select(&self.clickable)
            .filter(|el| self.matches(el))
            .map(|el| banner_of(el).id())
            .collect();
        let removed = !ids.is_empty();
        for id in ids {
            if let Some(mut node) = page.tree.get_mut(id) {
                node.detach();
            }
        }
        removed
    }
}

/// Closest enclosing container of a consent control, or the control itself.
fn banner_of(el: ElementRef<'_>) -> ElementRef<'_> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|a| !is_document_root(a))
        .find(|a| {
            matches!(
                a.value().name(),
                "div" | "section" | "aside" | "dialog" | "form" | "footer"
            )
        })
        .unwrap_or(el)
}

fn is_document_root(el: &ElementRef) -> bool {
    matches!(el.value().name(), "html" | "body" | "head")
}

/// Handlers in the order they are tried: cookie banners, consent buttons, popups.
pub fn build_handlers<S: AsRef<str>>(
    cookie_selectors: &[S],
    consent_keywords: &[S],
    popup_selectors: &[S],
) -> Result<Vec<Box<dyn ObstructionHandler + Send + Sync>>, ConfigError> {
    Ok(vec![
        Box::new(SelectorDismiss::new("cookie-banner", cookie_selectors)?),
        Box::new(KeywordDismiss::new("consent-button", consent_keywords)),
        Box::new(SelectorDismiss::new("popup", popup_selectors)?),
    ])
}
