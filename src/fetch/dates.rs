//! Publication date detection.
//!
//! Matchers are tried in order: publication meta tags, `<time datetime>`,
//! then absolute date literals in the visible text. The first date found
//! wins; if it is missing, in the future, or older than the recency
//! window, the run date is used instead.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static META_DATE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(concat!(
        r#"meta[property="article:published_time"], "#,
        r#"meta[name="pubdate"], "#,
        r#"meta[name="publish-date"], "#,
        r#"meta[name="date"], "#,
        r#"meta[itemprop="datePublished"]"#
    ))
    .unwrap()
});

static TIME_DATETIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());

static ISO: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})").unwrap());

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTH}\.?\s+(\d{{1,2}}),?\s+(\d{{4}})\b")).unwrap()
});

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})\s+{MONTH}\.?,?\s+(\d{{4}})\b")).unwrap()
});

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn iso_date(s: &str) -> Option<NaiveDate> {
    let caps = ISO.captures(s)?;
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

/// First absolute date literal in `text`.
pub fn date_in_text(text: &str) -> Option<NaiveDate> {
    if let Some(d) = iso_date(text) {
        return Some(d);
    }
    if let Some(caps) = MONTH_DAY_YEAR.captures(text) {
        let d = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            month_number(&caps[1])?,
            caps[2].parse().ok()?,
        );
        if d.is_some() {
            return d;
        }
    }
    let caps = DAY_MONTH_YEAR.captures(text)?;
    NaiveDate::from_ymd_opt(
        caps[3].parse().ok()?,
        month_number(&caps[2])?,
        caps[1].parse().ok()?,
    )
}

/// First date found in the page's markup, falling back to its text.
pub fn date_in_markup(page: &Html, text: &str) -> Option<NaiveDate> {
    page.select(&META_DATE)
        .filter_map(|m| m.value().attr("content"))
        .chain(
            page.select(&TIME_DATETIME)
                .filter_map(|t| t.value().attr("datetime")),
        )
        .find_map(iso_date)
        .or_else(|| date_in_text(text))
}

/// Accept `detected` only if it lies within `window_days` before `run_date`.
pub fn resolve_date(detected: Option<NaiveDate>, run_date: NaiveDate, window_days: i64) -> NaiveDate {
    match detected {
        Some(d) if d <= run_date && run_date - d <= Duration::days(window_days) => d,
        _ => run_date,
    }
}
