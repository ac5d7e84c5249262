//! Entity registry: the list of companies under analysis.
//!
//! The registry file is a flat, comma-separated list of `Name (TICKER)`
//! entries spread over any number of lines, e.g.
//!
//! ```text
//! MeridianLink Inc. (MLNK),PagerDuty Inc. (PD),"Weave Communications, Inc. (WEAV)"
//! ```
//!
//! Malformed entries are skipped with a warning. Later duplicates of a
//! ticker are dropped. An unreadable or empty registry aborts startup.

use crate::error::ConfigError;
use crate::models::Entity;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

static ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s\((\w+)\)").unwrap());

/// Parse one `Name (TICKER)` entry.
pub fn parse_entry(entry: &str) -> Option<Entity> {
    let caps = ENTRY.captures(entry.trim())?;
    Some(Entity::new(caps[1].trim(), &caps[2]))
}

/// Split a CSV line on commas that are not inside double quotes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Parse every entry in `input`, skipping malformed ones and duplicate tickers.
pub fn parse_entities(input: &str) -> Vec<Entity> {
    input
        .lines()
        .flat_map(split_fields)
        .filter(|field| !field.trim().is_empty())
        .filter_map(|field| {
            let parsed = parse_entry(&field);
            if parsed.is_none() {
                warn!(entry = %field.trim(), "Skipping malformed registry entry");
            }
            parsed
        })
        .unique_by(|e| e.ticker.clone())
        .collect()
}

/// Read and parse the registry at `path`.
#[instrument(level = "info", skip_all, fields(%path))]
pub async fn load_registry(path: &str) -> Result<Vec<Entity>, ConfigError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

    let entities = parse_entities(&raw);
    if entities.is_empty() {
        return Err(ConfigError::EmptyRegistry(path.to_string()));
    }

    info!(count = entities.len(), "Loaded entity registry");
    debug!(entities = ?entities, "Registry contents");
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        let e = parse_entry("MeridianLink Inc. (MLNK)").unwrap();
        assert_eq!(e.name, "MeridianLink Inc.");
        assert_eq!(e.ticker, "MLNK");
    }

    #[test]
    fn test_parse_entry_rejects_malformed() {
        assert!(parse_entry("MeridianLink Inc.").is_none());
        assert!(parse_entry("(MLNK)").is_none());
        assert!(parse_entry("").is_none());
    }

    #[test]
    fn test_parse_entities_from_csv_row() {
        let input = "MeridianLink Inc. (MLNK),PagerDuty Inc. (PD),Amplitude Inc. (AMPL)\n8x8 Inc. (EGHT)";
        let entities = parse_entities(input);
        let tickers: Vec<_> = entities.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["MLNK", "PD", "AMPL", "EGHT"]);
    }

    #[test]
    fn test_parse_entities_skips_bad_and_duplicates() {
        let input = "Acme Corp (ACME), garbage, ,Acme Corporation (ACME),Globex (GBX)";
        let entities = parse_entities(input);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "Acme Corp");
        assert_eq!(entities[1].ticker, "GBX");
    }

    #[test]
    fn test_quoted_entry_with_comma() {
        let input = r#""Weave Communications, Inc. (WEAV)",VNET Group Inc. (VNET)"#;
        let entities = parse_entities(input);
        assert_eq!(entities[0].name, "Weave Communications, Inc.");
        assert_eq!(entities[0].ticker, "WEAV");
        assert_eq!(entities[1].ticker, "VNET");
    }

    #[tokio::test]
    async fn test_load_registry_missing_file() {
        let err = load_registry("/definitely/not/here.csv").await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn test_load_registry_empty_is_error() {
        let path = std::env::temp_dir().join(format!("registry-empty-{}.csv", std::process::id()));
        tokio::fs::write(&path, "no tickers here").await.unwrap();
        let err = load_registry(&path.to_string_lossy()).await.unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRegistry(_)));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
