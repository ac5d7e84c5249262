//! Utility functions for logging, URLs and file system checks.

use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument, warn};
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are cut at the last char boundary at or before `max` bytes,
/// with an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Host of `url` without a leading `www.`; the URL itself if it can't be parsed.
pub fn source_name(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.trim_start_matches("www.").to_string(),
            None => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

/// Create `path` if needed and prove it accepts writes.
/// Run once at startup, before any network work.
#[instrument(level = "info", skip_all, fields(%path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let marker = Path::new(path).join(".harvest_write_check");
    fs::write(&marker, b"ok").await?;
    if let Err(e) = fs::remove_file(&marker).await {
        warn!(marker = %marker.display(), error = %e, "Could not remove write check file");
    }
    info!("Output directory is writable");
    Ok(())
}
