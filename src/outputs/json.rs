//! JSON output of a [`RecordSet`].

use crate::models::RecordSet;
use std::error::Error;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `set` as pretty JSON to `{output_dir}/{run_date}/{kind}.json`.
///
/// Returns the path written. A second run on the same day replaces the file.
#[instrument(level = "info", skip_all, fields(%output_dir, kind = %set.kind))]
pub async fn write_record_set(set: &RecordSet, output_dir: &str) -> Result<String, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(set)?;

    let dir = format!("{}/{}", output_dir.trim_end_matches('/'), set.run_date);
    info!(%dir, "Ensuring JSON directory exists");
    if let Err(e) = fs::create_dir_all(&dir).await {
        error!(%dir, error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let path = format!("{}/{}.json", dir, set.kind);
    fs::write(&path, json).await?;
    info!(%path, entities = set.entities.len(), "Wrote record set");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityReport, FieldValue};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_writes_dated_file_that_reads_back() {
        let out = std::env::temp_dir().join(format!("harvest-json-{}", std::process::id()));
        let out_str = out.to_string_lossy().to_string();

        let mut fields = BTreeMap::new();
        fields.insert("SIC CODE".to_string(), FieldValue::Answer("ERROR: Timeout".into()));
        fields.insert("earnings".to_string(), FieldValue::Records(vec![]));
        let set = RecordSet {
            kind: "research".into(),
            run_date: NaiveDate::from_ymd_opt(2025, 5, 6).unwrap(),
            entities: vec![EntityReport {
                name: "Acme Corp".into(),
                ticker: "ACME".into(),
                parent: None,
                fields,
            }],
        };

        let path = write_record_set(&set, &out_str).await.unwrap();
        assert!(path.ends_with("2025-05-06/research.json"));

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: RecordSet = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.entities, set.entities);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["entities"][0]["fields"]["SIC CODE"], "ERROR: Timeout");

        let _ = std::fs::remove_dir_all(&out);
    }
}
