use std::path::{Path, PathBuf};

use relay_core::ResultSet;
use serde_json::{json, Value};

use crate::persist::{AtomicFileWriter, PersistError};
use crate::{HarvestReport, HarvestStatus};

/// Per-source harvest statistics and every verdict with its probe outcomes.
pub fn build_report(results: &ResultSet, harvest: &[HarvestReport]) -> Value {
    let live = results.live().count();
    json!({
        "candidate_count": results.len(),
        "live_count": live,
        "dead_count": results.len() - live,
        "sources": harvest.iter().map(|h| {
            let (status, error) = match &h.status {
                HarvestStatus::Harvested => ("harvested", None),
                HarvestStatus::Abandoned(err) => ("abandoned", Some(err.to_string())),
                HarvestStatus::Cancelled => ("cancelled", None),
            };
            json!({
                "id": h.source_id,
                "status": status,
                "error": error,
                "attempts": h.attempts,
                "backoff_ms": h.backoff.iter().map(|d| d.as_millis() as u64).collect::<Vec<_>>(),
                "tokens": h.tokens,
                "malformed": h.malformed,
                "admitted": h.admitted,
                "duplicates": h.duplicates,
            })
        }).collect::<Vec<_>>(),
        "candidates": results.iter().map(|v| {
            json!({
                "address": v.address().to_string(),
                "source": v.candidate().source_id,
                "discovered_utc": v.candidate().discovered_at.to_rfc3339(),
                "classification": v.classification().to_string(),
                "successes": v.successes(),
                "probes": v.outcomes().iter().map(|o| {
                    json!({
                        "target": o.target_id,
                        "success": o.success,
                        "latency_ms": o.latency.as_millis() as u64,
                        "failure": o.failure.as_ref().map(|f| f.to_string()),
                    })
                }).collect::<Vec<_>>(),
            })
        }).collect::<Vec<_>>(),
    })
}

pub fn write_report(path: &Path, report: &Value) -> Result<PathBuf, PersistError> {
    let content = serde_json::to_string_pretty(report)?;
    let (writer, filename) = AtomicFileWriter::for_path(path)?;
    writer.write(&filename, &content)
}
