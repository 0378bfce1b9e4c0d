//! Snapshot export to JSON and CSV.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::ExportError;
use crate::exchange::types::LatencyRecord;

pub const CSV_HEADER: &str = "Exchange,Latency (ms),Cloud Provider,Region,Location,Timestamp";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    total_exchanges: usize,
    export_format: &'static str,
}

#[derive(Serialize)]
struct Envelope<'a> {
    timestamp: String,
    data: &'a [LatencyRecord],
    metadata: Metadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ExportStats {
    pub min: u32,
    pub max: u32,
    pub avg: f64,
    pub count: usize,
}

/// Rejects empty snapshots and records that would render as broken rows.
pub fn validate(records: &[LatencyRecord]) -> Result<(), ExportError> {
    if records.is_empty() {
        return Err(ExportError::Empty);
    }

    for (index, r) in records.iter().enumerate() {
        let reason = if r.exchange.trim().is_empty() {
            "missing exchange name"
        } else if r.region.trim().is_empty() {
            "missing region"
        } else if !r.location.lat.is_finite() || !r.location.lng.is_finite() {
            "non-finite coordinates"
        } else if r.latency == 0 {
            "latency must be positive"
        } else {
            continue;
        };

        return Err(ExportError::Malformed {
            index,
            reason: reason.to_string(),
        });
    }
    Ok(())
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Pretty-printed `{timestamp, data, metadata}` document.
pub fn to_json(records: &[LatencyRecord], now: DateTime<Utc>) -> Result<String, ExportError> {
    validate(records)?;

    let envelope = Envelope {
        timestamp: iso(now),
        data: records,
        metadata: Metadata {
            total_exchanges: records.len(),
            export_format: "json",
        },
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn quoted(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

pub fn to_csv(records: &[LatencyRecord]) -> Result<String, ExportError> {
    validate(records)?;

    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for r in records {
        lines.push(
            [
                quoted(&r.exchange),
                r.latency.to_string(),
                quoted(r.cloud.as_str()),
                quoted(&r.region),
                quoted(&format!("{},{}", r.location.lat, r.location.lng)),
                quoted(&iso(r.timestamp)),
            ]
            .join(","),
        );
    }
    Ok(lines.join("\n"))
}

/// `None` for an empty snapshot.
pub fn stats(records: &[LatencyRecord]) -> Option<ExportStats> {
    let min = records.iter().map(|r| r.latency).min()?;
    let max = records.iter().map(|r| r.latency).max()?;
    let sum: u64 = records.iter().map(|r| u64::from(r.latency)).sum();

    Some(ExportStats {
        min,
        max,
        avg: sum as f64 / records.len() as f64,
        count: records.len(),
    })
}

pub fn file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "latency-data-{}.{}",
        now.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Writes both formats into `dir` and returns the paths written.
#[instrument(skip(records), target = "export", fields(count = records.len()))]
pub fn write_exports(
    dir: &Path,
    records: &[LatencyRecord],
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>, ExportError> {
    let json = to_json(records, now)?;
    let csv = to_csv(records)?;

    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(2);
    for (format, body) in [(ExportFormat::Json, json), (ExportFormat::Csv, csv)] {
        let path = dir.join(file_name(format, now));
        fs::write(&path, body)?;
        written.push(path);
    }

    info!(files = written.len(), dir = %dir.display(), "snapshot exported");
    Ok(written)
}
