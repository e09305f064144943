// crates/store/src/query/export.rs
//! Deterministic exports of query results: canonical JSON, configurable
//! CSV, and human-readable Markdown with header statistics.

use redline_types::{Change, ChangeStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

/// Columns available to the CSV export, emitted in the order given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvColumn {
    Id,
    Session,
    Kind,
    Start,
    End,
    Before,
    After,
    Category,
    Source,
    Confidence,
    Timestamp,
    Status,
    Provider,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvOptions {
    pub columns: Vec<CsvColumn>,
    /// chrono format string for timestamp columns.
    pub date_format: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            columns: vec![
                CsvColumn::Id,
                CsvColumn::Category,
                CsvColumn::Source,
                CsvColumn::Start,
                CsvColumn::End,
                CsvColumn::Before,
                CsvColumn::After,
                CsvColumn::Confidence,
                CsvColumn::Status,
                CsvColumn::Timestamp,
            ],
            date_format: "%Y-%m-%dT%H:%M:%SZ".to_string(),
        }
    }
}

impl CsvColumn {
    fn header(&self) -> &'static str {
        match self {
            CsvColumn::Id => "id",
            CsvColumn::Session => "session",
            CsvColumn::Kind => "kind",
            CsvColumn::Start => "start",
            CsvColumn::End => "end",
            CsvColumn::Before => "before",
            CsvColumn::After => "after",
            CsvColumn::Category => "category",
            CsvColumn::Source => "source",
            CsvColumn::Confidence => "confidence",
            CsvColumn::Timestamp => "timestamp",
            CsvColumn::Status => "status",
            CsvColumn::Provider => "provider",
            CsvColumn::Model => "model",
        }
    }

    fn value(&self, change: &Change, date_format: &str) -> String {
        match self {
            CsvColumn::Id => change.id.to_string(),
            CsvColumn::Session => change.session_id.to_string(),
            CsvColumn::Kind => format!("{:?}", change.kind).to_lowercase(),
            CsvColumn::Start => change.position.start.to_string(),
            CsvColumn::End => change.position.end.to_string(),
            CsvColumn::Before => change.content.before.clone(),
            CsvColumn::After => change.content.after.clone(),
            CsvColumn::Category => change.category.to_string(),
            CsvColumn::Source => change.source.clone(),
            CsvColumn::Confidence => format!("{:.3}", change.confidence),
            CsvColumn::Timestamp => change.timestamp.format(date_format).to_string(),
            CsvColumn::Status => change.status.to_string(),
            CsvColumn::Provider => change
                .attribution
                .as_ref()
                .map(|a| a.provider.clone())
                .unwrap_or_default(),
            CsvColumn::Model => change
                .attribution
                .as_ref()
                .map(|a| a.model.clone())
                .unwrap_or_default(),
        }
    }
}

/// Canonical JSON: compact, struct field order, sorted metadata maps.
/// Exporting, importing, and exporting again is byte-identical.
pub fn to_json(changes: &[Change]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(changes)
}

pub fn from_json(bytes: &[u8]) -> Result<Vec<Change>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn to_csv(changes: &[Change], options: &CsvOptions) -> Vec<u8> {
    let mut out = String::new();
    let headers: Vec<&str> = options.columns.iter().map(|c| c.header()).collect();
    out.push_str(&headers.join(","));
    out.push('\n');
    for change in changes {
        let row: Vec<String> = options
            .columns
            .iter()
            .map(|c| csv_escape(&c.value(change, &options.date_format)))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Markdown report: summary statistics header, then one row per change.
pub fn to_markdown(changes: &[Change]) -> Vec<u8> {
    let total = changes.len();
    let count = |status: ChangeStatus| changes.iter().filter(|c| c.status == status).count();
    let mean_confidence = if total == 0 {
        0.0
    } else {
        changes.iter().map(|c| c.confidence).sum::<f64>() / total as f64
    };

    let mut out = String::new();
    out.push_str("# Change report\n\n");
    out.push_str(&format!("- Total changes: {total}\n"));
    out.push_str(&format!("- Accepted: {}\n", count(ChangeStatus::Accepted)));
    out.push_str(&format!("- Rejected: {}\n", count(ChangeStatus::Rejected)));
    out.push_str(&format!("- Pending: {}\n", count(ChangeStatus::Pending)));
    out.push_str(&format!(
        "- Superseded: {}\n",
        count(ChangeStatus::Superseded)
    ));
    out.push_str(&format!("- Mean confidence: {mean_confidence:.3}\n\n"));

    out.push_str("| id | category | source | span | before | after | confidence | status |\n");
    out.push_str("|---|---|---|---|---|---|---|---|\n");
    for change in changes {
        out.push_str(&format!(
            "| {} | {} | {} | [{}, {}) | {} | {} | {:.2} | {} |\n",
            change.id,
            change.category,
            md_escape(&change.source),
            change.position.start,
            change.position.end,
            md_escape(&change.content.before),
            md_escape(&change.content.after),
            change.confidence,
            change.status,
        ));
    }
    out.into_bytes()
}

fn md_escape(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Dispatch helper used by the pipeline's `export` entry point.
pub fn export(
    changes: &[Change],
    format: ExportFormat,
    csv_options: &CsvOptions,
) -> Result<Vec<u8>, serde_json::Error> {
    match format {
        ExportFormat::Json => to_json(changes),
        ExportFormat::Csv => Ok(to_csv(changes, csv_options)),
        ExportFormat::Markdown => Ok(to_markdown(changes)),
    }
}
