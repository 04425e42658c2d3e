//! Rendering of the sample history into shareable files.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::Sample;

pub const CSV_HEADER: &str = "Latitude,Longitude,Fecha,Precisión";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no samples to export")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Deserialize,
    Serialize,
    utoipa::ToSchema,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Txt,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Txt => "text/plain; charset=utf-8",
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRow<'a> {
    latitude: f64,
    longitude: f64,
    timestamp: i64,
    date: &'a str,
    accuracy: f32,
}

fn format_date(sample: &Sample) -> String {
    sample
        .local_time()
        .map(|t| t.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| sample.timestamp.to_string())
}

pub fn render(samples: &[Sample], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => Ok(render_csv(samples)),
        ExportFormat::Json => render_json(samples),
        ExportFormat::Txt => Ok(render_txt(samples)),
    }
}

fn render_csv(samples: &[Sample]) -> String {
    let mut out = String::with_capacity(samples.len() * 48 + CSV_HEADER.len() + 1);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for s in samples {
        let _ = writeln!(
            out,
            "{},{},{},{}",
            s.latitude,
            s.longitude,
            format_date(s),
            s.accuracy
        );
    }
    out
}

fn render_json(samples: &[Sample]) -> Result<String, ExportError> {
    let dates: Vec<String> = samples.iter().map(format_date).collect();
    let rows: Vec<JsonRow<'_>> = samples
        .iter()
        .zip(&dates)
        .map(|(s, date)| JsonRow {
            latitude: s.latitude,
            longitude: s.longitude,
            timestamp: s.timestamp,
            date,
            accuracy: s.accuracy,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

fn render_txt(samples: &[Sample]) -> String {
    let mut out = String::new();
    for (i, s) in samples.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "Latitud: {:.6}", s.latitude);
        let _ = writeln!(out, "Longitud: {:.6}", s.longitude);
        let _ = writeln!(out, "Fecha: {}", format_date(s));
        let _ = writeln!(out, "Precisión: {:.1} metros", s.accuracy);
    }
    out
}

/// Writes the export into `dir` and returns the created file.
pub fn export_to_dir(
    dir: &Path,
    samples: &[Sample],
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    if samples.is_empty() {
        return Err(ExportError::Empty);
    }
    let content = render(samples, format)?;

    std::fs::create_dir_all(dir)?;
    let name = format!(
        "rastreo_{}_{}.{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        format.extension()
    );
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    log::info!("Exported {} samples to {}", samples.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(19.5046, -99.146, 1_700_000_300_000, 4.5),
            Sample::new(19.5, -99.1, 1_700_000_000_000, 12.0),
        ]
    }

    #[test]
    fn csv_has_header_and_one_row_per_sample() {
        let csv = render(&samples(), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Latitude,Longitude,Fecha,Precisión");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("19.5046,-99.146,"));
        assert!(lines[1].ends_with(",4.5"));
        assert_eq!(lines[2].split(',').count(), 4);
    }

    #[test]
    fn csv_of_nothing_is_just_the_header() {
        assert_eq!(render(&[], ExportFormat::Csv).unwrap(), format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn json_keeps_order_and_fields() {
        let json = render(&samples(), ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let rows = parsed.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["timestamp"], 1_700_000_300_000i64);
        assert_eq!(rows[1]["latitude"], 19.5);
        assert!(rows[0]["date"].is_string());
    }

    #[test]
    fn txt_formats_precision() {
        let txt = render(&samples()[..1], ExportFormat::Txt).unwrap();
        assert!(txt.contains("Latitud: 19.504600"));
        assert!(txt.contains("Longitud: -99.146000"));
        assert!(txt.contains("Precisión: 4.5 metros"));
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(ExportFormat::from_str("json", false).unwrap(), ExportFormat::Json);
        assert!(ExportFormat::from_str("xml", false).is_err());
        assert_eq!(ExportFormat::Txt.to_string(), "txt");

        let query: ExportFormat = serde_json::from_str("\"txt\"").unwrap();
        assert_eq!(query, ExportFormat::Txt);
    }

    #[test]
    fn export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = export_to_dir(dir.path(), &samples(), ExportFormat::Csv).unwrap();
        assert_eq!(path.extension().unwrap(), "csv");
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.starts_with(CSV_HEADER));
    }

    #[test]
    fn empty_export_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_to_dir(dir.path(), &[], ExportFormat::Json).unwrap_err();
        assert!(matches!(err, ExportError::Empty));
    }
}
