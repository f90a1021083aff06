use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::dataset::{DateKey, Reading, DATE_COLUMN, TIME_COLUMN};
use crate::ingest::{IngestError, SpreadsheetEntry, SpreadsheetFormat};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One spreadsheet parsed into a header and cell rows
///
/// # Expected Sheet Structure:
/// ```text
/// Row 1: Header (Time | <channel column> | <channel column> | ...)
/// Row 2+: One reading per row (00:00 | 12.0 | 3.5 | ...)
/// ```
/// Only the first worksheet is read. A `Date` column, if present, is ignored
/// in favour of the date key taken from the file name.
#[derive(Debug, Clone)]
pub struct NormalizedSheet {
    pub source: String,
    pub date_key: DateKey,
    time_col: usize,
    channel_cols: Vec<(usize, String)>,
    rows: Vec<Vec<Data>>,
}

impl NormalizedSheet {
    pub fn parse(entry: &SpreadsheetEntry) -> Result<Self, IngestError> {
        Self::parse_bytes(
            &entry.filename,
            entry.date_key.clone(),
            entry.format,
            &entry.bytes,
        )
    }

    pub fn parse_bytes(
        source: &str,
        date_key: DateKey,
        format: SpreadsheetFormat,
        bytes: &[u8],
    ) -> Result<Self, IngestError> {
        let mut rows = match format {
            SpreadsheetFormat::Csv => read_csv(source, bytes)?,
            _ => read_workbook(source, bytes)?,
        }
        .into_iter();

        let header: Vec<String> = rows
            .next()
            .map(|cells| {
                cells
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| header_name(i, cell))
                    .collect()
            })
            .unwrap_or_default();

        let time_col = header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(TIME_COLUMN))
            .ok_or_else(|| IngestError::SchemaViolation {
                file: source.to_string(),
                msg: format!("missing required '{TIME_COLUMN}' column"),
            })?;

        let mut seen = HashSet::new();
        let mut channel_cols = Vec::new();
        for (idx, name) in header.into_iter().enumerate() {
            if idx == time_col || name.eq_ignore_ascii_case(DATE_COLUMN) {
                continue;
            }
            if !seen.insert(name.clone()) {
                warn!("Duplicate column '{}' in {}, keeping the first", name, source);
                continue;
            }
            channel_cols.push((idx, name));
        }

        let rows: Vec<Vec<Data>> = rows.collect();
        debug!(
            "Parsed {} with {} channel columns and {} data rows",
            source,
            channel_cols.len(),
            rows.len()
        );

        Ok(Self {
            source: source.to_string(),
            date_key,
            time_col,
            channel_cols,
            rows,
        })
    }

    pub fn channel_columns(&self) -> impl Iterator<Item = &str> {
        self.channel_cols.iter().map(|(_, name)| name.as_str())
    }

    /// Lazily produce one reading per data row
    ///
    /// Rows without a time label are skipped, as are cells that hold no number.
    pub fn readings(&self) -> impl Iterator<Item = Reading> + '_ {
        self.rows.iter().filter_map(move |cells| {
            let time = cells.get(self.time_col).and_then(time_label)?;
            let mut reading = Reading::new(self.date_key.clone(), time);
            for (idx, column) in &self.channel_cols {
                if let Some(value) = cells.get(*idx).and_then(numeric_value) {
                    reading.values.insert(column.clone(), value);
                }
            }
            Some(reading)
        })
    }
}

fn read_workbook(source: &str, bytes: &[u8]) -> Result<Vec<Vec<Data>>, IngestError> {
    // Open workbook (this is synchronous, caller should use spawn_blocking)
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::malformed(source, format!("failed to open workbook: {e}")))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::malformed(source, "workbook has no sheets"))?;

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        IngestError::malformed(source, format!("failed to read sheet {sheet_name}: {e}"))
    })?;

    Ok(range.rows().map(|row| row.to_vec()).collect())
}

fn read_csv(source: &str, bytes: &[u8]) -> Result<Vec<Vec<Data>>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| IngestError::malformed(source, format!("invalid CSV: {e}")))?;
        rows.push(record.iter().map(csv_cell).collect());
    }
    Ok(rows)
}

fn csv_cell(field: &str) -> Data {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        Data::Empty
    } else if let Ok(f) = trimmed.parse::<f64>() {
        Data::Float(f)
    } else {
        Data::String(trimmed.to_string())
    }
}

fn header_name(idx: usize, cell: &Data) -> String {
    let name = match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    };
    if name.is_empty() {
        format!("Unnamed: {idx}")
    } else {
        name
    }
}

fn numeric_value(cell: &Data) -> Option<f64> {
    let value = match cell {
        Data::Float(f) => *f,
        Data::Int(i) => *i as f64,
        Data::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn clock_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2})(?:\.\d+)?)?$").ok())
        .as_ref()
}

fn format_clock(hours: u32, minutes: u32, seconds: u32) -> String {
    if seconds == 0 {
        format!("{hours:02}:{minutes:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Zero-pad clock labels so they sort lexically (`7:05` → `07:05`)
///
/// Anything that is not a clock time is returned trimmed but otherwise as-is.
pub fn normalize_time_label(label: &str) -> String {
    let label = label.trim();
    match clock_pattern().and_then(|re| re.captures(label)) {
        Some(caps) => {
            let part = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .unwrap_or(0)
            };
            format_clock(part(1), part(2), part(3))
        }
        None => label.to_string(),
    }
}

/// Time of day from an Excel serial (the fractional part is the time)
fn clock_from_serial(serial: f64) -> String {
    let seconds = (serial.fract() * SECONDS_PER_DAY).round() as u32 % 86_400;
    format_clock(seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

fn time_label(cell: &Data) -> Option<String> {
    let label = match cell {
        Data::String(s) => normalize_time_label(s),
        Data::DateTime(dt) => clock_from_serial(dt.as_f64()),
        Data::Float(f) if (0.0..1.0).contains(f) => clock_from_serial(*f),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::DateTimeIso(s) => iso_clock(s),
        Data::DurationIso(s) => s.trim().to_string(),
        Data::Empty | Data::Bool(_) | Data::Error(_) => return None,
    };
    (!label.is_empty()).then_some(label)
}

fn iso_clock(value: &str) -> String {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return format_clock(dt.hour(), dt.minute(), dt.second());
    }
    if let Ok(t) = NaiveTime::parse_from_str(value, "%H:%M:%S%.f") {
        return format_clock(t.hour(), t.minute(), t.second());
    }
    normalize_time_label(value)
}
