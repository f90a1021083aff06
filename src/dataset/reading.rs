use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DATE_COLUMN: &str = "Date";
pub const TIME_COLUMN: &str = "Time";
pub const UNKNOWN_DATE_KEY: &str = "Unknown";

/// Batch label taken from the part of a filename before its first underscore
///
/// Usually an ISO date (`2025-03-21`), but any label is accepted, and
/// filenames without an underscore map to `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(String);

impl DateKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_DATE_KEY.to_string())
    }

    /// Derive the key from a file name (directories are ignored)
    ///
    /// ```
    /// use energy_usage_service::dataset::DateKey;
    ///
    /// assert_eq!(DateKey::from_filename("2025-03-21_meter.xlsx").as_str(), "2025-03-21");
    /// assert_eq!(DateKey::from_filename("exports/2025-03-22_a_b.xlsx").as_str(), "2025-03-22");
    /// assert_eq!(DateKey::from_filename("meter.xlsx").as_str(), "Unknown");
    /// ```
    pub fn from_filename(filename: &str) -> Self {
        let base = base_name(filename);
        match base.split_once('_') {
            Some((prefix, _)) if !prefix.trim().is_empty() => Self(prefix.trim().to_string()),
            _ => Self::unknown(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar date, when the key is an ISO `YYYY-MM-DD` date
    pub fn as_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last path component, accepting both `/` and `\` separators
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// One row of the dataset: a (Date, Time) key plus one value per channel column
///
/// Serializes to the flat record shape the dashboard consumes:
/// `{"Date": "...", "Time": "...", "<column>": value, ...}`. A channel with no
/// value in this row is simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "Date")]
    pub date: DateKey,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

impl Reading {
    pub fn new(date: DateKey, time: impl Into<String>) -> Self {
        Self {
            date,
            time: time.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: f64) -> Self {
        self.values.insert(column.into(), value);
        self
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }

    pub fn key(&self) -> (&DateKey, &str) {
        (&self.date, self.time.as_str())
    }

    /// Sum of every channel value in the row
    pub fn total(&self) -> f64 {
        self.values.values().sum()
    }
}
