use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::dataset::{RawDataset, Reading};

/// Which row survives when several share the same (Date, Time) key
///
/// Rows are stably sorted first, so "first" means first in the order the rows
/// were combined: existing dataset rows, then the new batch in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupePolicy {
    /// Keep the first row, discard later ones (a re-upload never overwrites)
    #[default]
    KeepFirst,
    /// Keep the last row (a re-upload overwrites)
    KeepLast,
    /// Keep the first row but fill its missing channel values from later rows
    MergeNonNull,
}

impl FromStr for DedupePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-first" => Ok(Self::KeepFirst),
            "keep-last" => Ok(Self::KeepLast),
            "merge-non-null" => Ok(Self::MergeNonNull),
            other => Err(format!("unknown dedupe policy: {other}")),
        }
    }
}

impl fmt::Display for DedupePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeepFirst => "keep-first",
            Self::KeepLast => "keep-last",
            Self::MergeNonNull => "merge-non-null",
        })
    }
}

/// How the in-memory dataset is refreshed after an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    /// Rebuild everything from the staging directory
    #[default]
    FullReload,
    /// Merge the new batch into the current raw dataset
    Incremental,
}

impl FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full-reload" => Ok(Self::FullReload),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown refresh mode: {other}")),
        }
    }
}

impl RawDataset {
    /// Build a dataset from rows in any order
    pub fn from_rows(rows: Vec<Reading>, policy: DedupePolicy) -> Self {
        Self::from_sorted(combine(rows, policy))
    }

    /// Combine this dataset with a new batch of rows
    ///
    /// Existing rows come before the batch, which is what gives `KeepFirst`
    /// its "existing value wins" behaviour.
    pub fn merge(self, batch: Vec<Reading>, policy: DedupePolicy) -> Self {
        let mut rows = self.into_readings();
        rows.extend(batch);
        Self::from_rows(rows, policy)
    }
}

/// Stable sort by (Date, Time), then collapse duplicate keys
fn combine(mut rows: Vec<Reading>, policy: DedupePolicy) -> Vec<Reading> {
    let total = rows.len();
    rows.sort_by(|a, b| a.key().cmp(&b.key()));

    let mut merged: Vec<Reading> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(last) = merged.last_mut() {
            if last.key() == row.key() {
                match policy {
                    DedupePolicy::KeepFirst => {}
                    DedupePolicy::KeepLast => *last = row,
                    DedupePolicy::MergeNonNull => {
                        for (column, value) in row.values {
                            last.values.entry(column).or_insert(value);
                        }
                    }
                }
                continue;
            }
        }
        merged.push(row);
    }

    debug!(
        "Combined {} rows into {} unique (Date, Time) keys using {}",
        total,
        merged.len(),
        policy
    );
    merged
}
