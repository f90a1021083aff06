//! Read-only projections of a dataset for the dashboard views
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::str::FromStr;
use thiserror::Error;

use crate::dataset::{Dataset, DateKey, Reading};

pub const AVERAGE_DATE_LABEL: &str = "Average";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Channel not found in dataset: {0}")]
    ChannelNotFound(String),

    #[error("Date not found in dataset: {0}")]
    DateNotFound(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("No data available")]
    NoData,
}

/// Which rows a view covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DateSelection {
    /// Every row, unfiltered
    #[default]
    All,
    /// One row per time of day, averaged across dates
    Average,
    Date(DateKey),
}

impl DateSelection {
    const ALL: &'static str = "all";
    const AVERAGE: &'static str = "average";

    /// Whether a date key would be read back as a view name instead of a date
    pub fn is_reserved(key: &str) -> bool {
        matches!(key.trim(), "" | Self::ALL | Self::AVERAGE)
    }
}

impl FromStr for DateSelection {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | Self::ALL => Self::All,
            Self::AVERAGE => Self::Average,
            other => Self::Date(DateKey::new(other)),
        })
    }
}

/// Date × time matrix of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
    pub channel: String,
    pub dates: Vec<DateKey>,
    pub times: Vec<String>,
    /// `values[d][t]` is the reading for `dates[d]` at `times[t]`
    pub values: Vec<Vec<Option<f64>>>,
}

impl<S> Dataset<S> {
    /// Distinct date keys in dataset order
    pub fn date_keys(&self) -> Vec<DateKey> {
        let mut keys: Vec<DateKey> = Vec::new();
        for reading in self.readings() {
            if keys.last() != Some(&reading.date) {
                keys.push(reading.date.clone());
            }
        }
        keys
    }

    pub fn require_channel(&self, column: &str) -> Result<(), QueryError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(QueryError::ChannelNotFound(column.to_string()))
        }
    }

    pub fn rows_for_date(&self, date: &DateKey) -> Vec<&Reading> {
        self.readings().iter().filter(|r| &r.date == date).collect()
    }

    /// Rows for a selection, optionally narrowed to one channel column
    pub fn view(
        &self,
        selection: &DateSelection,
        channel: Option<&str>,
    ) -> Result<Vec<Reading>, QueryError> {
        if let Some(column) = channel {
            self.require_channel(column)?;
        }

        let rows = match selection {
            DateSelection::All => self.readings().to_vec(),
            DateSelection::Average => self.average_by_time(),
            DateSelection::Date(date) => {
                let rows: Vec<Reading> = self.rows_for_date(date).into_iter().cloned().collect();
                if rows.is_empty() {
                    return Err(QueryError::DateNotFound(date.to_string()));
                }
                rows
            }
        };

        Ok(match channel {
            Some(column) => rows
                .into_iter()
                .map(|mut r| {
                    r.values.retain(|k, _| k == column);
                    r
                })
                .collect(),
            None => rows,
        })
    }

    /// Mean of every channel grouped by time of day
    ///
    /// Each channel is averaged over the rows that have a value for it, and the
    /// resulting rows carry the date label `Average`.
    pub fn average_by_time(&self) -> Vec<Reading> {
        let mut groups: BTreeMap<&str, BTreeMap<&str, (f64, usize)>> = BTreeMap::new();
        for reading in self.readings() {
            let group = groups.entry(reading.time.as_str()).or_default();
            for (column, value) in &reading.values {
                let (sum, count) = group.entry(column.as_str()).or_insert((0.0, 0));
                *sum += value;
                *count += 1;
            }
        }

        groups
            .into_iter()
            .map(|(time, sums)| Reading {
                date: DateKey::new(AVERAGE_DATE_LABEL),
                time: time.to_string(),
                values: sums
                    .into_iter()
                    .map(|(column, (sum, count))| (column.to_string(), sum / count as f64))
                    .collect(),
            })
            .collect()
    }

    pub fn heatmap(&self, column: &str) -> Result<Heatmap, QueryError> {
        self.require_channel(column)?;

        let dates = self.date_keys();
        let times: Vec<String> = self
            .readings()
            .iter()
            .map(|r| r.time.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let date_index: BTreeMap<&DateKey, usize> =
            dates.iter().enumerate().map(|(i, d)| (d, i)).collect();
        let time_index: BTreeMap<&str, usize> = times
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let mut values = vec![vec![None; times.len()]; dates.len()];
        for reading in self.readings() {
            if let (Some(&d), Some(&t)) = (
                date_index.get(&reading.date),
                time_index.get(reading.time.as_str()),
            ) {
                values[d][t] = reading.value(column);
            }
        }

        Ok(Heatmap {
            channel: column.to_string(),
            dates,
            times,
            values,
        })
    }
}
