use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::channels::{ChannelKind, ChannelRegistry};
use crate::dataset::scaling::round3;
use crate::dataset::{Dataset, DateKey, DateSelection, Heatmap, QueryError, Reading};
use crate::services::IngestService;

/// Channel selector meaning "every channel, summed per row"
pub const ALL_CHANNELS: &str = "all";
pub const TOTAL_USAGE_LABEL: &str = "Total Usage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStatistics {
    pub channel: String,
    pub label: String,
    /// Date with the highest daily total
    pub highest_date: DateKey,
    pub highest_daily_total: f64,
    /// Time and value of the largest single reading on `highest_date`
    pub peak_time: String,
    pub peak_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelCost {
    pub column: String,
    pub label: String,
    pub consumption: f64,
    pub cost: f64,
    pub carbon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub channels: Vec<ChannelCost>,
    pub total_cost: f64,
    pub total_carbon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub column: String,
    pub label: String,
    pub unit: String,
    pub kind: ChannelKind,
    pub pulse_ratio: f64,
    /// Whether the current dataset has any value for this column
    pub present: bool,
}

/// Read-only queries over the current dataset for the dashboard
#[derive(Clone)]
pub struct InsightService {
    ingest: IngestService,
}

impl InsightService {
    pub fn new(ingest: IngestService) -> Self {
        Self { ingest }
    }

    pub async fn dates(&self) -> Vec<DateKey> {
        self.ingest.snapshot().await.scaled.date_keys()
    }

    #[instrument(skip(self))]
    pub async fn dataset_view(
        &self,
        selection: &DateSelection,
        channel: Option<&str>,
    ) -> Result<Vec<Reading>, QueryError> {
        self.ingest.snapshot().await.scaled.view(selection, channel)
    }

    #[instrument(skip(self))]
    pub async fn heatmap(&self, channel: &str) -> Result<Heatmap, QueryError> {
        self.ingest.snapshot().await.scaled.heatmap(channel)
    }

    #[instrument(skip(self))]
    pub async fn statistics(&self, channel: &str) -> Result<UsageStatistics, QueryError> {
        let snapshot = self.ingest.snapshot().await;
        usage_statistics(&snapshot.scaled, self.ingest.channels(), channel)
    }

    /// Cost and carbon over an optional inclusive date range
    #[instrument(skip(self))]
    pub async fn costs(
        &self,
        channel: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<CostReport, QueryError> {
        let snapshot = self.ingest.snapshot().await;
        cost_report(&snapshot.energy, self.ingest.channels(), channel, start, end)
    }

    /// Cost and carbon of every channel over the whole dataset
    pub async fn cost_summary(&self) -> Result<CostReport, QueryError> {
        self.costs(None, None, None).await
    }

    pub async fn channel_listing(&self) -> Vec<ChannelInfo> {
        let snapshot = self.ingest.snapshot().await;
        let present = snapshot.raw.columns();

        self.ingest
            .channels()
            .channels()
            .iter()
            .map(|c| ChannelInfo {
                column: c.column.clone(),
                label: c.label.clone(),
                unit: c.unit.clone(),
                kind: c.kind,
                pulse_ratio: c.pulse_ratio,
                present: present.contains(c.column.as_str()),
            })
            .collect()
    }
}

/// Highest-usage day and the peak reading within it
///
/// `channel` is a column name or [`ALL_CHANNELS`], in which case each row
/// contributes the sum of all of its channel values.
pub fn usage_statistics<S>(
    dataset: &Dataset<S>,
    channels: &ChannelRegistry,
    channel: &str,
) -> Result<UsageStatistics, QueryError> {
    let all = channel == ALL_CHANNELS;
    if !all {
        dataset.require_channel(channel)?;
    }
    let value_of = |r: &Reading| if all { Some(r.total()) } else { r.value(channel) };

    // Dataset rows are sorted, so each date is one contiguous run
    let mut daily: Vec<(&DateKey, f64)> = Vec::new();
    for reading in dataset.readings() {
        let Some(value) = value_of(reading) else {
            continue;
        };
        if let Some((date, total)) = daily.last_mut() {
            if *date == &reading.date {
                *total += value;
                continue;
            }
        }
        daily.push((&reading.date, value));
    }

    let mut highest: Option<(&DateKey, f64)> = None;
    for (date, total) in daily {
        if highest.map_or(true, |(_, best)| total > best) {
            highest = Some((date, total));
        }
    }
    let (highest_date, highest_total) = highest.ok_or(QueryError::NoData)?;

    let mut peak: Option<(&str, f64)> = None;
    for reading in dataset.rows_for_date(highest_date) {
        if let Some(value) = value_of(reading) {
            if peak.map_or(true, |(_, best)| value > best) {
                peak = Some((reading.time.as_str(), value));
            }
        }
    }
    let (peak_time, peak_value) = peak.ok_or(QueryError::NoData)?;

    debug!(
        "Highest usage for {} on {} ({:.3})",
        channel, highest_date, highest_total
    );

    Ok(UsageStatistics {
        channel: channel.to_string(),
        label: if all {
            TOTAL_USAGE_LABEL.to_string()
        } else {
            channels.label_for(channel).to_string()
        },
        highest_date: highest_date.clone(),
        highest_daily_total: round3(highest_total),
        peak_time: peak_time.to_string(),
        peak_value: round3(peak_value),
    })
}

/// Consumption, cost and carbon per configured channel
///
/// When a range is given, only rows whose date key is an ISO date inside the
/// inclusive range are counted.
pub fn cost_report<S>(
    dataset: &Dataset<S>,
    channels: &ChannelRegistry,
    channel: Option<&str>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<CostReport, QueryError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(QueryError::InvalidRange(format!("{s} is after {e}")));
        }
    }

    let selected: Vec<_> = match channel {
        None | Some(ALL_CHANNELS) => channels
            .channels()
            .iter()
            .filter(|c| dataset.has_column(&c.column))
            .collect(),
        Some(column) => {
            dataset.require_channel(column)?;
            let meter = channels
                .get(column)
                .ok_or_else(|| QueryError::ChannelNotFound(column.to_string()))?;
            vec![meter]
        }
    };

    let ranged = start.is_some() || end.is_some();
    let in_range = |date: &DateKey| {
        if !ranged {
            return true;
        }
        match date.as_date() {
            Some(d) => start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e),
            None => false,
        }
    };

    let rows: Vec<&Reading> = dataset
        .readings()
        .iter()
        .filter(|r| in_range(&r.date))
        .collect();

    let mut costs = Vec::with_capacity(selected.len());
    for meter in selected {
        let consumption: f64 = rows.iter().filter_map(|r| r.value(&meter.column)).sum();
        costs.push(ChannelCost {
            column: meter.column.clone(),
            label: meter.label.clone(),
            consumption: round3(consumption),
            cost: round3(consumption * meter.cost_per_unit),
            carbon: round3(consumption * meter.carbon_per_unit),
        });
    }

    let total_cost = round3(costs.iter().map(|c| c.cost).sum());
    let total_carbon = round3(costs.iter().map(|c| c.carbon).sum());
    Ok(CostReport {
        start,
        end,
        channels: costs,
        total_cost,
        total_carbon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MeterChannel;
    use crate::dataset::{DedupePolicy, RawDataset};

    fn meter(column: &str, label: &str, cost: f64, carbon: f64) -> MeterChannel {
        MeterChannel {
            column: column.to_string(),
            label: label.to_string(),
            unit: "kWh".to_string(),
            kind: ChannelKind::Electricity,
            pulse_ratio: 1.0,
            cost_per_unit: cost,
            carbon_per_unit: carbon,
        }
    }

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(
            vec![
                meter("E", "Electricity", 0.5, 0.25),
                meter("W", "Water", 2.0, 0.0),
            ],
            None,
        )
        .unwrap()
    }

    fn row(date: &str, time: &str, e: f64) -> Reading {
        Reading::new(DateKey::new(date), time).with_value("E", e)
    }

    fn sample() -> RawDataset {
        RawDataset::from_rows(
            vec![
                row("2025-01-01", "00:00", 2.0),
                row("2025-01-01", "00:30", 3.0),
                row("2025-01-02", "00:00", 4.0).with_value("W", 1.0),
                row("2025-01-02", "00:30", 0.5),
                row("Unknown", "00:00", 8.0),
            ],
            DedupePolicy::KeepFirst,
        )
    }

    #[test]
    fn test_statistics_for_one_channel() {
        let stats = usage_statistics(&sample(), &registry(), "E").unwrap();

        assert_eq!(stats.label, "Electricity");
        assert_eq!(stats.highest_date, DateKey::new("Unknown"));
        assert_eq!(stats.highest_daily_total, 8.0);
        assert_eq!(stats.peak_time, "00:00");
    }

    #[test]
    fn test_statistics_for_all_channels() {
        let dataset = RawDataset::from_rows(
            vec![
                row("2025-01-01", "00:00", 2.0),
                row("2025-01-01", "00:30", 3.0),
                row("2025-01-02", "00:00", 4.0).with_value("W", 1.5),
                row("2025-01-02", "00:30", 0.5),
            ],
            DedupePolicy::KeepFirst,
        );
        let stats = usage_statistics(&dataset, &registry(), ALL_CHANNELS).unwrap();

        assert_eq!(stats.label, TOTAL_USAGE_LABEL);
        assert_eq!(stats.highest_date, DateKey::new("2025-01-02"));
        assert_eq!(stats.highest_daily_total, 6.0);
        assert_eq!(stats.peak_value, 5.5);
    }

    #[test]
    fn test_statistics_errors() {
        assert_eq!(
            usage_statistics(&sample(), &registry(), "G"),
            Err(QueryError::ChannelNotFound("G".to_string()))
        );
        assert_eq!(
            usage_statistics(&RawDataset::empty(), &registry(), ALL_CHANNELS),
            Err(QueryError::NoData)
        );
    }

    #[test]
    fn test_cost_report_whole_dataset() {
        let report = cost_report(&sample(), &registry(), None, None, None).unwrap();

        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.channels[0].consumption, 17.5);
        assert_eq!(report.channels[0].cost, 8.75);
        assert_eq!(report.channels[1].cost, 2.0);
        assert_eq!(report.total_cost, 10.75);
        assert_eq!(report.total_carbon, 4.375);
    }

    #[test]
    fn test_cost_report_date_range_excludes_non_dates() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 2);
        let report = cost_report(&sample(), &registry(), Some("E"), start, None).unwrap();

        assert_eq!(report.channels.len(), 1);
        assert_eq!(report.channels[0].consumption, 4.5);
        assert_eq!(report.total_cost, 2.25);
    }

    #[test]
    fn test_cost_report_invalid_range() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 3);
        let end = NaiveDate::from_ymd_opt(2025, 1, 1);
        assert!(matches!(
            cost_report(&sample(), &registry(), None, start, end),
            Err(QueryError::InvalidRange(_))
        ));
    }
}
