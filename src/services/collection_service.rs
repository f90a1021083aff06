use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use crate::dataset::{DateKey, DateSelection, QueryError, TIME_COLUMN};
use crate::db::{CollectionRecord, CollectionRepository, DbError, NewCollection, SavedCollection};
use crate::services::IngestService;

/// Trailing CSV export columns, after `Time` and the channel columns
const EXPORT_META_COLUMNS: [&str; 4] = ["energy_type", "date", "input", "saved_at"];

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("Collection already saved for group {group}, channel {channel}, date {date}")]
    Duplicate {
        group: String,
        channel: String,
        date: String,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Export failed: {0}")]
    Export(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveCollectionRequest {
    pub group_name: String,
    pub channel: String,
    pub date: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Saves the values of one channel on one date for later export
#[derive(Clone)]
pub struct CollectionService {
    collection_repo: CollectionRepository,
    ingest: IngestService,
}

impl CollectionService {
    pub fn new(collection_repo: CollectionRepository, ingest: IngestService) -> Self {
        Self {
            collection_repo,
            ingest,
        }
    }

    #[instrument(skip(self), fields(group = %request.group_name, channel = %request.channel, date = %request.date))]
    pub async fn save(
        &self,
        request: SaveCollectionRequest,
    ) -> Result<SavedCollection, CollectionError> {
        let duplicate = || CollectionError::Duplicate {
            group: request.group_name.clone(),
            channel: request.channel.clone(),
            date: request.date.clone(),
        };

        if self
            .collection_repo
            .exists(&request.group_name, &request.channel, &request.date)
            .await?
        {
            warn!("Rejecting duplicate saved collection");
            return Err(duplicate());
        }

        let snapshot = self.ingest.snapshot().await;
        let rows = snapshot.scaled.view(
            &DateSelection::Date(DateKey::new(request.date.as_str())),
            Some(&request.channel),
        )?;
        let values = collection_records(&request.channel, &rows);

        let new_collection = NewCollection {
            group_name: request.group_name.clone(),
            energy_type: request.channel.clone(),
            date: request.date.clone(),
            note: request.note.clone(),
            values,
        };

        // The unique constraint still catches a save racing past the check above
        let saved = match self.collection_repo.insert(&new_collection).await {
            Ok(saved) => saved,
            Err(e) if e.is_unique_violation() => return Err(duplicate()),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Saved {} values for {} on {}",
            saved.values.len(),
            saved.energy_type,
            saved.date
        );
        Ok(saved)
    }

    pub async fn list(&self, group_name: &str) -> Result<Vec<SavedCollection>, CollectionError> {
        Ok(self.collection_repo.find_by_group(group_name).await?)
    }

    #[instrument(skip(self))]
    pub async fn export_csv(&self, group_name: &str) -> Result<String, CollectionError> {
        let collections = self.list(group_name).await?;
        export_csv(&collections)
    }
}

fn collection_records(channel: &str, rows: &[crate::dataset::Reading]) -> Vec<CollectionRecord> {
    rows.iter()
        .map(|r| {
            let mut record = CollectionRecord::new();
            record.insert(TIME_COLUMN.to_string(), Value::from(r.time.clone()));
            record.insert(
                channel.to_string(),
                r.value(channel).map(Value::from).unwrap_or(Value::Null),
            );
            record
        })
        .collect()
}

/// One CSV line per saved record
///
/// Columns are `Time`, every channel column found in the collections, then
/// `energy_type`, `date`, `input` (the note) and `saved_at`.
pub fn export_csv(collections: &[SavedCollection]) -> Result<String, CollectionError> {
    let channel_columns: BTreeSet<&str> = collections
        .iter()
        .flat_map(|c| c.values.iter())
        .flat_map(|record| record.keys().map(String::as_str))
        .filter(|k| *k != TIME_COLUMN && !EXPORT_META_COLUMNS.contains(k))
        .collect();

    let mut header: Vec<&str> = vec![TIME_COLUMN];
    header.extend(channel_columns.iter().copied());
    header.extend(EXPORT_META_COLUMNS);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| CollectionError::Export(e.to_string()))?;

    for collection in collections {
        let saved_at = collection.saved_at.to_rfc3339();
        for record in collection.values.iter() {
            let mut line: Vec<String> = Vec::with_capacity(header.len());
            line.push(record.get(TIME_COLUMN).map(cell_text).unwrap_or_default());
            for column in &channel_columns {
                line.push(record.get(*column).map(cell_text).unwrap_or_default());
            }
            line.push(collection.energy_type.clone());
            line.push(collection.date.clone());
            line.push(collection.note.clone().unwrap_or_default());
            line.push(saved_at.clone());

            writer
                .write_record(&line)
                .map_err(|e| CollectionError::Export(e.to_string()))?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CollectionError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CollectionError::Export(e.to_string()))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
