use tracing::{debug, info};

use crate::dataset::{DateKey, Reading};
use crate::ingest::{unpack, IngestError, NormalizedSheet, RawUpload, SpreadsheetEntry};

/// A fully validated upload batch, ready to be staged
#[derive(Debug, Clone, Default)]
pub struct PreparedBatch {
    /// Spreadsheets in submission order
    pub entries: Vec<SpreadsheetEntry>,
    /// Readings of each entry; `readings[i]` belongs to `entries[i]`
    pub readings: Vec<Vec<Reading>>,
}

impl PreparedBatch {
    pub fn push(&mut self, entry: SpreadsheetEntry, readings: Vec<Reading>) {
        self.entries.push(entry);
        self.readings.push(readings);
    }

    pub fn extend(&mut self, other: PreparedBatch) {
        self.entries.extend(other.entries);
        self.readings.extend(other.readings);
    }

    /// Total readings parsed across all entries
    pub fn row_count(&self) -> usize {
        self.readings.iter().map(Vec::len).sum()
    }

    pub fn date_keys(&self) -> Vec<DateKey> {
        let mut keys: Vec<DateKey> = self.entries.iter().map(|e| e.date_key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Unpack and normalize every upload before anything touches the disk
///
/// Uploads are processed in submission order. The first failure aborts the
/// whole batch, so either every spreadsheet is usable or none is staged.
pub fn prepare_batch(uploads: Vec<RawUpload>) -> Result<PreparedBatch, IngestError> {
    if uploads.is_empty() {
        return Err(IngestError::malformed("<upload>", "no files submitted"));
    }

    let mut batch = PreparedBatch::default();
    for upload in uploads {
        let filename = upload.filename.clone();
        let entries = unpack(upload)?;
        debug!("{} yielded {} spreadsheets", filename, entries.len());

        for entry in entries {
            let sheet = NormalizedSheet::parse(&entry)?;
            let readings = sheet.readings().collect();
            batch.push(entry, readings);
        }
    }

    info!(
        "Prepared batch of {} spreadsheets with {} readings",
        batch.entries.len(),
        batch.row_count()
    );
    Ok(batch)
}
