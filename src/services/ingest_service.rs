use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::channels::ChannelRegistry;
use crate::dataset::{
    DateKey, DedupePolicy, EnergyDataset, RawDataset, RefreshMode, ScaledDataset,
};
use crate::ingest::{
    combine_staged, prepare_batch, IngestError, RawUpload, StagedReadings, StagingArea,
    UploadFile,
};

/// The current dataset in each of its conversion states
#[derive(Debug, Clone, Default)]
pub struct DatasetSnapshot {
    pub raw: RawDataset,
    pub scaled: ScaledDataset,
    pub energy: EnergyDataset,
}

impl DatasetSnapshot {
    /// Scale a raw dataset once and derive the energy view from it
    pub fn build(raw: RawDataset, channels: &ChannelRegistry) -> Self {
        let scaled = raw.clone().scale(channels.pulse_ratios());
        let energy = scaled.clone().to_energy(channels);
        Self {
            raw,
            scaled,
            energy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub files_staged: usize,
    pub rows_parsed: usize,
    pub dataset_rows: usize,
    pub dates: Vec<DateKey>,
}

/// Owns the staging directory and the in-memory dataset built from it
///
/// The per-file readings behind the current dataset are cached under the
/// write lock. A full reload re-reads them from disk, an incremental upload
/// patches the cache with the new batch; both merge in staged-path order, so
/// they publish the same dataset.
#[derive(Clone)]
pub struct IngestService {
    staging: StagingArea,
    channels: Arc<ChannelRegistry>,
    policy: DedupePolicy,
    refresh_mode: RefreshMode,
    current: Arc<RwLock<Arc<DatasetSnapshot>>>,
    staged: Arc<Mutex<Option<StagedReadings>>>,
}

impl IngestService {
    pub fn new(
        staging: StagingArea,
        channels: Arc<ChannelRegistry>,
        policy: DedupePolicy,
        refresh_mode: RefreshMode,
    ) -> Self {
        Self {
            staging,
            channels,
            policy,
            refresh_mode,
            current: Arc::new(RwLock::new(Arc::new(DatasetSnapshot::default()))),
            staged: Arc::new(Mutex::new(None)),
        }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub async fn snapshot(&self) -> Arc<DatasetSnapshot> {
        self.current.read().await.clone()
    }

    /// Accept a batch of uploaded files
    ///
    /// The batch is decoded, unpacked and normalized in full before anything
    /// is staged; any failure rejects the whole batch and leaves both the
    /// staging directory and the current dataset unchanged.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn upload(&self, files: Vec<UploadFile>) -> Result<UploadSummary, IngestError> {
        let start_time = Instant::now();
        let mut cache = self.staged.lock().await;

        let staging = self.staging.clone();
        let (staged, batch) = tokio::task::spawn_blocking(move || {
            let uploads = files
                .iter()
                .map(UploadFile::decode)
                .collect::<Result<Vec<RawUpload>, IngestError>>()?;
            let batch = prepare_batch(uploads)?;
            let staged = staging.stage(&batch.entries)?;
            Ok::<_, IngestError>((staged, batch))
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;
        let rows_parsed = batch.row_count();

        let files = match (self.refresh_mode, cache.take()) {
            (RefreshMode::Incremental, Some(mut files)) => {
                // Same path twice in one batch: the later entry is the one on disk
                for (entry, readings) in batch.entries.iter().zip(batch.readings) {
                    files.insert(self.staging.path_for(entry), readings);
                }
                debug!("Patched {} staged files in memory", batch.entries.len());
                files
            }
            _ => self.load_staged().await?,
        };
        let snapshot = self.publish(files, &mut cache).await?;

        let summary = UploadSummary {
            files_staged: staged.len(),
            rows_parsed,
            dataset_rows: snapshot.scaled.len(),
            dates: snapshot.scaled.date_keys(),
        };
        info!(
            "Upload staged {} files ({} rows parsed), dataset now has {} rows, took {:?}",
            summary.files_staged,
            summary.rows_parsed,
            summary.dataset_rows,
            start_time.elapsed()
        );
        Ok(summary)
    }

    /// Rebuild the dataset from everything in the staging directory
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<UploadSummary, IngestError> {
        let mut cache = self.staged.lock().await;
        let files = self.load_staged().await?;
        let rows_parsed: usize = files.values().map(Vec::len).sum();
        let snapshot = self.publish(files, &mut cache).await?;

        info!("Reloaded dataset with {} rows", snapshot.scaled.len());
        Ok(UploadSummary {
            files_staged: 0,
            rows_parsed,
            dataset_rows: snapshot.scaled.len(),
            dates: snapshot.scaled.date_keys(),
        })
    }

    async fn load_staged(&self) -> Result<StagedReadings, IngestError> {
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || staging.load_files())
            .await
            .map_err(|e| IngestError::Task(e.to_string()))?
    }

    /// Merge, scale and swap in a new snapshot, keeping `files` as the cache
    async fn publish(
        &self,
        files: StagedReadings,
        cache: &mut Option<StagedReadings>,
    ) -> Result<Arc<DatasetSnapshot>, IngestError> {
        let channels = self.channels.clone();
        let policy = self.policy;
        let (snapshot, files) = tokio::task::spawn_blocking(move || {
            let raw = combine_staged(&files, policy);
            (DatasetSnapshot::build(raw, &channels), files)
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))?;

        *cache = Some(files);
        let snapshot = Arc::new(snapshot);
        *self.current.write().await = snapshot.clone();
        debug!(
            "Published dataset snapshot with {} rows",
            snapshot.scaled.len()
        );
        Ok(snapshot)
    }
}
