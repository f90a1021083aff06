use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::dataset::{DateKey, DateSelection, DedupePolicy, RawDataset, Reading};
use crate::ingest::{IngestError, NormalizedSheet, SpreadsheetEntry, SpreadsheetFormat};

/// On-disk store of every accepted spreadsheet, laid out as
/// `<root>/<date key>/<file name>`
///
/// The directory is the source of truth: the in-memory dataset can always be
/// rebuilt from it with [`StagingArea::load_all`]. All methods do blocking
/// file I/O.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, entry: &SpreadsheetEntry) -> PathBuf {
        self.root
            .join(entry.date_key.as_str())
            .join(&entry.filename)
    }

    /// Write a batch of spreadsheets into the staging directory
    ///
    /// Every entry is written to a temporary directory inside the root first
    /// and only then renamed into place. If any rename fails, the files
    /// already moved are taken back out and any copies they replaced are
    /// restored, so a failed batch leaves the staged set untouched. An
    /// existing file with the same date key and name is replaced.
    pub fn stage(&self, entries: &[SpreadsheetEntry]) -> Result<Vec<PathBuf>, IngestError> {
        for entry in entries {
            check_component(&entry.filename, entry.date_key.as_str())?;
            check_component(&entry.filename, &entry.filename)?;
            if DateSelection::is_reserved(entry.date_key.as_str()) {
                return Err(IngestError::malformed(
                    &entry.filename,
                    format!("'{}' is reserved and cannot be a date key", entry.date_key),
                ));
            }
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.root).map_err(|e| IngestError::io(&self.root, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .map_err(|e| IngestError::io(&self.root, e))?;

        let mut written = Vec::with_capacity(entries.len());
        for entry in entries {
            let dir = scratch.path().join(entry.date_key.as_str());
            fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;
            let path = dir.join(&entry.filename);
            fs::write(&path, &entry.bytes).map_err(|e| IngestError::io(&path, e))?;
            written.push((path, self.path_for(entry)));
        }

        let backups = scratch.path().join(".replaced");
        fs::create_dir_all(&backups).map_err(|e| IngestError::io(&backups, e))?;

        let mut placed: Vec<Placed> = Vec::with_capacity(written.len());
        for (index, (temp_path, final_path)) in written.into_iter().enumerate() {
            // Several entries in one batch may target the same path; the last one wins
            if !temp_path.exists() {
                continue;
            }
            match place(&temp_path, &final_path, &backups.join(index.to_string())) {
                Ok(done) => {
                    debug!("Staged {}", final_path.display());
                    placed.push(done);
                }
                Err(e) => {
                    warn!(
                        "Staging {} failed, rolling back {} files",
                        final_path.display(),
                        placed.len()
                    );
                    roll_back(&placed);
                    return Err(e);
                }
            }
        }

        info!(
            "Staged {} files under {}",
            placed.len(),
            self.root.display()
        );
        Ok(placed.into_iter().map(|p| p.path).collect())
    }

    /// Every staged spreadsheet, sorted by path
    ///
    /// Hidden files and directories (including leftover temporary staging
    /// directories) are ignored. A missing root yields an empty list.
    pub fn staged_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();
        if self.root.is_dir() {
            collect_files(&self.root, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    /// Parse every staged file, keyed by its staged path
    ///
    /// This is the bulk recovery path: a file that cannot be read or parsed is
    /// logged and skipped instead of failing the whole scan.
    pub fn load_files(&self) -> Result<StagedReadings, IngestError> {
        let files = self.staged_files()?;
        let mut staged = StagedReadings::new();

        for path in files {
            match read_staged_file(&path) {
                Ok(readings) => {
                    staged.insert(path, readings);
                }
                Err(e) => warn!("Skipping staged file {}: {}", path.display(), e),
            }
        }

        info!(
            "Read {} staged files with {} readings",
            staged.len(),
            staged.values().map(Vec::len).sum::<usize>()
        );
        Ok(staged)
    }

    /// Rebuild the raw dataset from every staged file
    pub fn load_all(&self, policy: DedupePolicy) -> Result<RawDataset, IngestError> {
        let staged = self.load_files()?;
        let dataset = combine_staged(&staged, policy);
        info!("Reloaded {} rows from {}", dataset.len(), self.root.display());
        Ok(dataset)
    }
}

/// Readings of each staged file, keyed by staged path
///
/// Iteration follows path order, which is the order rows are merged in.
pub type StagedReadings = BTreeMap<PathBuf, Vec<Reading>>;

/// Merge staged files into one dataset, in path order
///
/// Ties on `(Date, Time)` are broken by staged path, however the files
/// arrived.
pub fn combine_staged(staged: &StagedReadings, policy: DedupePolicy) -> RawDataset {
    let rows: Vec<Reading> = staged.values().flatten().cloned().collect();
    RawDataset::from_rows(rows, policy)
}

/// A file moved into the staging directory, and where the copy it
/// replaced was parked
struct Placed {
    path: PathBuf,
    replaced: Option<PathBuf>,
}

fn place(temp_path: &Path, final_path: &Path, backup: &Path) -> Result<Placed, IngestError> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
    }

    let replaced = if final_path.is_file() {
        fs::rename(final_path, backup).map_err(|e| IngestError::io(final_path, e))?;
        Some(backup.to_path_buf())
    } else {
        None
    };

    if let Err(e) = fs::rename(temp_path, final_path) {
        if let Some(backup) = &replaced {
            if let Err(restore) = fs::rename(backup, final_path) {
                warn!("Failed to restore {}: {}", final_path.display(), restore);
            }
        }
        return Err(IngestError::io(final_path, e));
    }

    Ok(Placed {
        path: final_path.to_path_buf(),
        replaced,
    })
}

fn roll_back(placed: &[Placed]) {
    for file in placed.iter().rev() {
        let undone = match &file.replaced {
            Some(backup) => fs::rename(backup, &file.path),
            None => fs::remove_file(&file.path),
        };
        if let Err(e) = undone {
            warn!("Failed to roll back {}: {}", file.path.display(), e);
        }
    }
}

fn read_staged_file(path: &Path) -> Result<Vec<Reading>, IngestError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IngestError::malformed(path.display().to_string(), "invalid file name"))?;
    let format = SpreadsheetFormat::from_filename(filename)
        .ok_or_else(|| IngestError::UnsupportedFileType(filename.to_string()))?;
    let bytes = fs::read(path).map_err(|e| IngestError::io(path, e))?;

    let sheet =
        NormalizedSheet::parse_bytes(filename, DateKey::from_filename(filename), format, &bytes)?;
    Ok(sheet.readings().collect())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), IngestError> {
    let entries = fs::read_dir(dir).map_err(|e| IngestError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::io(dir, e))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Reject anything that is not a plain, visible, single path component
fn check_component(file: &str, component: &str) -> Result<(), IngestError> {
    let unsafe_component = component.is_empty()
        || component.starts_with('.')
        || component.contains(['/', '\\', '\0']);
    if unsafe_component {
        return Err(IngestError::malformed(
            file,
            format!("'{component}' cannot be used as a staging path component"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn csv_entry(name: &str, body: &str) -> SpreadsheetEntry {
        SpreadsheetEntry::new(name, SpreadsheetFormat::Csv, body.as_bytes().to_vec())
    }

    #[test]
    fn test_stage_lays_out_by_date_key() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());

        let staged = staging
            .stage(&[
                csv_entry("2025-01-01_a.csv", "Time,E\n00:00,1\n"),
                csv_entry("meter.csv", "Time,E\n00:00,2\n"),
            ])
            .unwrap();

        assert_eq!(staged.len(), 2);
        assert!(dir.path().join("2025-01-01").join("2025-01-01_a.csv").is_file());
        assert!(dir.path().join("Unknown").join("meter.csv").is_file());
        assert_eq!(staging.staged_files().unwrap().len(), 2);
    }

    #[test]
    fn test_restage_replaces_file() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());

        staging
            .stage(&[csv_entry("2025-01-01_a.csv", "Time,E\n00:00,1\n")])
            .unwrap();
        staging
            .stage(&[csv_entry("2025-01-01_a.csv", "Time,E\n00:00,9\n")])
            .unwrap();

        let contents =
            fs::read_to_string(dir.path().join("2025-01-01").join("2025-01-01_a.csv")).unwrap();
        assert_eq!(contents, "Time,E\n00:00,9\n");
        assert_eq!(staging.staged_files().unwrap().len(), 1);
    }

    #[test]
    fn test_unsafe_date_key_stages_nothing() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());

        let result = staging.stage(&[
            csv_entry("2025-01-01_a.csv", "Time,E\n00:00,1\n"),
            csv_entry(".._b.csv", "Time,E\n00:00,1\n"),
        ]);

        assert!(matches!(result, Err(IngestError::MalformedInput { .. })));
        assert!(staging.staged_files().unwrap().is_empty());
    }

    #[test]
    fn test_failed_rename_rolls_back_batch() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());
        staging
            .stage(&[csv_entry("2025-01-01_a.csv", "Time,E\n00:00,1\n")])
            .unwrap();
        // A directory squatting on the target path makes the second rename fail
        fs::create_dir_all(dir.path().join("2025-01-02").join("2025-01-02_a.csv")).unwrap();

        let result = staging.stage(&[
            csv_entry("2025-01-01_a.csv", "Time,E\n00:00,9\n"),
            csv_entry("2025-01-01_b.csv", "Time,E\n00:30,9\n"),
            csv_entry("2025-01-02_a.csv", "Time,E\n00:00,2\n"),
        ]);

        assert!(matches!(result, Err(IngestError::Io { .. })));
        let contents =
            fs::read_to_string(dir.path().join("2025-01-01").join("2025-01-01_a.csv")).unwrap();
        assert_eq!(contents, "Time,E\n00:00,1\n");
        assert!(!dir.path().join("2025-01-01").join("2025-01-01_b.csv").exists());
        assert_eq!(
            staging.staged_files().unwrap(),
            vec![dir.path().join("2025-01-01").join("2025-01-01_a.csv")]
        );
    }

    #[test]
    fn test_reserved_date_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());

        for name in ["all_meter.csv", "average_meter.csv"] {
            let result = staging.stage(&[csv_entry(name, "Time,E\n00:00,1\n")]);
            assert!(matches!(result, Err(IngestError::MalformedInput { .. })));
        }
        assert!(staging.staged_files().unwrap().is_empty());
    }

    #[test]
    fn test_combine_staged_breaks_ties_by_path() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());
        staging
            .stage(&[csv_entry("2025-01-01_b.csv", "Time,E\n00:00,50\n")])
            .unwrap();
        staging
            .stage(&[csv_entry("2025-01-01_a.csv", "Time,E\n00:00,10\n")])
            .unwrap();

        let files = staging.load_files().unwrap();
        assert_eq!(files.len(), 2);
        let dataset = combine_staged(&files, DedupePolicy::KeepFirst);

        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.readings()[0].value("E"), Some(10.0));
    }

    #[test]
    fn test_load_all_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path());
        staging
            .stage(&[
                csv_entry("2025-01-02_a.csv", "Time,E\n00:00,2\n"),
                csv_entry("2025-01-01_a.csv", "Time,E\n00:00,1\n"),
                csv_entry("2025-01-03_bad.csv", "Clock,E\n00:00,3\n"),
            ])
            .unwrap();
        fs::create_dir_all(dir.path().join(".staging-leftover")).unwrap();
        fs::write(
            dir.path().join(".staging-leftover").join("2025-01-04_x.csv"),
            "Time,E\n00:00,4\n",
        )
        .unwrap();

        let dataset = staging.load_all(DedupePolicy::KeepFirst).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.readings()[0].date.as_str(), "2025-01-01");
        assert_eq!(dataset.readings()[1].value("E"), Some(2.0));
    }

    #[test]
    fn test_load_all_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let staging = StagingArea::new(dir.path().join("does-not-exist"));
        assert!(staging.load_all(DedupePolicy::KeepFirst).unwrap().is_empty());
    }
}
