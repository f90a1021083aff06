use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::dataset::reading::base_name;
use crate::dataset::DateKey;
use crate::ingest::{IngestError, RawUpload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetFormat {
    Xlsx,
    Xlsm,
    Xls,
    Ods,
    Csv,
}

impl SpreadsheetFormat {
    pub fn from_filename(filename: &str) -> Option<Self> {
        match extension(filename)?.as_str() {
            "xlsx" => Some(Self::Xlsx),
            "xlsm" => Some(Self::Xlsm),
            "xls" => Some(Self::Xls),
            "ods" => Some(Self::Ods),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// What a top-level upload is, judged by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Spreadsheet(SpreadsheetFormat),
    Archive,
}

impl UploadKind {
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        if let Some(format) = SpreadsheetFormat::from_filename(filename) {
            return Ok(Self::Spreadsheet(format));
        }
        match extension(filename).as_deref() {
            Some("zip") => Ok(Self::Archive),
            _ => Err(IngestError::UnsupportedFileType(filename.to_string())),
        }
    }
}

fn extension(filename: &str) -> Option<String> {
    let base = base_name(filename);
    base.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// A single spreadsheet ready to be normalized and staged
#[derive(Debug, Clone)]
pub struct SpreadsheetEntry {
    /// Base file name, used as the staged file name
    pub filename: String,
    pub date_key: DateKey,
    pub format: SpreadsheetFormat,
    pub bytes: Vec<u8>,
}

impl SpreadsheetEntry {
    pub fn new(filename: &str, format: SpreadsheetFormat, bytes: Vec<u8>) -> Self {
        let filename = base_name(filename).to_string();
        Self {
            date_key: DateKey::from_filename(&filename),
            filename,
            format,
            bytes,
        }
    }
}

/// Turn one upload into the spreadsheets it carries
///
/// A spreadsheet upload yields itself. A zip yields every spreadsheet entry;
/// directories, macOS metadata and any other files are skipped silently.
pub fn unpack(upload: RawUpload) -> Result<Vec<SpreadsheetEntry>, IngestError> {
    match UploadKind::from_filename(&upload.filename)? {
        UploadKind::Spreadsheet(format) => Ok(vec![SpreadsheetEntry::new(
            &upload.filename,
            format,
            upload.bytes,
        )]),
        UploadKind::Archive => unpack_zip(&upload.filename, upload.bytes),
    }
}

fn unpack_zip(archive_name: &str, bytes: Vec<u8>) -> Result<Vec<SpreadsheetEntry>, IngestError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| IngestError::malformed(archive_name, format!("corrupt zip archive: {e}")))?;

    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            IngestError::malformed(archive_name, format!("corrupt zip entry {i}: {e}"))
        })?;

        if file.is_dir() {
            continue;
        }

        let entry_name = file.name().to_string();
        let base = base_name(&entry_name);
        if entry_name.starts_with("__MACOSX/") || base.starts_with("._") || base.is_empty() {
            debug!("Skipping metadata entry {} in {}", entry_name, archive_name);
            continue;
        }

        let Some(format) = SpreadsheetFormat::from_filename(base) else {
            debug!("Skipping non-spreadsheet entry {} in {}", entry_name, archive_name);
            continue;
        };

        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents).map_err(|e| {
            IngestError::malformed(archive_name, format!("failed to read {entry_name}: {e}"))
        })?;

        entries.push(SpreadsheetEntry::new(base, format, contents));
    }

    let mut seen = std::collections::HashSet::new();
    for entry in &entries {
        if !seen.insert((entry.date_key.clone(), entry.filename.clone())) {
            warn!(
                "Archive {} contains {} more than once; the last copy will be staged",
                archive_name, entry.filename
            );
        }
    }

    info!(
        "Extracted {} spreadsheets from {}",
        entries.len(),
        archive_name
    );
    Ok(entries)
}
