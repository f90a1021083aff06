// Shared fixtures for integration tests: in-memory spreadsheets, zips and
// services wired to a scratch staging directory
#![allow(dead_code)]

use energy_usage_service::channels::{ChannelKind, ChannelRegistry, MeterChannel};
use energy_usage_service::dataset::{DedupePolicy, RefreshMode};
use energy_usage_service::ingest::{StagingArea, UploadFile};
use energy_usage_service::services::IngestService;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use zip::write::SimpleFileOptions;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Build an `.xlsx` with a header row and one row per `(time, values)`
///
/// A `None` value leaves the cell empty.
pub fn xlsx(header: &[&str], rows: &[(&str, &[Option<f64>])]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (col, name) in header.iter().enumerate() {
        worksheet.write_string(0, col as u16, *name).unwrap();
    }
    for (r, (time, values)) in rows.iter().enumerate() {
        let row = (r + 1) as u32;
        worksheet.write_string(row, 0, *time).unwrap();
        for (c, value) in values.iter().enumerate() {
            if let Some(value) = value {
                worksheet.write_number(row, (c + 1) as u16, *value).unwrap();
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().unwrap()
}

/// Single-channel sheet: `Time | <column>`
pub fn meter_sheet(column: &str, rows: &[(&str, f64)]) -> Vec<u8> {
    let rows: Vec<(&str, Vec<Option<f64>>)> =
        rows.iter().map(|(t, v)| (*t, vec![Some(*v)])).collect();
    let rows: Vec<(&str, &[Option<f64>])> =
        rows.iter().map(|(t, v)| (*t, v.as_slice())).collect();
    xlsx(&["Time", column], &rows)
}

pub fn zip_of(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn xlsx_upload(name: &str, bytes: &[u8]) -> UploadFile {
    UploadFile::encode(name, XLSX_MIME, bytes)
}

pub fn zip_upload(name: &str, bytes: &[u8]) -> UploadFile {
    UploadFile::encode(name, "application/zip", bytes)
}

pub fn meter(column: &str, label: &str, kind: ChannelKind, pulse_ratio: f64) -> MeterChannel {
    MeterChannel {
        column: column.to_string(),
        label: label.to_string(),
        unit: "kWh".to_string(),
        kind,
        pulse_ratio,
        cost_per_unit: 0.0,
        carbon_per_unit: 0.0,
    }
}

/// `E` (electricity) with ratio 0.1, as used by the end-to-end scenario
pub fn test_channels() -> Arc<ChannelRegistry> {
    let mut electricity = meter("E", "Electricity", ChannelKind::Electricity, 0.1);
    electricity.cost_per_unit = 0.25;
    electricity.carbon_per_unit = 0.2;
    Arc::new(ChannelRegistry::new(vec![electricity], None).unwrap())
}

pub fn ingest_service(
    staging_dir: &Path,
    policy: DedupePolicy,
    refresh_mode: RefreshMode,
) -> IngestService {
    IngestService::new(
        StagingArea::new(staging_dir),
        test_channels(),
        policy,
        refresh_mode,
    )
}
