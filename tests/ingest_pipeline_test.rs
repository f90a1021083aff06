// End-to-end tests of the upload pipeline: decode, unpack, normalize, stage,
// merge and scale, driven through the ingest service

mod common;

use common::*;
use energy_usage_service::dataset::{DateKey, DedupePolicy, RawDataset, Reading, RefreshMode};
use energy_usage_service::ingest::{IngestError, StagingArea};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tempfile::TempDir;

#[tokio::test]
async fn test_zip_upload_end_to_end() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let archive = zip_of(&[
        ("2025-01-02_a.xlsx", meter_sheet("E", &[("00:00", 20.0)])),
        ("2025-01-01_a.xlsx", meter_sheet("E", &[("00:00", 10.0)])),
    ]);
    let summary = service
        .upload(vec![zip_upload("export.zip", &archive)])
        .await
        .unwrap();

    assert_eq!(summary.files_staged, 2);
    assert_eq!(summary.dataset_rows, 2);

    let snapshot = service.snapshot().await;
    let rows = snapshot.scaled.readings();
    assert_eq!(rows[0].date.as_str(), "2025-01-01");
    assert_eq!(rows[0].time, "00:00");
    assert_eq!(rows[0].value("E"), Some(1.0));
    assert_eq!(rows[1].date.as_str(), "2025-01-02");
    assert_eq!(rows[1].value("E"), Some(2.0));

    assert!(dir.path().join("2025-01-01").join("2025-01-01_a.xlsx").is_file());
    assert!(dir.path().join("2025-01-02").join("2025-01-02_a.xlsx").is_file());
}

#[tokio::test]
async fn test_missing_time_column_rejects_batch() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let values: &[Option<f64>] = &[Some(10.0)];
    let no_time = xlsx(&["Clock", "E"], &[("00:00", values)]);
    let result = service
        .upload(vec![
            xlsx_upload("2025-01-01_a.xlsx", &meter_sheet("E", &[("00:00", 10.0)])),
            xlsx_upload("2025-01-02_a.xlsx", &no_time),
        ])
        .await;

    assert!(matches!(result, Err(IngestError::SchemaViolation { .. })));
    assert!(service.snapshot().await.scaled.is_empty());
    assert!(service.staging().staged_files().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_and_malformed_uploads() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let result = service
        .upload(vec![xlsx_upload("notes.txt", b"hello")])
        .await;
    assert!(matches!(result, Err(IngestError::UnsupportedFileType(_))));

    let result = service
        .upload(vec![xlsx_upload("2025-01-01_a.xlsx", b"not really a workbook")])
        .await;
    assert!(matches!(result, Err(IngestError::MalformedInput { .. })));

    let result = service
        .upload(vec![zip_upload("export.zip", b"not really a zip")])
        .await;
    assert!(matches!(result, Err(IngestError::MalformedInput { .. })));

    assert!(service.staging().staged_files().unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_entry_in_zip_stages_nothing() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let archive = zip_of(&[
        ("2025-01-01_a.xlsx", meter_sheet("E", &[("00:00", 10.0)])),
        ("2025-01-02_a.xlsx", b"garbage".to_vec()),
    ]);
    let result = service.upload(vec![zip_upload("export.zip", &archive)]).await;

    assert!(matches!(result, Err(IngestError::MalformedInput { .. })));
    assert!(service.staging().staged_files().unwrap().is_empty());
}

#[tokio::test]
async fn test_zip_ignores_non_spreadsheets() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let archive = zip_of(&[
        ("readme.txt", b"meter export".to_vec()),
        ("__MACOSX/._2025-01-01_a.xlsx", b"\0".to_vec()),
        ("exports/meter.xlsx", meter_sheet("E", &[("00:00", 30.0)])),
    ]);
    let summary = service
        .upload(vec![zip_upload("export.zip", &archive)])
        .await
        .unwrap();

    assert_eq!(summary.files_staged, 1);
    assert_eq!(summary.dates, vec![DateKey::unknown()]);
    assert!(dir.path().join("Unknown").join("meter.xlsx").is_file());
}

#[tokio::test]
async fn test_reupload_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::Incremental);
    let batch = vec![
        xlsx_upload(
            "2025-01-01_a.xlsx",
            &meter_sheet("E", &[("00:00", 10.0), ("00:30", 12.0)]),
        ),
        xlsx_upload("2025-01-02_a.xlsx", &meter_sheet("E", &[("00:00", 20.0)])),
    ];

    service.upload(batch.clone()).await.unwrap();
    let once = service.snapshot().await.scaled.clone();
    service.upload(batch).await.unwrap();
    let twice = service.snapshot().await.scaled.clone();

    assert_eq!(once.len(), 3);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_duplicate_key_keeps_existing_value() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    service
        .upload(vec![xlsx_upload(
            "2025-01-01_a.xlsx",
            &meter_sheet("E", &[("00:00", 10.0)]),
        )])
        .await
        .unwrap();
    service
        .upload(vec![xlsx_upload(
            "2025-01-01_b.xlsx",
            &meter_sheet("E", &[("00:00", 50.0)]),
        )])
        .await
        .unwrap();

    let snapshot = service.snapshot().await;
    assert_eq!(snapshot.scaled.len(), 1);
    assert_eq!(snapshot.scaled.readings()[0].value("E"), Some(1.0));
}

#[tokio::test]
async fn test_keep_last_policy_overwrites() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepLast, RefreshMode::Incremental);

    service
        .upload(vec![xlsx_upload(
            "2025-01-01_a.xlsx",
            &meter_sheet("E", &[("00:00", 10.0)]),
        )])
        .await
        .unwrap();
    service
        .upload(vec![xlsx_upload(
            "2025-01-01_b.xlsx",
            &meter_sheet("E", &[("00:00", 50.0)]),
        )])
        .await
        .unwrap();

    let snapshot = service.snapshot().await;
    assert_eq!(snapshot.scaled.readings()[0].value("E"), Some(5.0));
}

#[tokio::test]
async fn test_refresh_modes_agree_on_duplicate_zip_entries() {
    let full_dir = TempDir::new().unwrap();
    let incr_dir = TempDir::new().unwrap();
    let full = ingest_service(full_dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);
    let incremental =
        ingest_service(incr_dir.path(), DedupePolicy::KeepFirst, RefreshMode::Incremental);

    // Both entries stage to the same path, so only the later one survives
    let archive = zip_of(&[
        ("march/2025-01-01_a.xlsx", meter_sheet("E", &[("00:00", 10.0)])),
        ("april/2025-01-01_a.xlsx", meter_sheet("E", &[("00:00", 40.0)])),
    ]);
    for service in [&full, &incremental] {
        service
            .upload(vec![
                xlsx_upload("2025-01-01_b.xlsx", &meter_sheet("E", &[("00:00", 90.0)])),
            ])
            .await
            .unwrap();
        service
            .upload(vec![zip_upload("export.zip", &archive)])
            .await
            .unwrap();
    }

    let expected = full.snapshot().await.scaled.clone();
    assert_eq!(expected.len(), 1);
    assert_eq!(expected.readings()[0].value("E"), Some(4.0));
    assert_eq!(incremental.snapshot().await.scaled, expected);
}

#[test]
fn test_merge_duplicate_key_first_after_sort_wins() {
    let existing = RawDataset::from_rows(
        vec![Reading::new(DateKey::new("2025-01-01"), "00:00").with_value("E", 1.0)],
        DedupePolicy::KeepFirst,
    );
    let batch = vec![Reading::new(DateKey::new("2025-01-01"), "00:00").with_value("E", 5.0)];

    let merged = existing.merge(batch, DedupePolicy::KeepFirst);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged.readings()[0].value("E"), Some(1.0));
}

#[test]
fn test_reload_is_deterministic() {
    let files = [
        ("2025-01-03_a.xlsx", meter_sheet("E", &[("00:30", 3.5), ("00:00", 3.0)])),
        ("2025-01-01_a.xlsx", meter_sheet("E", &[("00:00", 1.0)])),
        ("2025-01-02_a.xlsx", meter_sheet("E", &[("00:00", 2.0)])),
    ];

    let forward = TempDir::new().unwrap();
    let backward = TempDir::new().unwrap();
    for (name, bytes) in files.iter() {
        stage_one(forward.path(), name, bytes);
    }
    for (name, bytes) in files.iter().rev() {
        stage_one(backward.path(), name, bytes);
    }

    let a = StagingArea::new(forward.path())
        .load_all(DedupePolicy::KeepFirst)
        .unwrap();
    let b = StagingArea::new(backward.path())
        .load_all(DedupePolicy::KeepFirst)
        .unwrap();

    assert_eq!(a, b);
    let keys: Vec<(&str, &str)> = a
        .readings()
        .iter()
        .map(|r| (r.date.as_str(), r.time.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("2025-01-01", "00:00"),
            ("2025-01-02", "00:00"),
            ("2025-01-03", "00:00"),
            ("2025-01-03", "00:30"),
        ]
    );
}

#[tokio::test]
async fn test_excel_time_cells_are_normalized() {
    let dir = TempDir::new().unwrap();
    let service = ingest_service(dir.path(), DedupePolicy::KeepFirst, RefreshMode::FullReload);

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    let time_format = Format::new().set_num_format("hh:mm");
    worksheet.write_string(0, 0, "Time").unwrap();
    worksheet.write_string(0, 1, "E").unwrap();
    worksheet
        .write_number_with_format(1, 0, 0.5, &time_format)
        .unwrap();
    worksheet.write_number(1, 1, 10.0).unwrap();
    worksheet.write_string(2, 0, "7:05").unwrap();
    worksheet.write_number(2, 1, 20.0).unwrap();
    workbook.push_worksheet(worksheet);
    let bytes = workbook.save_to_buffer().unwrap();

    service
        .upload(vec![xlsx_upload("2025-01-01_a.xlsx", &bytes)])
        .await
        .unwrap();

    let snapshot = service.snapshot().await;
    let times: Vec<&str> = snapshot
        .scaled
        .readings()
        .iter()
        .map(|r| r.time.as_str())
        .collect();
    assert_eq!(times, vec!["07:05", "12:00"]);
}

fn stage_one(root: &std::path::Path, name: &str, bytes: &[u8]) {
    use energy_usage_service::ingest::{SpreadsheetEntry, SpreadsheetFormat};
    StagingArea::new(root)
        .stage(&[SpreadsheetEntry::new(
            name,
            SpreadsheetFormat::Xlsx,
            bytes.to_vec(),
        )])
        .unwrap();
}
