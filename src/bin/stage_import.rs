use clap::Parser;
use energy_usage_service::channels::ChannelRegistry;
use energy_usage_service::dataset::DedupePolicy;
use energy_usage_service::ingest::{prepare_batch, PreparedBatch, RawUpload, StagingArea};
use energy_usage_service::services::DatasetSnapshot;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stage-import")]
#[command(about = "Stage local meter exports (spreadsheets or zips) and rebuild the dataset", long_about = None)]
struct Cli {
    /// Staging directory shared with the service
    #[arg(long, env = "STAGING_DIR", default_value = "staged_files")]
    staging_dir: PathBuf,

    /// TOML channel configuration (built-in channels when omitted)
    #[arg(long, env = "CHANNELS_CONFIG")]
    channels_config: Option<PathBuf>,

    /// Duplicate (Date, Time) policy: keep-first, keep-last or merge-non-null
    #[arg(long, env = "DEDUPE_POLICY", default_value = "keep-first")]
    dedupe_policy: DedupePolicy,

    /// Skip staging and only rebuild from what is already staged
    #[arg(long)]
    reload_only: bool,

    /// Spreadsheet (.xlsx, .xlsm, .xls, .ods, .csv) or .zip files to stage
    files: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (ignore errors if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let start_time = Instant::now();

    let channels = ChannelRegistry::load_or_default(cli.channels_config.as_deref())?;
    let staging = StagingArea::new(&cli.staging_dir);

    if !cli.reload_only {
        if cli.files.is_empty() {
            return Err("no files given (use --reload-only to rebuild without staging)".into());
        }
        let batch = prepare_files(&cli.files)?;
        let staged = staging.stage(&batch.entries)?;
        println!(
            "✓ Staged {} spreadsheets ({} readings) under {}",
            staged.len(),
            batch.row_count(),
            cli.staging_dir.display()
        );
    }

    let raw = staging.load_all(cli.dedupe_policy)?;
    let snapshot = DatasetSnapshot::build(raw, &channels);
    let dates = snapshot.scaled.date_keys();

    println!("Dataset rows: {}", snapshot.scaled.len());
    println!(
        "Dates ({}): {}",
        dates.len(),
        dates
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Channels: {}",
        snapshot
            .scaled
            .columns()
            .into_iter()
            .map(|c| format!("{} ({})", channels.label_for(c), c))
            .collect::<Vec<_>>()
            .join(", ")
    );

    info!("Done in {:?}", start_time.elapsed());
    Ok(())
}

/// Read and validate every file before anything is staged
fn prepare_files(files: &[PathBuf]) -> Result<PreparedBatch, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let mut batch = PreparedBatch::default();
    for path in files {
        pb.set_message(path.display().to_string());
        let bytes = std::fs::read(path).map_err(|e| {
            error!("Failed to read {}: {}", path.display(), e);
            e
        })?;
        let upload = RawUpload {
            filename: path.display().to_string(),
            bytes,
        };

        batch.extend(prepare_batch(vec![upload])?);
        pb.inc(1);
    }

    pb.finish_with_message(format!("✓ Validated {} files", files.len()));
    Ok(batch)
}
