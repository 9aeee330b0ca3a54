use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use ytmark::error::Result;
use ytmark::{BatchStatus, Config, Downloader};

/// Main entry point for the application.
///
/// # Steps
/// 1. Initializes logging (`RUST_LOG`, default `info`)
/// 2. Loads `ytmark.json` if present (defaults otherwise); `YTMARK_WATERMARK`
///    overrides the watermark text
/// 3. Initializes the downloader with required directories and binaries
/// 4. Downloads every URL listed in the input directory's `.txt` files
#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting application...");

    let mut config = load_config(Path::new(CONFIG_FILE))?;
    if let Ok(text) = std::env::var("YTMARK_WATERMARK") {
        if !text.trim().is_empty() {
            config.watermark_text = Some(text);
        }
    }

    let downloader = Downloader::new(config).await?;

    if let Err(e) = process_local_files(&downloader).await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("Application completed successfully");
    Ok(())
}

const CONFIG_FILE: &str = "ytmark.json";

/// Reads the configuration file, falling back to defaults when it is missing.
/// Fields absent from the file keep their default values.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    info!("Loading configuration from {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Processes video and playlist URLs from local text files.
///
/// # Processing Steps
/// 1. Reads the input directory
/// 2. Processes each .txt file found, in name order
/// 3. Downloads videos from URLs in each file
///
/// # Errors
/// Returns error if:
/// - Directory reading fails
/// - File reading fails
async fn process_local_files(downloader: &Downloader) -> Result<()> {
    let input_dir = &downloader.config().input_dir;
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("txt") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        info!("No .txt files found in {}", input_dir.display());
        return Ok(());
    }

    for path in paths {
        info!("Processing file: {}", path.display());
        let urls = read_urls(&path)?;
        let reports = downloader.process_urls(&urls).await;

        for report in &reports {
            match report.status {
                BatchStatus::FullSuccess => info!(
                    "{}: {} of {} downloaded",
                    report.output_dir.display(),
                    report.completed_count,
                    report.selected_count
                ),
                BatchStatus::Partial | BatchStatus::AllFailed => error!(
                    "{}: {} of {} downloaded, {} failed",
                    report.output_dir.display(),
                    report.completed_count,
                    report.selected_count,
                    report.failed_count()
                ),
            }
        }
    }

    Ok(())
}

/// Reads URLs from a text file.
///
/// # Format
/// - One URL per line
/// - Empty lines and lines starting with `#` are ignored
/// - Lines are trimmed of whitespace
fn read_urls(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = io::BufReader::new(file);
    let mut urls = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            urls.push(trimmed.to_string());
        }
    }

    Ok(urls)
}
