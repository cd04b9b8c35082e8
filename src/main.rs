//! # Upload Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Caricamento della configurazione e override da CLI
//! - Scelta del backend (HTTP se è dato un endpoint, altrimenti locale)
//! - Avvio del workspace e report finale
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose, `RUST_LOG` se presente)
//! 3. Carica il file di configurazione e applica gli override
//! 4. Trova le immagini e le mette in coda
//! 5. Ottimizza tutto, poi crop / compare / salvataggio / zip se richiesti
//!
//! ## Esempio di utilizzo:
//! ```bash
//! upload-optimizer photos/ --format webp --quality 75 --zip optimized.zip
//! upload-optimizer avatar.png --crop 40,40,400,400 --circle --output out/
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use upload_optimizer::{
    crop::{CropRect, CropShape},
    file_manager::FileManager,
    json_output::{JsonMessage, JsonObserver},
    progress::ProgressObserver,
    queue::QueueObserver,
    Config, HttpApi, LocalBackend, OutputFormat, RecordId, SourceFile, TransformApi, Workspace,
};

#[derive(Parser)]
#[command(name = "upload-optimizer")]
#[command(about = "Upload images to a transform backend, crop them and export the results")]
struct Args {
    /// Image files or directories to optimize
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Backend base URL (if not specified, images are processed locally)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Output format (jpeg, png, webp, avif, heic, ico, favicon-png)
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Encoding quality (clamped to the format's range)
    #[arg(short, long)]
    quality: Option<u8>,

    /// Maximum file size in bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Crop every optimized image to X,Y,W,H (pixels of the optimized image)
    #[arg(long)]
    crop: Option<CropRect>,

    /// Use a circular crop (the selection is squared)
    #[arg(long, requires = "crop")]
    circle: bool,

    /// Write before/after comparison images into this directory
    #[arg(long)]
    compare: Option<PathBuf>,

    /// Export all optimized images into this zip archive
    #[arg(long)]
    zip: Option<PathBuf>,

    /// Output directory for optimized files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of concurrent uploads (default: all at once)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Configuration file (default: ~/.upload-optimizer/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist the effective configuration to the configuration file
    #[arg(long)]
    save_config: bool,

    /// Emit JSON events on stdout instead of progress bars
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let json = args.json;
    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if json {
                JsonMessage::error(e.to_string(), e.chain().nth(1).map(|s| s.to_string())).emit();
            }
            Err(e)
        }
    }
}

async fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    let path = args.config.clone().or_else(Config::default_path);
    let mut config = match &path {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };

    if let Some(ref endpoint) = args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(format) = args.format {
        config.output_format = Some(format);
    }
    if let Some(quality) = args.quality {
        config.quality = Some(quality);
    }
    if let Some(max_size) = args.max_size {
        config.max_file_size = max_size;
    }
    if let Some(workers) = args.workers {
        config.max_concurrency = Some(workers);
    }
    if args.json {
        config.json_output = true;
    }

    config.validate()?;
    Ok((config, path))
}

fn build_api(config: &Config) -> Result<Arc<dyn TransformApi>> {
    match &config.endpoint {
        Some(endpoint) => {
            info!("Using backend at {}", endpoint);
            let api = HttpApi::new(endpoint, Duration::from_secs(config.request_timeout_secs))?;
            Ok(Arc::new(api))
        }
        None => {
            info!("No endpoint configured, processing images locally");
            Ok(Arc::new(LocalBackend::temporary(config.max_dimension)?))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let started = Instant::now();
    let (config, config_path) = load_config(&args).await?;

    if args.save_config {
        if let Some(ref path) = config_path {
            config.save_to_file(path).await?;
            info!("Saved configuration to {}", path.display());
        }
    }

    // Validate output directory if specified
    if let Some(ref output_dir) = args.output {
        if output_dir.exists() && !output_dir.is_dir() {
            return Err(anyhow::anyhow!("Output path is not a directory: {}", output_dir.display()));
        }
    }

    let paths = FileManager::find_image_files(&args.paths)?;
    if paths.is_empty() {
        return Err(anyhow::anyhow!("No image files found"));
    }
    let mut files: Vec<SourceFile> = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(FileManager::load_source(path).await?);
    }

    let observer: Arc<dyn QueueObserver> = if config.json_output {
        Arc::new(JsonObserver::stdout())
    } else {
        Arc::new(ProgressObserver::new())
    };
    let api = build_api(&config)?;
    let mut workspace = Workspace::new(config.clone(), api, observer);

    let report = workspace.add_files(files);
    if config.json_output {
        JsonMessage::Start {
            total_files: report.accepted.len(),
            rejected: report.rejected.iter().map(|r| r.name.clone()).collect(),
            output_format: config.output_format,
            endpoint: config.endpoint.clone(),
        }
        .emit();
    }

    let stats = workspace.optimize_all().await;

    if let Some(rect) = args.crop {
        let shape = if args.circle { CropShape::Circle } else { CropShape::Rectangle };
        for id in workspace.successful_ids() {
            if let Err(e) = crop_record(&mut workspace, &id, rect, shape).await {
                warn!("Crop skipped for {}: {}", id, e);
            }
        }
    }

    if let Some(ref dir) = args.compare {
        write_comparisons(&workspace, dir).await?;
    }

    if let Some(ref dir) = args.output {
        let written = workspace.save_outputs(dir).await?;
        info!("Wrote {} files to {}", written.len(), dir.display());
    }

    if let Some(ref zip_path) = args.zip {
        if workspace.can_export() {
            let entries = workspace.export_to_path(zip_path).await?;
            if config.json_output {
                JsonMessage::Export {
                    path: zip_path.clone(),
                    entries,
                }
                .emit();
            }
        } else {
            warn!("Nothing to export: no file was optimized successfully");
        }
    }

    if args.output.is_none() && args.zip.is_none() && config.endpoint.is_none() {
        warn!("Optimized files were not saved; use --output or --zip to keep them");
    }

    for (name, message) in workspace.failed() {
        error!("{}: {}", name, message);
    }

    if config.json_output {
        JsonMessage::complete(&stats, started.elapsed().as_secs_f64()).emit();
    } else {
        info!("{}", stats.format_summary());
    }

    Ok(())
}

async fn crop_record(workspace: &mut Workspace, id: &RecordId, rect: CropRect, shape: CropShape) -> Result<()> {
    workspace.open_crop(id).await?;
    let selected = {
        let crop = workspace.crop_mut();
        crop.set_shape(shape).and_then(|_| crop.set_selection(rect))
    };
    if let Err(e) = selected {
        workspace.cancel_crop();
        return Err(e.into());
    }
    workspace.apply_crop().await?;
    Ok(())
}

async fn write_comparisons(workspace: &Workspace, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    for id in workspace.successful_ids() {
        let name = workspace
            .queue()
            .snapshot(&id)
            .map(|r| r.file.name)
            .unwrap_or_else(|| id.to_string());
        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| id.to_string());

        match workspace.compare(&id).await {
            Ok(comparison) => {
                comparison.before.save(dir.join(format!("{}-before.png", stem)))?;
                comparison.after.save(dir.join(format!("{}-after.png", stem)))?;
            }
            Err(e) => warn!("Could not compare {}: {}", name, e),
        }
    }
    info!("Comparison images written to {}", dir.display());
    Ok(())
}
