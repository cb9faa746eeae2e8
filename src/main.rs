//! Resumable Uploadr - queued, chunked and resumable HTTP file uploads
//!
//! Uploads files from the command line using a YAML configuration.

use clap::{Parser, Subcommand};
use resumable_uploadr::callbacks::UploadCallbacks;
use resumable_uploadr::upload::chunk::ChunkInfo;
use resumable_uploadr::upload::UploadResponse;
use resumable_uploadr::{metrics, telemetry, Config, FileId, Uploader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Resumable Uploadr - queued, chunked and resumable HTTP file uploads
#[derive(Parser, Debug)]
#[command(name = "resumable-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "uploadr.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides logging.level.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print Prometheus metrics to stdout before exiting
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files and wait for them to finish
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override request.endpoint
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// List files with a resume checkpoint
    Resumable,
}

/// Logs every lifecycle step and counts failed files
struct CliReport {
    failed: Arc<AtomicUsize>,
}

impl UploadCallbacks for CliReport {
    fn on_upload(&mut self, id: FileId, name: &str) {
        info!(file_id = %id, file = %name, "Uploading");
    }

    fn on_upload_chunk(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) {
        debug!(
            file_id = %id,
            file = %name,
            "Chunk {}/{}",
            chunk.part_index + 1,
            chunk.total_parts
        );
    }

    fn on_resume(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) -> bool {
        info!(file_id = %id, file = %name, part_index = chunk.part_index, "Resuming from checkpoint");
        true
    }

    fn on_progress(&mut self, id: FileId, name: &str, loaded: u64, total: u64) {
        debug!(file_id = %id, file = %name, loaded, total, "Progress");
    }

    fn on_complete(&mut self, id: FileId, name: &str, response: &UploadResponse) {
        if response.is_error() {
            self.failed.fetch_add(1, Ordering::SeqCst);
            error!(file_id = %id, file = %name, "Upload failed");
        } else {
            info!(file_id = %id, file = %name, "Upload succeeded");
        }
    }

    fn on_error(&mut self, id: Option<FileId>, name: &str, reason: &str) {
        match id {
            Some(id) => warn!(file_id = %id, file = %name, "{}", reason),
            None => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(file = %name, "{}", reason);
            }
        }
    }

    fn on_auto_retry(&mut self, id: FileId, name: &str, attempt: u32) {
        info!(file_id = %id, file = %name, attempt, "Scheduling automatic retry");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Resumable Uploadr v{}", resumable_uploadr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    let print_metrics = args.print_metrics && config.metrics.enabled;

    let failed = match args.command {
        Command::Upload { files, endpoint } => {
            if let Some(endpoint) = endpoint {
                config.request.endpoint = endpoint;
            }
            let failed = Arc::new(AtomicUsize::new(0));
            let uploader = Uploader::builder(config)
                .callbacks(CliReport {
                    failed: failed.clone(),
                })
                .build()?;

            let ids = uploader.add_paths(&files).await?;
            info!(submitted = ids.len(), "Files submitted");
            // Files are only stored when auto_upload is off
            uploader.upload_stored_files().await?;
            uploader.wait_idle().await?;
            failed.load(Ordering::SeqCst)
        }
        Command::Resumable => {
            let uploader = Uploader::new(config)?;
            for file in uploader.get_resumable_files().await? {
                println!(
                    "{}\t{}\t{}\tpart {}",
                    file.name, file.size, file.uuid, file.part_index
                );
            }
            0
        }
    };

    if print_metrics {
        print!("{}", metrics::gather());
    }

    if failed > 0 {
        anyhow::bail!("{} file(s) failed to upload", failed);
    }
    Ok(())
}
