//! Resumable Uploadr Library
//!
//! Queued, chunked and resumable HTTP file uploads.
//!
//! # Features
//!
//! - **Bounded Concurrency**: At most `max_connections` files upload at once
//! - **Chunking**: Large files are split into parts sent in order
//! - **Resume**: Interrupted chunked uploads continue from a persisted checkpoint
//! - **Auto Retry**: Failed requests are retried after a delay, up to a limit
//! - **Callbacks**: Every lifecycle step is reported and can be vetoed
//!
//! # Example
//!
//! ```no_run
//! use resumable_uploadr::{Config, Uploader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("uploadr.yaml")?;
//!     let uploader = Uploader::new(config)?;
//!     uploader.add_paths(["backup.tar.gz"]).await?;
//!     uploader.wait_idle().await?;
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod telemetry;
pub mod transport;
pub mod upload;
pub mod uploader;

// Re-export commonly used types
pub use callbacks::UploadCallbacks;
pub use config::Config;
pub use upload::FileId;
pub use uploader::{Uploader, UploaderBuilder, UploaderError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
