//! sonata: batch loader for a music streaming service's analytics lake.
//!
//! Reads the song catalog and user activity logs as NDJSON, derives five
//! analytical tables (`songs`, `artists`, `users`, `time`, `songplays`) and
//! publishes each as a Hive-partitioned Parquet table with a `_SUCCESS`
//! manifest.
//!
//! # Example
//!
//! ```ignore
//! use sonata::{Config, Stage, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config, Stage::All).await?;
//!     println!("Published {} songplays", stats.rows("songplays").unwrap_or(0));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, SongsHandle, Stage, run_pipeline};
pub use storage::{StorageProvider, StorageProviderRef};
