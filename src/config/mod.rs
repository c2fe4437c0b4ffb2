//! Configuration loading.
//!
//! Everything has a built-in default, so the pipeline runs with no config
//! file at all against the fixed input and output roots. A YAML file can
//! override any part; `${VAR}` references in it are resolved from the
//! environment before parsing.

mod vars;

pub use vars::{interpolate, interpolate_with};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyInputRootSnafu, EmptyOutputRootSnafu, ReadFileSnafu, YamlParseSnafu,
};
use crate::source::FilePattern;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Credentials and region handed to S3-backed storage.
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

/// Where raw records are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Root of both datasets (local absolute path, `file://` or `s3a://` URL).
    #[serde(default = "default_input_root")]
    pub root: String,

    /// Pattern for catalog record files, relative to the root.
    #[serde(default = "default_catalog_pattern")]
    pub catalog_pattern: String,

    /// Pattern for usage log files, relative to the root.
    #[serde(default = "default_events_pattern")]
    pub events_pattern: String,

    /// Compression format of input files.
    #[serde(default)]
    pub compression: CompressionFormat,

    /// Maximum number of files fetched concurrently (default: 16).
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            root: default_input_root(),
            catalog_pattern: default_catalog_pattern(),
            events_pattern: default_events_pattern(),
            compression: CompressionFormat::default(),
            max_concurrent_files: default_max_concurrent_files(),
        }
    }
}

fn default_input_root() -> String {
    "s3a://udacity-dend/".to_string()
}

fn default_catalog_pattern() -> String {
    "song_data/*/*/*/*.json".to_string()
}

fn default_events_pattern() -> String {
    "log_data/*.json".to_string()
}

fn default_max_concurrent_files() -> usize {
    16
}

/// Where the analytical tables are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root under which `songs/`, `artists/`, `users/`, `time/` and
    /// `songplays/` are written.
    #[serde(default = "default_output_root")]
    pub root: String,

    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Target file size in MB (default: 128).
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,

    /// Rows per Arrow batch handed to the Parquet writer (default: 8192).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum concurrent file uploads per table (default: 4).
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            compression: ParquetCompression::default(),
            file_size_mb: default_file_size_mb(),
            batch_size: default_batch_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
        }
    }
}

fn default_output_root() -> String {
    "s3a://sonata-lake/".to_string()
}

fn default_file_size_mb() -> usize {
    128
}

fn default_batch_size() -> usize {
    8192
}

fn default_max_concurrent_uploads() -> usize {
    4
}

/// AWS credentials and region.
///
/// Unset fields fall back to the standard `AWS_*` environment variables
/// read by the S3 client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl AwsConfig {
    /// Storage options understood by the S3 backend.
    pub fn storage_options(&self) -> HashMap<String, String> {
        [
            ("aws_access_key_id", &self.access_key_id),
            ("aws_secret_access_key", &self.secret_access_key),
            ("aws_session_token", &self.session_token),
            ("aws_region", &self.region),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect()
    }
}

/// Error handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Maximum malformed records skipped per dataset before failing
    /// (0 = unlimited, default: 0).
    #[serde(default)]
    pub max_skipped_records: usize,
}

/// Compression format for source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Config {
    /// Load configuration from a YAML file, interpolating environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::parse(&interpolate(&content)?)
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.input.root.trim().is_empty(), EmptyInputRootSnafu);
        ensure!(!self.output.root.trim().is_empty(), EmptyOutputRootSnafu);
        FilePattern::parse(&self.input.catalog_pattern)?;
        FilePattern::parse(&self.input.events_pattern)?;
        Ok(())
    }

    /// Storage options for both input and output providers.
    pub fn storage_options(&self) -> HashMap<String, String> {
        self.aws.storage_options()
    }
}
