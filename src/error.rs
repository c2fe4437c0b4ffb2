//! Error types for sonata using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input root is empty.
    #[snafu(display("Input root cannot be empty"))]
    EmptyInputRoot,

    /// Output root is empty.
    #[snafu(display("Output root cannot be empty"))]
    EmptyOutputRoot,

    /// A file pattern could not be compiled.
    #[snafu(display("Invalid file pattern '{pattern}': {message}"))]
    InvalidPattern { pattern: String, message: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Reader Errors ============

/// Errors that can occur while reading NDJSON record files.
///
/// Malformed lines are not errors: the reader skips and counts them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The file could not be decompressed or decoded as text.
    #[snafu(display("Failed to decode {path}"))]
    Decompress {
        source: std::io::Error,
        path: String,
    },
}

// ============ Parquet Errors ============

/// Errors that can occur during Parquet file writing and reading.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParquetError {
    /// Parquet write error.
    #[snafu(display("Parquet write error"))]
    Write {
        source: parquet::errors::ParquetError,
    },

    /// Failed to create Parquet writer.
    #[snafu(display("Failed to create Parquet writer"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Writer is not available (internal state error).
    #[snafu(display("Parquet writer is not available"))]
    WriterUnavailable,

    /// Buffer lock error (mutex poisoned).
    #[snafu(display("Buffer lock failed: mutex poisoned"))]
    BufferLock,

    /// Buffer has outstanding references and cannot be consumed.
    #[snafu(display("Buffer has outstanding references"))]
    BufferInUse,

    /// Failed to open or decode a Parquet file.
    #[snafu(display("Failed to read Parquet file {path}"))]
    ReadParquet {
        path: String,
        source: parquet::errors::ParquetError,
    },

    /// Failed to decode a record batch while reading a Parquet file.
    #[snafu(display("Failed to decode record batch from {path}"))]
    ReadBatch {
        path: String,
        source: arrow::error::ArrowError,
    },
}

// ============ Sink Errors ============

/// Errors that can occur while publishing or reading back a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Storage error while publishing or reading a table.
    #[snafu(display("Storage error on table {table}"))]
    SinkStorage { table: String, source: StorageError },

    /// Parquet encoding or decoding failed.
    #[snafu(display("Parquet error on table {table}"))]
    SinkParquet { table: String, source: ParquetError },

    /// Rows could not be converted into an Arrow batch.
    #[snafu(display("Failed to encode rows of table {table}"))]
    EncodeBatch {
        table: String,
        source: arrow::error::ArrowError,
    },

    /// A stored batch does not match the table layout.
    #[snafu(display("Failed to decode rows of table {table}: {message}"))]
    DecodeBatch { table: String, message: String },

    /// A partition directory value could not be parsed back.
    #[snafu(display("Invalid value '{value}' for partition column {column} of table {table}"))]
    InvalidPartition {
        table: String,
        column: String,
        value: String,
    },

    /// A file path could not be represented in the object store.
    #[snafu(display("Invalid path {path} in table {table}"))]
    InvalidPath {
        table: String,
        path: String,
        source: object_store::path::Error,
    },

    /// The publish manifest could not be serialized or parsed.
    #[snafu(display("Invalid publish manifest for table {table}"))]
    Manifest {
        table: String,
        source: serde_json::Error,
    },

    /// A blocking encode or decode task failed.
    #[snafu(display("Background task failed for table {table}"))]
    SinkTask {
        table: String,
        source: tokio::task::JoinError,
    },

    /// The table has no publish marker, so it is absent or mid-write.
    #[snafu(display("Table {table} is not published"))]
    NotPublished { table: String },
}

impl SinkError {
    /// Check if this error means the table has not been (fully) published yet.
    pub fn is_not_published(&self) -> bool {
        matches!(self, SinkError::NotPublished { .. })
    }
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Reader error.
    #[snafu(display("Reader error"))]
    Reader { source: ReaderError },

    /// Sink error.
    #[snafu(display("Sink error"))]
    Sink { source: SinkError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// A table this stage reads has not been published by its producer.
    #[snafu(display("Dependency not ready: table {table} has not been published"))]
    DependencyNotReady { table: String },

    /// Too many malformed records were skipped.
    #[snafu(display("Skipped {skipped} malformed records, limit is {limit}"))]
    SkipBudgetExceeded { skipped: usize, limit: usize },
}

impl From<SinkError> for PipelineError {
    fn from(source: SinkError) -> Self {
        match source {
            SinkError::NotPublished { table } => PipelineError::DependencyNotReady { table },
            source => PipelineError::Sink { source },
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::PipelineStorage { source }
    }
}

impl From<ReaderError> for PipelineError {
    fn from(source: ReaderError) -> Self {
        PipelineError::Reader { source }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_published_maps_to_dependency_not_ready() {
        let err: PipelineError = SinkError::NotPublished {
            table: "songs".to_string(),
        }
        .into();
        match err {
            PipelineError::DependencyNotReady { table } => assert_eq!(table, "songs"),
            other => panic!("Expected DependencyNotReady, got {other:?}"),
        }
    }

    #[test]
    fn test_storage_not_found_detection() {
        let err = StorageError::ObjectStore {
            source: object_store::Error::NotFound {
                path: "songs/_SUCCESS".to_string(),
                source: "missing".into(),
            },
        };
        assert!(err.is_not_found());

        let err = StorageError::InvalidUrl {
            url: "ftp://nope".to_string(),
        };
        assert!(!err.is_not_found());
    }
}
