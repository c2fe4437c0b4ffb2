//! Table publishing and read-back.
//!
//! A table is a directory under the output root holding Parquet files in
//! Hive-style partition directories plus a `_SUCCESS` manifest. Writing a
//! table always replaces it entirely:
//!
//! 1. the `_SUCCESS` marker is removed, so the table stops being visible
//! 2. every object left under the table directory is deleted
//! 3. the new files are uploaded
//! 4. the marker is written, listing every file of the new snapshot
//!
//! Readers only trust a table whose marker exists and only read the files
//! the marker lists, so an interrupted write is never mistaken for a table.

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::columns::{ColumnReader, PartitionValues};
use super::parquet::{ParquetWriter, ParquetWriterConfig, read_parquet};
use super::partition::{PartitionExtractor, partition_dir};
use crate::emit;
use crate::error::{
    EncodeBatchSnafu, InvalidPathSnafu, ManifestSnafu, SinkError, SinkParquetSnafu,
    SinkStorageSnafu, SinkTaskSnafu, StorageError,
};
use crate::metrics::events::{BytesWritten, RowsWritten, TablePublished};
use crate::storage::StorageProviderRef;

/// Name of the publish marker inside a table directory.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// A row type that can be stored as a table.
pub trait TableRow: Sized + Send + Sync + 'static {
    /// Directory name of the table under the output root.
    const TABLE: &'static str;

    /// Columns encoded in the directory path instead of the files.
    const PARTITION_COLUMNS: &'static [&'static str] = &[];

    /// Schema of the columns stored inside the files.
    fn file_schema() -> SchemaRef;

    /// Values of [`Self::PARTITION_COLUMNS`] for this row, in order.
    fn partition_values(&self) -> Vec<Option<String>> {
        Vec::new()
    }

    /// Encode rows into a batch with [`Self::file_schema`].
    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError>;

    /// Decode a stored batch, restoring partition columns from the path.
    fn from_batch(
        columns: &ColumnReader<'_>,
        partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError>;
}

/// One file of a published table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the table directory.
    pub path: String,
    /// Partition column values of the file; `None` for the default partition.
    #[serde(default)]
    pub partition_values: BTreeMap<String, Option<String>>,
    pub rows: usize,
    pub size: usize,
}

/// Contents of the `_SUCCESS` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub table: String,
    pub partition_columns: Vec<String>,
    pub total_rows: usize,
    pub files: Vec<ManifestFile>,
}

/// Outcome of a successful table write.
#[derive(Debug, Clone)]
pub struct PublishedTable {
    pub manifest: Manifest,
}

impl PublishedTable {
    pub fn table(&self) -> &str {
        &self.manifest.table
    }

    pub fn rows(&self) -> usize {
        self.manifest.total_rows
    }

    pub fn files(&self) -> &[ManifestFile] {
        &self.manifest.files
    }
}

/// Destination for analytical tables.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Replace the table `R::TABLE` with `rows`, written in the given order.
    async fn write_table<R: TableRow>(&self, rows: Arc<Vec<R>>)
    -> Result<PublishedTable, SinkError>;

    /// Read back a published table.
    ///
    /// Fails with [`SinkError::NotPublished`] when the table has no marker.
    async fn read_table<R: TableRow>(&self) -> Result<Vec<R>, SinkError>;
}

/// Options for the Parquet sink.
#[derive(Debug, Clone)]
pub struct ParquetSinkOptions {
    pub writer: ParquetWriterConfig,
    /// Rows per batch handed to the writer.
    pub batch_size: usize,
    pub max_concurrent_uploads: usize,
}

impl Default for ParquetSinkOptions {
    fn default() -> Self {
        Self {
            writer: ParquetWriterConfig::default(),
            batch_size: 8192,
            max_concurrent_uploads: 4,
        }
    }
}

/// Table sink writing partitioned Parquet files to a storage provider.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    storage: StorageProviderRef,
    options: ParquetSinkOptions,
}

fn table_path(table: &str, relative: &str) -> Result<Path, SinkError> {
    let path = format!("{table}/{relative}");
    Path::parse(&path).context(InvalidPathSnafu { table, path })
}

/// A file encoded for upload.
struct TableFile {
    manifest: ManifestFile,
    bytes: Bytes,
}

/// Encode rows into files named by partition directory and sequence.
fn encode_table<R: TableRow>(
    rows: &[R],
    options: &ParquetSinkOptions,
) -> Result<Vec<TableFile>, SinkError> {
    let mut groups: BTreeMap<Vec<Option<String>>, Vec<&R>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.partition_values()).or_default().push(row);
    }
    if groups.is_empty() && R::PARTITION_COLUMNS.is_empty() {
        groups.insert(Vec::new(), Vec::new());
    }

    let schema = R::file_schema();
    let batch_size = options.batch_size.max(1);
    let mut files = Vec::new();

    for (values, group) in groups {
        let mut writer = ParquetWriter::new(schema.clone(), options.writer.clone())
            .context(SinkParquetSnafu { table: R::TABLE })?;

        for chunk in group.chunks(batch_size) {
            let batch = R::to_batch(chunk).context(EncodeBatchSnafu { table: R::TABLE })?;
            writer
                .write_batch(&batch)
                .context(SinkParquetSnafu { table: R::TABLE })?;
        }

        let dir = partition_dir(R::PARTITION_COLUMNS, &values);
        let encoded = writer
            .close()
            .context(SinkParquetSnafu { table: R::TABLE })?;
        let partition_values: BTreeMap<String, Option<String>> = R::PARTITION_COLUMNS
            .iter()
            .map(|column| column.to_string())
            .zip(values.iter().map(|v| v.clone().filter(|v| !v.is_empty())))
            .collect();

        for (index, file) in encoded.into_iter().enumerate() {
            let name = format!("part-{index:05}.parquet");
            let path = if dir.is_empty() {
                name
            } else {
                format!("{dir}/{name}")
            };
            files.push(TableFile {
                manifest: ManifestFile {
                    path,
                    partition_values: partition_values.clone(),
                    rows: file.record_count,
                    size: file.bytes.len(),
                },
                bytes: file.bytes,
            });
        }
    }

    Ok(files)
}

/// Decode one stored file.
fn decode_file<R: TableRow>(relative: &str, bytes: Bytes) -> Result<Vec<R>, SinkError> {
    let batches = read_parquet(bytes, relative).context(SinkParquetSnafu { table: R::TABLE })?;
    let values = PartitionExtractor::new(R::PARTITION_COLUMNS).extract(relative);
    let partition = PartitionValues::new(&values, R::TABLE);

    let mut rows = Vec::new();
    for batch in &batches {
        rows.extend(R::from_batch(
            &ColumnReader::new(batch, R::TABLE),
            &partition,
        )?);
    }
    Ok(rows)
}

impl ParquetSink {
    pub fn new(storage: StorageProviderRef, options: ParquetSinkOptions) -> Self {
        Self { storage, options }
    }

    /// Read and parse the publish marker of a table.
    pub async fn manifest(&self, table: &str) -> Result<Manifest, SinkError> {
        let marker = table_path(table, SUCCESS_MARKER)?;
        let bytes = match self.storage.get(&marker).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(SinkError::NotPublished {
                    table: table.to_string(),
                });
            }
            Err(source) => {
                return Err(SinkError::SinkStorage {
                    table: table.to_string(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).context(ManifestSnafu { table })
    }

    /// Delete every object currently stored under the table directory.
    async fn clear_table(&self, table: &str) -> Result<usize, SinkError> {
        let existing: Vec<Path> = self
            .storage
            .list_with_prefix(Some(table))
            .try_collect()
            .await
            .context(SinkStorageSnafu { table })?;

        let count = existing.len();
        stream::iter(existing)
            .map(|path| async move { self.storage.delete(&path).await })
            .buffer_unordered(self.options.max_concurrent_uploads.max(1))
            .try_collect::<Vec<_>>()
            .await
            .context(SinkStorageSnafu { table })?;

        Ok(count)
    }
}

#[async_trait]
impl TableSink for ParquetSink {
    async fn write_table<R: TableRow>(
        &self,
        rows: Arc<Vec<R>>,
    ) -> Result<PublishedTable, SinkError> {
        let table = R::TABLE;
        let start = Instant::now();

        let options = self.options.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_table(&rows, &options))
            .await
            .context(SinkTaskSnafu { table })??;

        // Unpublish first so no reader sees a mix of old and new files
        let marker = table_path(table, SUCCESS_MARKER)?;
        self.storage
            .delete(&marker)
            .await
            .context(SinkStorageSnafu { table })?;

        let removed = self.clear_table(table).await?;
        debug!(table, removed, "Cleared previous table contents");

        let mut files = Vec::with_capacity(encoded.len());
        let mut uploads = Vec::with_capacity(encoded.len());
        for file in encoded {
            uploads.push((
                table_path(table, &file.manifest.path)?,
                file.bytes,
                file.manifest.rows,
            ));
            files.push(file.manifest);
        }

        stream::iter(uploads)
            .map(|(path, bytes, record_count)| async move {
                let size = bytes.len();
                self.storage.put(&path, bytes).await?;
                emit!(RowsWritten {
                    table,
                    count: record_count as u64,
                });
                emit!(BytesWritten {
                    table,
                    bytes: size as u64,
                });
                Ok::<_, StorageError>(())
            })
            .buffer_unordered(self.options.max_concurrent_uploads.max(1))
            .try_collect::<Vec<()>>()
            .await
            .context(SinkStorageSnafu { table })?;

        let manifest = Manifest {
            table: table.to_string(),
            partition_columns: R::PARTITION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            total_rows: files.iter().map(|f| f.rows).sum(),
            files,
        };
        let body = serde_json::to_vec_pretty(&manifest).context(ManifestSnafu { table })?;
        self.storage
            .put(&marker, Bytes::from(body))
            .await
            .context(SinkStorageSnafu { table })?;

        emit!(TablePublished {
            table,
            files: manifest.files.len() as u64,
            duration: start.elapsed(),
        });
        info!(
            table,
            rows = manifest.total_rows,
            files = manifest.files.len(),
            location = %format!("{}/{table}", self.storage.url()),
            "Published table"
        );

        Ok(PublishedTable { manifest })
    }

    async fn read_table<R: TableRow>(&self) -> Result<Vec<R>, SinkError> {
        let table = R::TABLE;
        let manifest = self.manifest(table).await?;

        let paths = manifest
            .files
            .iter()
            .map(|file| Ok((file.path.clone(), table_path(table, &file.path)?)))
            .collect::<Result<Vec<_>, SinkError>>()?;

        let decoded: Vec<Vec<R>> = stream::iter(paths)
            .map(|(relative, path)| async move {
                let bytes = self
                    .storage
                    .get(&path)
                    .await
                    .context(SinkStorageSnafu { table })?;
                tokio::task::spawn_blocking(move || decode_file::<R>(&relative, bytes))
                    .await
                    .context(SinkTaskSnafu { table })?
            })
            .buffered(self.options.max_concurrent_uploads.max(1))
            .try_collect()
            .await?;

        let rows: Vec<R> = decoded.into_iter().flatten().collect();
        debug!(table, rows = rows.len(), "Read table back");
        Ok(rows)
    }
}
