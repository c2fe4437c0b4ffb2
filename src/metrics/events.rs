//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the matching
//! counter or histogram.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when records are parsed from a source dataset.
pub struct RecordsRead {
    pub dataset: &'static str,
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(dataset = self.dataset, count = self.count, "Records read");
        counter!("sonata_records_read_total", "dataset" => self.dataset).increment(self.count);
    }
}

/// Event emitted when malformed source lines are skipped.
pub struct RecordsSkipped {
    pub dataset: &'static str,
    pub count: u64,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(dataset = self.dataset, count = self.count, "Records skipped");
        counter!("sonata_records_skipped_total", "dataset" => self.dataset).increment(self.count);
    }
}

/// Event emitted when raw bytes are fetched from the input store.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("sonata_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when rows of a table are encoded into Parquet.
pub struct RowsWritten {
    pub table: &'static str,
    pub count: u64,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(table = self.table, count = self.count, "Rows written");
        counter!("sonata_rows_written_total", "table" => self.table).increment(self.count);
    }
}

/// Event emitted when Parquet bytes are uploaded for a table.
pub struct BytesWritten {
    pub table: &'static str,
    pub bytes: u64,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(table = self.table, bytes = self.bytes, "Bytes written");
        counter!("sonata_bytes_written_total", "table" => self.table).increment(self.bytes);
    }
}

/// Event emitted when a Parquet file has been closed.
pub struct ParquetWriteCompleted {
    pub duration: Duration,
}

impl InternalEvent for ParquetWriteCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Parquet write completed");
        histogram!("sonata_parquet_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a table's publish marker has been written.
pub struct TablePublished {
    pub table: &'static str,
    pub files: u64,
    pub duration: Duration,
}

impl InternalEvent for TablePublished {
    fn emit(self) {
        trace!(table = self.table, files = self.files, "Table published");
        counter!("sonata_tables_published_total", "table" => self.table).increment(1);
        counter!("sonata_files_written_total", "table" => self.table).increment(self.files);
        histogram!("sonata_table_publish_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when plays have been joined against the song catalog.
pub struct JoinCompleted {
    pub matched: u64,
    pub unmatched: u64,
}

impl InternalEvent for JoinCompleted {
    fn emit(self) {
        trace!(
            matched = self.matched,
            unmatched = self.unmatched,
            "Join completed"
        );
        counter!("sonata_join_rows_total", "result" => "matched").increment(self.matched);
        counter!("sonata_join_rows_total", "result" => "unmatched").increment(self.unmatched);
    }
}

/// Storage operation type.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Delete,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }

    /// Status matching the outcome of a storage call.
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }
}

/// Event emitted for every storage request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "sonata_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "sonata_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
