//! Parquet encoding.
//!
//! Encodes Arrow RecordBatches into in-memory Parquet files, rolling to a
//! new file once the target size is reached, and decodes stored files back
//! into batches.

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use bytes::{BufMut, Bytes, BytesMut};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::{MB, ParquetCompression};
use crate::emit;
use crate::error::{
    BufferInUseSnafu, BufferLockSnafu, ParquetError, ReadBatchSnafu, ReadParquetSnafu,
    WriteSnafu, WriterCreateSnafu, WriterUnavailableSnafu,
};
use crate::metrics::events::ParquetWriteCompleted;

/// A finished Parquet file held in memory.
#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub bytes: Bytes,
    pub record_count: usize,
}

/// A buffer with interior mutability for the ArrowWriter.
#[derive(Clone)]
struct SharedBuffer {
    buffer: Arc<Mutex<bytes::buf::Writer<BytesMut>>>,
}

impl SharedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BytesMut::with_capacity(capacity).writer())),
        }
    }

    fn into_inner(self) -> Result<BytesMut, ParquetError> {
        let mutex = Arc::into_inner(self.buffer).context(BufferInUseSnafu)?;
        let writer = mutex.into_inner().map_err(|_| BufferLockSnafu.build())?;
        Ok(writer.into_inner())
    }

    fn len(&self) -> Result<usize, ParquetError> {
        let guard = self.buffer.lock().map_err(|_| BufferLockSnafu.build())?;
        Ok(guard.get_ref().len())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.try_lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "buffer lock contention")
        })?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

const INITIAL_BUFFER_CAPACITY: usize = MB;

/// Configuration for the Parquet writer.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    /// Files roll once they reach this many bytes.
    pub target_file_size: usize,
    /// Row groups are flushed when the in-progress size exceeds this.
    pub row_group_size_bytes: usize,
    pub compression: ParquetCompression,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            target_file_size: 128 * MB,
            row_group_size_bytes: 64 * MB,
            compression: ParquetCompression::Snappy,
        }
    }
}

impl ParquetWriterConfig {
    /// Set the target file size in MB.
    pub fn with_file_size_mb(mut self, size_mb: usize) -> Self {
        self.target_file_size = size_mb.max(1) * MB;
        self.row_group_size_bytes = self.row_group_size_bytes.min(self.target_file_size);
        self
    }

    /// Set the target file size in bytes.
    pub fn with_target_file_size(mut self, size_bytes: usize) -> Self {
        self.target_file_size = size_bytes;
        self.row_group_size_bytes = self.row_group_size_bytes.min(size_bytes);
        self
    }

    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }
}

/// Writes batches into one or more in-memory Parquet files.
pub struct ParquetWriter {
    schema: SchemaRef,
    config: ParquetWriterConfig,
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    records_written: usize,
    finished_files: Vec<EncodedFile>,
}

impl ParquetWriter {
    pub fn new(schema: SchemaRef, config: ParquetWriterConfig) -> Result<Self, ParquetError> {
        let buffer = SharedBuffer::new(INITIAL_BUFFER_CAPACITY);
        let writer = Self::create_writer(&schema, &config, buffer.clone())?;

        Ok(Self {
            schema,
            config,
            writer: Some(writer),
            buffer,
            records_written: 0,
            finished_files: Vec::new(),
        })
    }

    fn create_writer(
        schema: &SchemaRef,
        config: &ParquetWriterConfig,
        buffer: SharedBuffer,
    ) -> Result<ArrowWriter<SharedBuffer>, ParquetError> {
        ArrowWriter::try_new(buffer, schema.clone(), Some(writer_properties(config)))
            .context(WriterCreateSnafu)
    }

    /// Write a batch to the current file, rolling afterwards if it is full.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), ParquetError> {
        let writer = self.writer.as_mut().context(WriterUnavailableSnafu)?;

        writer.write(batch).context(WriteSnafu)?;
        self.records_written += batch.num_rows();

        if writer.in_progress_size() > self.config.row_group_size_bytes {
            tracing::debug!(
                in_progress_size = writer.in_progress_size(),
                records = self.records_written,
                "Flushing row group"
            );
            writer.flush().context(WriteSnafu)?;
        }

        let current_size = self.current_file_size();
        if current_size >= self.config.target_file_size {
            tracing::debug!(
                current_size,
                records = self.records_written,
                "Rolling file at size limit"
            );
            self.roll_file()?;
        }

        Ok(())
    }

    /// Close the current file and start a new one.
    fn roll_file(&mut self) -> Result<(), ParquetError> {
        let start = Instant::now();
        let writer = self.writer.take().context(WriterUnavailableSnafu)?;
        writer.close().context(WriteSnafu)?;

        let bytes = std::mem::replace(
            &mut self.buffer,
            SharedBuffer::new(INITIAL_BUFFER_CAPACITY),
        )
        .into_inner()?
        .freeze();

        emit!(ParquetWriteCompleted {
            duration: start.elapsed()
        });

        self.finished_files.push(EncodedFile {
            bytes,
            record_count: self.records_written,
        });

        self.writer = Some(Self::create_writer(
            &self.schema,
            &self.config,
            self.buffer.clone(),
        )?);
        self.records_written = 0;

        Ok(())
    }

    /// Close the writer and return every finished file in write order.
    ///
    /// A writer that received no rows at all still yields one (empty) file,
    /// so that a table always has a schema on disk.
    pub fn close(mut self) -> Result<Vec<EncodedFile>, ParquetError> {
        if self.records_written > 0 || self.finished_files.is_empty() {
            let start = Instant::now();
            let writer = self.writer.take().context(WriterUnavailableSnafu)?;
            writer.close().context(WriteSnafu)?;

            let bytes = self.buffer.into_inner()?.freeze();

            emit!(ParquetWriteCompleted {
                duration: start.elapsed()
            });

            self.finished_files.push(EncodedFile {
                bytes,
                record_count: self.records_written,
            });
        }

        Ok(self.finished_files)
    }

    /// Current file size in bytes, including in-progress data.
    pub fn current_file_size(&self) -> usize {
        let buffer_size = self.buffer.len().unwrap_or(0);
        let in_progress_size = self
            .writer
            .as_ref()
            .map(|w| w.in_progress_size())
            .unwrap_or(0);
        buffer_size + in_progress_size
    }
}

fn writer_properties(config: &ParquetWriterConfig) -> WriterProperties {
    let compression = match config.compression {
        ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
    };

    WriterProperties::builder()
        .set_compression(compression)
        .build()
}

/// Decode a Parquet file into record batches.
pub fn read_parquet(bytes: Bytes, path: &str) -> Result<Vec<RecordBatch>, ParquetError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .context(ReadParquetSnafu { path })?
        .build()
        .context(ReadParquetSnafu { path })?;

    reader
        .collect::<Result<Vec<_>, _>>()
        .context(ReadBatchSnafu { path })
}
