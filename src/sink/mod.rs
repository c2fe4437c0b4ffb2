//! Table sink: partitioned Parquet tables with publish markers.

pub mod columns;
pub mod parquet;
pub mod partition;
mod table;

pub use table::{
    Manifest, ManifestFile, ParquetSink, ParquetSinkOptions, PublishedTable, SUCCESS_MARKER,
    TableRow, TableSink,
};
