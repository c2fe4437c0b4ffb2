//! Source datasets: listing, fetching and decoding of raw record files.

mod listing;
mod reader;

pub use listing::{FilePattern, list_matching};
pub use reader::{FieldKind, NdjsonReader, ReadResult, SourceRecord};

use futures::{StreamExt, TryStreamExt, stream};
use snafu::prelude::*;
use tracing::info;

use crate::config::CompressionFormat;
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::storage::StorageProviderRef;

/// Records decoded from one input file.
#[derive(Debug)]
pub struct SourceFile<T> {
    /// Position of the file in the sorted listing.
    pub index: usize,
    pub path: String,
    pub records: Vec<T>,
}

/// All records of a dataset, grouped by file in listing order.
#[derive(Debug)]
pub struct Dataset<T> {
    pub files: Vec<SourceFile<T>>,
    pub skipped: usize,
}

impl<T> Dataset<T> {
    /// Iterate over all records in file order.
    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.files.iter().flat_map(|file| file.records.iter())
    }

    /// Total number of decoded records.
    pub fn len(&self) -> usize {
        self.files.iter().map(|file| file.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options for reading a dataset.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub compression: CompressionFormat,
    pub max_concurrent_files: usize,
}

/// Read every file matching `pattern`.
///
/// Files are fetched concurrently but kept in listing order; decoding runs
/// on the blocking pool.
pub async fn read_dataset<T: SourceRecord>(
    storage: StorageProviderRef,
    pattern: &FilePattern,
    options: ReadOptions,
) -> Result<Dataset<T>, PipelineError> {
    let paths = list_matching(&storage, pattern).await?;
    info!(
        dataset = T::DATASET,
        pattern = pattern.as_str(),
        files = paths.len(),
        "Reading dataset"
    );

    let reader = NdjsonReader::new(options.compression);

    let results: Vec<(SourceFile<T>, usize)> = stream::iter(paths.into_iter().enumerate())
        .map(|(index, path)| {
            let storage = storage.clone();
            async move {
                let data = storage.get(&path).await?;
                let path = path.to_string();
                let (path, result) = tokio::task::spawn_blocking(move || {
                    let result = reader.read::<T>(&data, &path);
                    (path, result)
                })
                .await
                .context(TaskJoinSnafu)?;
                let result = result?;

                Ok::<_, PipelineError>((
                    SourceFile {
                        index,
                        path,
                        records: result.records,
                    },
                    result.skipped,
                ))
            }
        })
        .buffered(options.max_concurrent_files.max(1))
        .try_collect()
        .await?;

    let skipped = results.iter().map(|(_, skipped)| skipped).sum();
    let files = results.into_iter().map(|(file, _)| file).collect();
    let dataset = Dataset { files, skipped };

    info!(
        dataset = T::DATASET,
        records = dataset.len(),
        skipped = dataset.skipped,
        "Dataset read"
    );

    Ok(dataset)
}
