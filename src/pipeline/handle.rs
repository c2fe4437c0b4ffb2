//! Durability handle for the Songs table.

use std::sync::Arc;
use tracing::info;

use crate::error::PipelineError;
use crate::model::SongRow;
use crate::sink::{ParquetSink, TableRow, TableSink};

/// Proof that the Songs table is durably published, carrying its rows.
///
/// The Songplays join only accepts a `SongsHandle`. One exists either
/// because this process just published Songs, or because a published
/// snapshot was read back under its `_SUCCESS` marker.
#[derive(Debug, Clone)]
pub struct SongsHandle {
    songs: Arc<Vec<SongRow>>,
}

impl SongsHandle {
    /// Handle for rows this process has just published.
    pub(super) fn published(songs: Arc<Vec<SongRow>>) -> Self {
        Self { songs }
    }

    /// Read the published Songs table back from the sink.
    ///
    /// Fails with [`PipelineError::DependencyNotReady`] when the table has
    /// no publish marker.
    pub async fn load(sink: &ParquetSink) -> Result<Self, PipelineError> {
        let songs: Vec<SongRow> = sink.read_table().await?;
        info!(
            table = SongRow::TABLE,
            rows = songs.len(),
            "Loaded published songs"
        );
        Ok(Self {
            songs: Arc::new(songs),
        })
    }

    pub fn songs(&self) -> &[SongRow] {
        &self.songs
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}
