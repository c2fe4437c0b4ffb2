//! Pipeline orchestration.
//!
//! Two stages run against a pair of storage roots:
//!
//! - **catalog** reads song catalog records and publishes `songs` and
//!   `artists`
//! - **events** reads usage logs and publishes `users`, `time` and
//!   `songplays`
//!
//! The events stage joins plays against the published Songs table, so it
//! needs a [`SongsHandle`]. Running both stages hands the handle over in
//! memory; running the events stage alone loads it from the sink and fails
//! with [`PipelineError::DependencyNotReady`] when Songs was never
//! published.

mod handle;

pub use handle::SongsHandle;

use clap::ValueEnum;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::spawn_blocking;
use tracing::{info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{PipelineError, SkipBudgetExceededSnafu, TaskJoinSnafu};
use crate::metrics::events::{JoinCompleted, RecordsSkipped};
use crate::model::{CatalogRecord, UsageEvent};
use crate::sink::parquet::ParquetWriterConfig;
use crate::sink::{ParquetSink, ParquetSinkOptions, PublishedTable, TableSink};
use crate::source::{Dataset, FilePattern, ReadOptions, read_dataset};
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::transform::{
    SongIndex, derive_artists, derive_songplays, derive_songs, derive_time, derive_users,
    select_plays,
};

/// Which stages to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Catalog stage followed by the events stage.
    #[default]
    All,
    /// Only publish `songs` and `artists`.
    Catalog,
    /// Only publish `users`, `time` and `songplays`.
    Events,
}

/// Statistics from a pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub catalog_records: usize,
    pub catalog_skipped: usize,
    pub events_read: usize,
    pub events_skipped: usize,
    pub plays: usize,
    /// Play events without a usable `ts`; they still count towards Users.
    pub plays_skipped: usize,
    pub songplays_matched: usize,
    pub songplays_unmatched: usize,
    /// Published tables in publish order.
    pub tables: Vec<PublishedTable>,
}

impl PipelineStats {
    /// Rows published for `table`, if it was written in this run.
    pub fn rows(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .find(|t| t.table() == table)
            .map(PublishedTable::rows)
    }

    /// Number of files written across all tables.
    pub fn files_written(&self) -> usize {
        self.tables.iter().map(|t| t.files().len()).sum()
    }
}

/// The pipeline: input storage, output sink and settings.
pub struct Pipeline {
    config: Config,
    input: StorageProviderRef,
    sink: ParquetSink,
}

impl Pipeline {
    /// Validate `config` and connect to both storage roots.
    pub async fn new(config: Config) -> Result<Self, PipelineError> {
        config.validate()?;

        let options = config.storage_options();
        let input =
            StorageProvider::for_url_with_options(&config.input.root, options.clone()).await?;
        let output = StorageProvider::for_url_with_options(&config.output.root, options).await?;

        info!(input = input.url(), output = output.url(), "Storage initialized");

        let sink = ParquetSink::new(Arc::new(output), sink_options(&config));
        Ok(Self {
            config,
            input: Arc::new(input),
            sink,
        })
    }

    /// The sink tables are published to.
    pub fn sink(&self) -> &ParquetSink {
        &self.sink
    }

    /// Run the requested stages.
    pub async fn run(&self, stage: Stage) -> Result<PipelineStats, PipelineError> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();

        match stage {
            Stage::All => {
                let songs = self.run_catalog(&mut stats).await?;
                self.run_events(&songs, &mut stats).await?;
            }
            Stage::Catalog => {
                self.run_catalog(&mut stats).await?;
            }
            Stage::Events => {
                let songs = SongsHandle::load(&self.sink).await?;
                self.run_events(&songs, &mut stats).await?;
            }
        }

        info!(
            ?stage,
            tables = stats.tables.len(),
            files = stats.files_written(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );
        Ok(stats)
    }

    /// Publish `songs` and `artists` from the song catalog.
    pub async fn run_catalog(
        &self,
        stats: &mut PipelineStats,
    ) -> Result<SongsHandle, PipelineError> {
        let pattern = FilePattern::parse(&self.config.input.catalog_pattern)?;
        let catalog: Dataset<CatalogRecord> =
            read_dataset(self.input.clone(), &pattern, self.read_options()).await?;
        self.check_skipped(catalog.skipped)?;

        stats.catalog_records = catalog.len();
        stats.catalog_skipped = catalog.skipped;

        let catalog = Arc::new(catalog);
        let songs_task = spawn_blocking({
            let catalog = catalog.clone();
            move || derive_songs(catalog.records())
        });
        let artists_task = spawn_blocking(move || derive_artists(catalog.records()));
        let (songs, artists) = tokio::try_join!(songs_task, artists_task).context(TaskJoinSnafu)?;

        let songs = Arc::new(songs);
        let (songs_table, artists_table) = tokio::try_join!(
            self.sink.write_table(songs.clone()),
            self.sink.write_table(Arc::new(artists)),
        )?;
        stats.tables.push(songs_table);
        stats.tables.push(artists_table);

        Ok(SongsHandle::published(songs))
    }

    /// Publish `users`, `time` and `songplays` from the usage logs.
    pub async fn run_events(
        &self,
        songs: &SongsHandle,
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        let pattern = FilePattern::parse(&self.config.input.events_pattern)?;
        let events: Dataset<UsageEvent> =
            read_dataset(self.input.clone(), &pattern, self.read_options()).await?;
        self.check_skipped(events.skipped)?;

        stats.events_read = events.len();
        stats.events_skipped = events.skipped;
        if songs.is_empty() {
            warn!("Songs table is empty, no play will match");
        }

        let events = Arc::new(events);
        let users_task = spawn_blocking({
            let events = events.clone();
            move || derive_users(events.records())
        });
        let time_task = spawn_blocking({
            let events = events.clone();
            move || derive_time(&select_plays(&events).plays)
        });
        let songplays_task = spawn_blocking({
            let songs = songs.clone();
            let events = events.clone();
            move || {
                let index = SongIndex::build(songs.songs());
                let selected = select_plays(&events);
                let (rows, join) = derive_songplays(&selected.plays, &index);
                (selected.plays.len(), selected.skipped, rows, join)
            }
        });

        let (users, time, (plays, plays_skipped, songplays, join)) =
            tokio::try_join!(users_task, time_task, songplays_task).context(TaskJoinSnafu)?;

        if plays_skipped > 0 {
            emit!(RecordsSkipped {
                dataset: "plays",
                count: plays_skipped as u64,
            });
            warn!(plays_skipped, "Plays without a usable timestamp were skipped");
        }
        self.check_skipped(events.skipped + plays_skipped)?;

        emit!(JoinCompleted {
            matched: join.matched as u64,
            unmatched: join.unmatched as u64,
        });
        info!(
            plays,
            songs = songs.len(),
            matched = join.matched,
            unmatched = join.unmatched,
            "Joined plays against songs"
        );
        stats.plays = plays;
        stats.plays_skipped = plays_skipped;
        stats.songplays_matched = join.matched;
        stats.songplays_unmatched = join.unmatched;

        let (users_table, time_table, songplays_table) = tokio::try_join!(
            self.sink.write_table(Arc::new(users)),
            self.sink.write_table(Arc::new(time)),
            self.sink.write_table(Arc::new(songplays)),
        )?;
        stats.tables.push(users_table);
        stats.tables.push(time_table);
        stats.tables.push(songplays_table);

        Ok(())
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions {
            compression: self.config.input.compression,
            max_concurrent_files: self.config.input.max_concurrent_files,
        }
    }

    fn check_skipped(&self, skipped: usize) -> Result<(), PipelineError> {
        let limit = self.config.error_handling.max_skipped_records;
        if skipped > 0 {
            warn!(skipped, limit, "Malformed records were skipped");
        }
        ensure!(
            limit == 0 || skipped <= limit,
            SkipBudgetExceededSnafu { skipped, limit }
        );
        Ok(())
    }
}

fn sink_options(config: &Config) -> ParquetSinkOptions {
    let output = &config.output;
    ParquetSinkOptions {
        writer: ParquetWriterConfig::default()
            .with_file_size_mb(output.file_size_mb)
            .with_compression(output.compression),
        batch_size: output.batch_size,
        max_concurrent_uploads: output.max_concurrent_uploads,
    }
}

/// Build a pipeline from `config` and run `stage`.
pub async fn run_pipeline(config: Config, stage: Stage) -> Result<PipelineStats, PipelineError> {
    Pipeline::new(config).await?.run(stage).await
}
