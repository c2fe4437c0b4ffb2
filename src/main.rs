//! sonata: load the song catalog and listening logs into partitioned
//! Parquet tables.
//!
//! Without a configuration file the built-in input and output roots are
//! used; AWS credentials come from the environment.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sonata::error::{ConfigSnafu, PipelineError};
use sonata::{Config, Stage, run_pipeline};

/// Song catalog and activity logs to Parquet tables.
#[derive(Parser, Debug)]
#[command(name = "sonata")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stages to run.
    #[arg(long, value_enum, default_value_t = Stage::All)]
    stage: Stage,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("sonata starting");

    let config = build_config(&args)?;
    let stats = run_pipeline(config, args.stage).await?;

    info!("Pipeline completed successfully");
    info!(
        "  Catalog records: {} ({} skipped)",
        stats.catalog_records, stats.catalog_skipped
    );
    info!(
        "  Events: {} ({} skipped), plays: {} ({} without timestamp)",
        stats.events_read, stats.events_skipped, stats.plays, stats.plays_skipped
    );
    info!(
        "  Songplays matched: {}, unmatched: {}",
        stats.songplays_matched, stats.songplays_unmatched
    );
    for table in &stats.tables {
        info!(
            "  Table {}: {} rows in {} files",
            table.table(),
            table.rows(),
            table.files().len()
        );
    }

    Ok(())
}

/// Build configuration from arguments.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    let config = match &args.config {
        Some(path) => Config::from_file(path).context(ConfigSnafu)?,
        None => Config::default(),
    };
    config.validate().context(ConfigSnafu)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "sonata",
            "--config",
            "sonata.yaml",
            "--stage",
            "events",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("sonata.yaml")));
        assert_eq!(args.stage, Stage::Events);
        assert_eq!(args.log_level, "debug");

        let args = Args::try_parse_from(["sonata"]).unwrap();
        assert_eq!(args.stage, Stage::All);
        assert!(Args::try_parse_from(["sonata", "--dry-run"]).is_err());
    }
}
