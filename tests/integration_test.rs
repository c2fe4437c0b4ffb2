//! Integration tests for sonata

use sonata::error::PipelineError;
use sonata::model::{ArtistRow, SongRow, SongplayRow, TimeRow, UserRow};
use sonata::sink::partition::DEFAULT_PARTITION;
use sonata::sink::{Manifest, SUCCESS_MARKER, TableSink};
use sonata::{Config, Pipeline, Stage};
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

const CATALOG: &[(&str, &str)] = &[
    (
        "song_data/A/B/C/TRAAAAW128F429D538.json",
        r#"{"num_songs": 1, "artist_id": "AR1", "artist_latitude": 59.9, "artist_longitude": 10.7, "artist_location": "Oslo", "artist_name": "Band", "song_id": "SOA", "title": "Intro", "duration": 200.5, "year": 2001}"#,
    ),
    (
        "song_data/A/B/D/TRAAABD128F429CF47.json",
        r#"{"num_songs": 1, "artist_id": "AR2", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Duo", "song_id": "SOB", "title": "Outro", "duration": 150.0, "year": 0}"#,
    ),
    (
        "song_data/A/C/A/TRAAADZ128F9348C2E.json",
        r#"{"num_songs": 1, "artist_id": "AR1", "artist_latitude": 59.9, "artist_longitude": 10.7, "artist_location": "Oslo", "artist_name": "Band", "song_id": "SOA", "title": "Intro (Live)", "duration": 231.2, "year": 2001}"#,
    ),
    // Wrong depth: not part of the catalog
    (
        "song_data/A/TRAAAXX128F000000.json",
        r#"{"artist_id": "AR9", "artist_name": "Stray", "song_id": "SOZ", "title": "Lost", "duration": 1.0, "year": 1999}"#,
    ),
];

const EVENTS_DAY_ONE: &str = concat!(
    r#"{"artist":"Band","auth":"Logged In","firstName":"Lily","gender":"F","itemInSession":0,"lastName":"Koch","length":200.5,"level":"free","location":"Chicago","method":"PUT","page":"NextSong","registration":1541048010796.0,"sessionId":139,"song":"Intro","status":200,"ts":1541106106796,"userAgent":"Mozilla/5.0","userId":"10"}"#,
    "\n",
    r#"{"artist":null,"auth":"Logged In","firstName":"Lily","gender":"F","itemInSession":1,"lastName":"Koch","length":null,"level":"free","location":"Chicago","method":"GET","page":"Home","registration":1541048010796.0,"sessionId":139,"song":null,"status":200,"ts":1541106200000,"userAgent":"Mozilla/5.0","userId":"10"}"#,
    "\n",
    r#"{"artist":"Nobody","auth":"Logged In","firstName":"Jayden","gender":"M","itemInSession":0,"lastName":"Fox","length":100.0,"level":"paid","location":"Denver","method":"PUT","page":"NextSong","registration":1541033612796.0,"sessionId":52,"song":"Unknown","status":200,"ts":1541106352796,"userAgent":"curl","userId":26}"#,
    "\n",
    "{not json\n",
);

const EVENTS_DAY_TWO: &str = concat!(
    r#"{"artist":"Duo","auth":"Logged In","firstName":"Lily","gender":"F","itemInSession":4,"lastName":"Koch","length":150.0,"level":"paid","location":"Chicago","method":"PUT","page":"NextSong","registration":1541048010796.0,"sessionId":200,"song":"Outro","status":200,"ts":1541203000000,"userAgent":"Mozilla/5.0","userId":"10"}"#,
    "\n",
);

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn write_inputs(root: &Path) {
    for (path, contents) in CATALOG {
        write_file(root, path, contents);
    }
    write_file(root, "log_data/2018-11-01-events.json", EVENTS_DAY_ONE);
    write_file(root, "log_data/2018-11-02-events.json", EVENTS_DAY_TWO);
}

struct Fixture {
    input: TempDir,
    output: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let input = TempDir::new().unwrap();
        write_inputs(input.path());
        Self {
            input,
            output: TempDir::new().unwrap(),
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.input.root = self.input.path().to_str().unwrap().to_string();
        config.output.root = self.output.path().to_str().unwrap().to_string();
        config
    }

    async fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config()).await.unwrap()
    }

    fn output_file(&self, relative: &str) -> std::path::PathBuf {
        self.output.path().join(relative)
    }

    fn manifest(&self, table: &str) -> Manifest {
        let bytes = std::fs::read(self.output_file(&format!("{table}/{SUCCESS_MARKER}"))).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

mod full_run_tests {
    use super::*;

    #[tokio::test]
    async fn test_run_publishes_all_tables() {
        let fixture = Fixture::new();
        let stats = fixture.pipeline().await.run(Stage::All).await.unwrap();

        assert_eq!(stats.catalog_records, 3);
        assert_eq!(stats.catalog_skipped, 0);
        assert_eq!(stats.events_read, 4);
        assert_eq!(stats.events_skipped, 1);
        assert_eq!(stats.plays, 3);

        assert_eq!(stats.rows("songs"), Some(2));
        assert_eq!(stats.rows("artists"), Some(2));
        assert_eq!(stats.rows("users"), Some(3));
        assert_eq!(stats.rows("time"), Some(3));
        assert_eq!(stats.rows("songplays"), Some(3));

        for table in ["songs", "artists", "users", "time", "songplays"] {
            assert!(fixture.output_file(&format!("{table}/{SUCCESS_MARKER}")).exists());
        }
    }

    #[tokio::test]
    async fn test_songs_are_unique_and_deterministic() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline().await;
        pipeline.run(Stage::Catalog).await.unwrap();

        let mut songs: Vec<SongRow> = pipeline.sink().read_table().await.unwrap();
        songs.sort_by(|a, b| a.song_id.cmp(&b.song_id));

        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].song_id, "SOA");
        assert_eq!(songs[0].title.as_deref(), Some("Intro"));
        assert_eq!(songs[0].artist_id.as_deref(), Some("AR1"));
        assert_eq!(songs[0].year, Some(2001));
        assert_eq!(songs[0].duration, Some(200.5));
        assert_eq!(songs[1].song_id, "SOB");
        assert_eq!(songs[1].year, Some(0));

        let mut artists: Vec<ArtistRow> = pipeline.sink().read_table().await.unwrap();
        artists.sort_by(|a, b| a.artist_id.cmp(&b.artist_id));
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].name.as_deref(), Some("Band"));
        assert_eq!(artists[0].latitude, Some(59.9));
        assert_eq!(artists[1].location.as_deref(), Some(""));
        assert_eq!(artists[1].latitude, None);
    }

    #[tokio::test]
    async fn test_songplays_join_matches_and_misses() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline().await;
        let stats = pipeline.run(Stage::All).await.unwrap();
        assert_eq!(stats.songplays_matched, 2);
        assert_eq!(stats.songplays_unmatched, 1);

        let plays: Vec<SongplayRow> = pipeline.sink().read_table().await.unwrap();
        assert_eq!(plays.len(), 3);

        let ids: HashSet<i64> = plays.iter().map(|p| p.songplay_id).collect();
        assert_eq!(ids.len(), plays.len());

        let play = |user: &str, at: &str| {
            plays
                .iter()
                .find(|p| {
                    p.user_id.as_deref() == Some(user)
                        && p.timestamp.format("%Y-%m-%d %H:%M:%S").to_string() == at
                })
                .unwrap_or_else(|| panic!("no play for user {user} at {at}"))
        };

        let first = play("10", "2018-11-01 21:01:46");
        assert_eq!(first.song_id.as_deref(), Some("SOA"));
        assert_eq!(first.artist_id.as_deref(), Some("AR1"));
        assert_eq!(first.session_id, Some(139));
        assert_eq!(first.level.as_deref(), Some("free"));
        assert_eq!(first.month, "November");
        assert_eq!(first.year, 2018);

        let unknown = play("26", "2018-11-01 21:05:52");
        assert_eq!(unknown.song_id, None);
        assert_eq!(unknown.artist_id, None);

        let upgraded = play("10", "2018-11-02 23:56:40");
        assert_eq!(upgraded.song_id.as_deref(), Some("SOB"));
        assert_eq!(upgraded.artist_id.as_deref(), Some("AR2"));
        assert_eq!(upgraded.level.as_deref(), Some("paid"));
    }

    #[tokio::test]
    async fn test_users_keep_level_changes() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline().await;
        pipeline.run(Stage::All).await.unwrap();

        let users: Vec<UserRow> = pipeline.sink().read_table().await.unwrap();
        let mut states: Vec<(String, String)> = users
            .iter()
            .map(|u| (u.user_id.clone().unwrap(), u.level.clone().unwrap()))
            .collect();
        states.sort();
        assert_eq!(
            states,
            vec![
                ("10".to_string(), "free".to_string()),
                ("10".to_string(), "paid".to_string()),
                ("26".to_string(), "paid".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_time_covers_every_play() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline().await;
        pipeline.run(Stage::All).await.unwrap();

        let time: Vec<TimeRow> = pipeline.sink().read_table().await.unwrap();
        let plays: Vec<SongplayRow> = pipeline.sink().read_table().await.unwrap();
        for play in &plays {
            assert!(time.iter().any(|t| t.datetime == play.timestamp));
        }

        let first = time
            .iter()
            .find(|t| t.datetime == plays.iter().map(|p| p.timestamp).min().unwrap())
            .unwrap();
        assert_eq!(first.hour, 21);
        assert_eq!(first.day_of_week, "Thu");
        assert_eq!(first.day_of_month, 1);
        assert_eq!(first.day_of_year, 305);
        assert_eq!(first.week_of_year, 44);
        assert_eq!(first.month, "November");
        assert_eq!(first.year, 2018);
    }
}

mod layout_tests {
    use super::*;

    #[tokio::test]
    async fn test_partition_directories() {
        let fixture = Fixture::new();
        fixture.pipeline().await.run(Stage::All).await.unwrap();

        assert!(
            fixture
                .output_file("songs/year=2001/artist_id=AR1/part-00000.parquet")
                .exists()
        );
        assert!(
            fixture
                .output_file("songs/year=0/artist_id=AR2/part-00000.parquet")
                .exists()
        );
        assert!(fixture.output_file("artists/part-00000.parquet").exists());
        assert!(fixture.output_file("users/part-00000.parquet").exists());
        assert!(
            fixture
                .output_file("time/year=2018/month=November/part-00000.parquet")
                .exists()
        );
        assert!(
            fixture
                .output_file("songplays/year=2018/month=November/part-00000.parquet")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_manifest_lists_every_file() {
        let fixture = Fixture::new();
        fixture.pipeline().await.run(Stage::All).await.unwrap();

        let manifest = fixture.manifest("songs");
        assert_eq!(manifest.table, "songs");
        assert_eq!(manifest.partition_columns, vec!["year", "artist_id"]);
        assert_eq!(manifest.total_rows, 2);
        assert_eq!(manifest.files.len(), 2);
        for file in &manifest.files {
            let on_disk = std::fs::metadata(fixture.output_file(&format!("songs/{}", file.path)))
                .unwrap();
            assert_eq!(on_disk.len() as usize, file.size);
        }
    }

    #[tokio::test]
    async fn test_rerun_replaces_tables_identically() {
        const TABLES: [&str; 5] = ["songs", "artists", "users", "time", "songplays"];

        let fixture = Fixture::new();
        fixture.pipeline().await.run(Stage::All).await.unwrap();

        let snapshot = |fixture: &Fixture| -> Vec<(Manifest, Vec<Vec<u8>>)> {
            TABLES
                .iter()
                .map(|table| {
                    let manifest = fixture.manifest(table);
                    let files = manifest
                        .files
                        .iter()
                        .map(|file| {
                            std::fs::read(fixture.output_file(&format!("{table}/{}", file.path)))
                                .unwrap()
                        })
                        .collect();
                    (manifest, files)
                })
                .collect()
        };
        let first = snapshot(&fixture);
        assert!(first.iter().all(|(manifest, _)| !manifest.files.is_empty()));

        // Leftovers from an earlier layout must not survive a publish
        write_file(
            fixture.output.path(),
            "songs/year=1990/artist_id=OLD/part-00000.parquet",
            "stale",
        );

        fixture.pipeline().await.run(Stage::All).await.unwrap();

        let second = snapshot(&fixture);
        for (table, (before, after)) in TABLES.iter().zip(first.iter().zip(&second)) {
            assert_eq!(before.0, after.0, "manifest of {table} changed");
            assert!(before.1 == after.1, "files of {table} changed");
        }
        assert!(
            !fixture
                .output_file("songs/year=1990/artist_id=OLD/part-00000.parquet")
                .exists()
        );
    }
}

mod missing_field_tests {
    use super::*;

    const EVENTS_WITHOUT_TS: &str = concat!(
        r#"{"artist":null,"auth":"Logged In","firstName":"Ava","gender":"F","itemInSession":0,"lastName":"Ray","length":null,"level":"free","location":"Austin","method":"GET","page":"Home","sessionId":7,"song":null,"status":200,"userAgent":"Mozilla/5.0","userId":"5"}"#,
        "\n",
        r#"{"artist":"Band","auth":"Logged In","firstName":"Ben","gender":"M","itemInSession":3,"lastName":"Cole","length":200.5,"level":"paid","location":"Austin","method":"PUT","page":"NextSong","sessionId":8,"song":"Intro","status":200,"ts":null,"userAgent":"Mozilla/5.0","userId":"7"}"#,
        "\n",
    );

    fn fixture() -> Fixture {
        let fixture = Fixture::new();
        write_file(
            fixture.input.path(),
            "log_data/2018-11-03-events.json",
            EVENTS_WITHOUT_TS,
        );
        write_file(
            fixture.input.path(),
            "song_data/A/B/E/TRAAAEE128F000000.json",
            r#"{"num_songs": 1, "artist_id": null, "artist_name": "Solo", "artist_location": "Lima", "song_id": "SOC", "title": "Alone", "duration": 99.0, "year": 1999}"#,
        );
        fixture
    }

    #[tokio::test]
    async fn test_events_without_ts_still_produce_users() {
        let fixture = fixture();
        let pipeline = fixture.pipeline().await;
        let stats = pipeline.run(Stage::All).await.unwrap();

        assert_eq!(stats.events_read, 6);
        assert_eq!(stats.events_skipped, 1);
        assert_eq!(stats.plays, 3);
        assert_eq!(stats.plays_skipped, 1);
        assert_eq!(stats.rows("songplays"), Some(3));
        assert_eq!(stats.rows("time"), Some(3));

        let users: Vec<UserRow> = pipeline.sink().read_table().await.unwrap();
        let home = users
            .iter()
            .find(|u| u.user_id.as_deref() == Some("5"))
            .unwrap();
        assert_eq!(home.first_name.as_deref(), Some("Ava"));
        assert_eq!(home.level.as_deref(), Some("free"));
        assert!(users.iter().any(|u| u.user_id.as_deref() == Some("7")));
    }

    #[tokio::test]
    async fn test_song_without_artist_id_is_kept() {
        let fixture = fixture();
        let pipeline = fixture.pipeline().await;
        let stats = pipeline.run(Stage::Catalog).await.unwrap();
        assert_eq!(stats.catalog_records, 4);
        assert_eq!(stats.catalog_skipped, 0);

        let songs: Vec<SongRow> = pipeline.sink().read_table().await.unwrap();
        let solo = songs.iter().find(|s| s.song_id == "SOC").unwrap();
        assert_eq!(solo.artist_id, None);
        assert_eq!(solo.title.as_deref(), Some("Alone"));
        assert!(
            fixture
                .output_file(&format!(
                    "songs/year=1999/artist_id={DEFAULT_PARTITION}/part-00000.parquet"
                ))
                .exists()
        );

        let artists: Vec<ArtistRow> = pipeline.sink().read_table().await.unwrap();
        let solo = artists.iter().find(|a| a.artist_id.is_none()).unwrap();
        assert_eq!(solo.name.as_deref(), Some("Solo"));
        assert_eq!(solo.location.as_deref(), Some("Lima"));
    }
}

mod stage_tests {
    use super::*;

    #[tokio::test]
    async fn test_events_stage_requires_published_songs() {
        let fixture = Fixture::new();
        let result = fixture.pipeline().await.run(Stage::Events).await;

        match result {
            Err(PipelineError::DependencyNotReady { table }) => assert_eq!(table, "songs"),
            other => panic!("Expected DependencyNotReady, got {other:?}"),
        }
        assert!(!fixture.output_file("songplays").exists());
    }

    #[tokio::test]
    async fn test_events_stage_after_catalog_stage() {
        let fixture = Fixture::new();
        fixture.pipeline().await.run(Stage::Catalog).await.unwrap();
        assert!(!fixture.output_file("users").exists());

        let stats = fixture.pipeline().await.run(Stage::Events).await.unwrap();
        assert_eq!(stats.rows("songs"), None);
        assert_eq!(stats.rows("songplays"), Some(3));
        assert_eq!(stats.songplays_matched, 2);
    }

    #[tokio::test]
    async fn test_unpublished_songs_block_events_stage() {
        let fixture = Fixture::new();
        fixture.pipeline().await.run(Stage::Catalog).await.unwrap();

        // A write interrupted before its marker leaves the table unpublished
        std::fs::remove_file(fixture.output_file(&format!("songs/{SUCCESS_MARKER}"))).unwrap();

        let result = fixture.pipeline().await.run(Stage::Events).await;
        assert!(matches!(
            result,
            Err(PipelineError::DependencyNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_skip_budget_exceeded() {
        let fixture = Fixture::new();
        write_file(
            fixture.input.path(),
            "log_data/2018-11-03-events.json",
            "garbage\n\"just text\"\n",
        );

        let mut config = fixture.config();
        config.error_handling.max_skipped_records = 2;
        let result = Pipeline::new(config).await.unwrap().run(Stage::All).await;

        match result {
            Err(PipelineError::SkipBudgetExceeded { skipped, limit }) => {
                assert_eq!(skipped, 3);
                assert_eq!(limit, 2);
            }
            other => panic!("Expected SkipBudgetExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_inputs_publish_empty_tables() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut config = Config::default();
        config.input.root = input.path().to_str().unwrap().to_string();
        config.output.root = output.path().to_str().unwrap().to_string();

        let stats = Pipeline::new(config).await.unwrap().run(Stage::All).await.unwrap();
        assert_eq!(stats.rows("songs"), Some(0));
        assert_eq!(stats.rows("artists"), Some(0));
        assert_eq!(stats.rows("songplays"), Some(0));
        assert!(output.path().join("songs").join(SUCCESS_MARKER).exists());
        assert!(output.path().join("artists/part-00000.parquet").exists());
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_config_from_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonata.yaml");
        std::fs::write(
            &path,
            r#"
input:
  root: "/data/raw"
output:
  root: "/data/lake"
  compression: zstd
error_handling:
  max_skipped_records: 10
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input.root, "/data/raw");
        assert_eq!(config.input.catalog_pattern, "song_data/*/*/*/*.json");
        assert_eq!(config.output.root, "/data/lake");
        assert_eq!(config.error_handling.max_skipped_records, 10);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.output.root = "  ".to_string();
        assert!(matches!(
            Pipeline::new(config).await,
            Err(PipelineError::Config { .. })
        ));
    }
}
