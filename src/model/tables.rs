//! Rows of the five analytical tables and their Parquet layout.

use arrow::array::{
    ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, NaiveDateTime};
use std::sync::{Arc, LazyLock};

use super::{TotalF64, total};
use crate::error::{DecodeBatchSnafu, SinkError};
use crate::sink::TableRow;
use crate::sink::columns::{ColumnReader, PartitionValues, opt_string, opt_value};

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, None)
}

fn micros(datetime: &NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_micros()
}

fn from_micros(table: &'static str, value: i64) -> Result<NaiveDateTime, SinkError> {
    DateTime::from_timestamp_micros(value)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| {
            DecodeBatchSnafu {
                table,
                message: format!("timestamp {value} is out of range"),
            }
            .build()
        })
}

fn required(table: &'static str, column: &str, value: Option<String>) -> Result<String, SinkError> {
    value.ok_or_else(|| {
        DecodeBatchSnafu {
            table,
            message: format!("{column} is null"),
        }
        .build()
    })
}

/// Sort key form of an optional float column.
pub type FloatKey = Option<TotalF64>;

// ============ Songs ============

/// One song of the catalog, unique by `song_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: Option<String>,
    pub artist_name: Option<String>,
    pub artist_id: Option<String>,
    pub year: Option<i64>,
    pub duration: Option<f64>,
}

impl SongRow {
    /// Order used to pick one row among duplicates of a `song_id`.
    pub fn preference_key(
        &self,
    ) -> (Option<&str>, Option<&str>, Option<&str>, Option<i64>, FloatKey) {
        (
            self.title.as_deref(),
            self.artist_id.as_deref(),
            self.artist_name.as_deref(),
            self.year,
            total(self.duration),
        )
    }
}

static SONG_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("song_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, true),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("duration", DataType::Float64, true),
    ]))
});

impl TableRow for SongRow {
    const TABLE: &'static str = "songs";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "artist_id"];

    fn file_schema() -> SchemaRef {
        SONG_SCHEMA.clone()
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![
            self.year.map(|y| y.to_string()),
            self.artist_id.clone(),
        ]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.song_id.as_str()),
            )),
            Arc::new(rows.iter().map(|r| r.title.as_deref()).collect::<StringArray>()),
            Arc::new(
                rows.iter()
                    .map(|r| r.artist_name.as_deref())
                    .collect::<StringArray>(),
            ),
            Arc::new(rows.iter().map(|r| r.duration).collect::<Float64Array>()),
        ];
        RecordBatch::try_new(Self::file_schema(), columns)
    }

    fn from_batch(
        columns: &ColumnReader<'_>,
        partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError> {
        let song_ids = columns.strings("song_id")?;
        let titles = columns.strings("title")?;
        let artist_names = columns.strings("artist_name")?;
        let durations = columns.float64s("duration")?;
        let year = partition.parse::<i64>("year")?;
        let artist_id = partition.text("artist_id")?;

        (0..columns.num_rows())
            .map(|i| {
                Ok(SongRow {
                    song_id: required(Self::TABLE, "song_id", opt_string(song_ids, i))?,
                    title: opt_string(titles, i),
                    artist_name: opt_string(artist_names, i),
                    artist_id: artist_id.clone(),
                    year,
                    duration: opt_value(durations, i),
                })
            })
            .collect()
    }
}

// ============ Artists ============

/// One distinct artist variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ArtistRow {
    /// Total order over every column.
    pub fn sort_key(&self) -> (Option<&str>, Option<&str>, Option<&str>, FloatKey, FloatKey) {
        (
            self.artist_id.as_deref(),
            self.name.as_deref(),
            self.location.as_deref(),
            total(self.latitude),
            total(self.longitude),
        )
    }
}

static ARTIST_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("latitude", DataType::Float64, true),
        Field::new("longitude", DataType::Float64, true),
    ]))
});

impl TableRow for ArtistRow {
    const TABLE: &'static str = "artists";

    fn file_schema() -> SchemaRef {
        ARTIST_SCHEMA.clone()
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(
                rows.iter()
                    .map(|r| r.artist_id.as_deref())
                    .collect::<StringArray>(),
            ),
            Arc::new(rows.iter().map(|r| r.name.as_deref()).collect::<StringArray>()),
            Arc::new(
                rows.iter()
                    .map(|r| r.location.as_deref())
                    .collect::<StringArray>(),
            ),
            Arc::new(rows.iter().map(|r| r.latitude).collect::<Float64Array>()),
            Arc::new(rows.iter().map(|r| r.longitude).collect::<Float64Array>()),
        ];
        RecordBatch::try_new(Self::file_schema(), columns)
    }

    fn from_batch(
        columns: &ColumnReader<'_>,
        _partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError> {
        let artist_ids = columns.strings("artist_id")?;
        let names = columns.strings("name")?;
        let locations = columns.strings("location")?;
        let latitudes = columns.float64s("latitude")?;
        let longitudes = columns.float64s("longitude")?;

        (0..columns.num_rows())
            .map(|i| {
                Ok(ArtistRow {
                    artist_id: opt_string(artist_ids, i),
                    name: opt_string(names, i),
                    location: opt_string(locations, i),
                    latitude: opt_value(latitudes, i),
                    longitude: opt_value(longitudes, i),
                })
            })
            .collect()
    }
}

// ============ Users ============

/// One distinct user state; a user appears once per subscription level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserRow {
    pub user_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
}

static USER_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, true),
        Field::new("first_name", DataType::Utf8, true),
        Field::new("last_name", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
    ]))
});

impl TableRow for UserRow {
    const TABLE: &'static str = "users";

    fn file_schema() -> SchemaRef {
        USER_SCHEMA.clone()
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let text = |f: fn(&UserRow) -> Option<&str>| -> ArrayRef {
            Arc::new(rows.iter().map(|r| f(r)).collect::<StringArray>())
        };
        let columns = vec![
            text(|r| r.user_id.as_deref()),
            text(|r| r.first_name.as_deref()),
            text(|r| r.last_name.as_deref()),
            text(|r| r.gender.as_deref()),
            text(|r| r.level.as_deref()),
        ];
        RecordBatch::try_new(Self::file_schema(), columns)
    }

    fn from_batch(
        columns: &ColumnReader<'_>,
        _partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError> {
        let user_ids = columns.strings("user_id")?;
        let first_names = columns.strings("first_name")?;
        let last_names = columns.strings("last_name")?;
        let genders = columns.strings("gender")?;
        let levels = columns.strings("level")?;

        Ok((0..columns.num_rows())
            .map(|i| UserRow {
                user_id: opt_string(user_ids, i),
                first_name: opt_string(first_names, i),
                last_name: opt_string(last_names, i),
                gender: opt_string(genders, i),
                level: opt_string(levels, i),
            })
            .collect())
    }
}

// ============ Time ============

/// Calendar decomposition of one play timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRow {
    pub datetime: NaiveDateTime,
    pub hour: i32,
    /// Short weekday name, e.g. `Thu`.
    pub day_of_week: String,
    pub day_of_month: i32,
    pub day_of_year: i32,
    /// Full month name, e.g. `November`.
    pub month: String,
    pub year: i32,
    /// ISO-8601 week number.
    pub week_of_year: i32,
}

static TIME_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("datetime", timestamp_type(), false),
        Field::new("hour", DataType::Int32, false),
        Field::new("day_of_week", DataType::Utf8, false),
        Field::new("day_of_month", DataType::Int32, false),
        Field::new("day_of_year", DataType::Int32, false),
        Field::new("week_of_year", DataType::Int32, false),
    ]))
});

impl TableRow for TimeRow {
    const TABLE: &'static str = "time";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "month"];

    fn file_schema() -> SchemaRef {
        TIME_SCHEMA.clone()
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![Some(self.year.to_string()), Some(self.month.clone())]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let int = |f: fn(&TimeRow) -> i32| -> ArrayRef {
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| f(r))))
        };
        let columns = vec![
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                rows.iter().map(|r| micros(&r.datetime)),
            )) as ArrayRef,
            int(|r| r.hour),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.day_of_week.as_str()),
            )),
            int(|r| r.day_of_month),
            int(|r| r.day_of_year),
            int(|r| r.week_of_year),
        ];
        RecordBatch::try_new(Self::file_schema(), columns)
    }

    fn from_batch(
        columns: &ColumnReader<'_>,
        partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError> {
        let datetimes = columns.timestamps("datetime")?;
        let hours = columns.int32s("hour")?;
        let weekdays = columns.strings("day_of_week")?;
        let days_of_month = columns.int32s("day_of_month")?;
        let days_of_year = columns.int32s("day_of_year")?;
        let weeks = columns.int32s("week_of_year")?;
        let year = partition.parse::<i32>("year")?;
        let year = year.ok_or_else(|| {
            DecodeBatchSnafu {
                table: Self::TABLE,
                message: "year partition is null",
            }
            .build()
        })?;
        let month = required(Self::TABLE, "month", partition.text("month")?)?;

        (0..columns.num_rows())
            .map(|i| {
                Ok(TimeRow {
                    datetime: from_micros(Self::TABLE, datetimes.value(i))?,
                    hour: hours.value(i),
                    day_of_week: weekdays.value(i).to_string(),
                    day_of_month: days_of_month.value(i),
                    day_of_year: days_of_year.value(i),
                    month: month.clone(),
                    year,
                    week_of_year: weeks.value(i),
                })
            })
            .collect()
    }
}

// ============ Songplays ============

/// One play event joined against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct SongplayRow {
    pub songplay_id: i64,
    pub timestamp: NaiveDateTime,
    pub user_id: Option<String>,
    pub level: Option<String>,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: Option<i64>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
    /// Full month name of `timestamp`.
    pub month: String,
    pub year: i32,
}

static SONGPLAY_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("songplay_id", DataType::Int64, false),
        Field::new("timestamp", timestamp_type(), false),
        Field::new("user_id", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
    ]))
});

impl TableRow for SongplayRow {
    const TABLE: &'static str = "songplays";
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "month"];

    fn file_schema() -> SchemaRef {
        SONGPLAY_SCHEMA.clone()
    }

    fn partition_values(&self) -> Vec<Option<String>> {
        vec![Some(self.year.to_string()), Some(self.month.clone())]
    }

    fn to_batch(rows: &[&Self]) -> Result<RecordBatch, ArrowError> {
        let text = |f: fn(&SongplayRow) -> Option<&str>| -> ArrayRef {
            Arc::new(rows.iter().map(|r| f(r)).collect::<StringArray>())
        };
        let columns = vec![
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.songplay_id),
            )) as ArrayRef,
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                rows.iter().map(|r| micros(&r.timestamp)),
            )),
            text(|r| r.user_id.as_deref()),
            text(|r| r.level.as_deref()),
            text(|r| r.song_id.as_deref()),
            text(|r| r.artist_id.as_deref()),
            Arc::new(rows.iter().map(|r| r.session_id).collect::<Int64Array>()),
            text(|r| r.location.as_deref()),
            text(|r| r.user_agent.as_deref()),
        ];
        RecordBatch::try_new(Self::file_schema(), columns)
    }

    fn from_batch(
        columns: &ColumnReader<'_>,
        partition: &PartitionValues<'_>,
    ) -> Result<Vec<Self>, SinkError> {
        let ids = columns.int64s("songplay_id")?;
        let timestamps = columns.timestamps("timestamp")?;
        let user_ids = columns.strings("user_id")?;
        let levels = columns.strings("level")?;
        let song_ids = columns.strings("song_id")?;
        let artist_ids = columns.strings("artist_id")?;
        let session_ids = columns.int64s("session_id")?;
        let locations = columns.strings("location")?;
        let user_agents = columns.strings("user_agent")?;
        let year = partition.parse::<i32>("year")?.ok_or_else(|| {
            DecodeBatchSnafu {
                table: Self::TABLE,
                message: "year partition is null",
            }
            .build()
        })?;
        let month = required(Self::TABLE, "month", partition.text("month")?)?;

        (0..columns.num_rows())
            .map(|i| {
                Ok(SongplayRow {
                    songplay_id: ids.value(i),
                    timestamp: from_micros(Self::TABLE, timestamps.value(i))?,
                    user_id: opt_string(user_ids, i),
                    level: opt_string(levels, i),
                    song_id: opt_string(song_ids, i),
                    artist_id: opt_string(artist_ids, i),
                    session_id: opt_value(session_ids, i),
                    location: opt_string(locations, i),
                    user_agent: opt_string(user_agents, i),
                    month: month.clone(),
                    year,
                })
            })
            .collect()
    }
}
