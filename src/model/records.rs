//! Raw source records.

use chrono::{DateTime, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::source::{FieldKind, SourceRecord};

/// One entry of the song catalog dataset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogRecord {
    #[serde(deserialize_with = "identifier")]
    pub song_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl SourceRecord for CatalogRecord {
    const DATASET: &'static str = "catalog";
    const FIELDS: &'static [(&'static str, FieldKind)] = &[
        ("song_id", FieldKind::Text),
        ("title", FieldKind::Text),
        ("artist_id", FieldKind::Text),
        ("artist_name", FieldKind::Text),
        ("artist_location", FieldKind::Text),
        ("artist_latitude", FieldKind::Float),
        ("artist_longitude", FieldKind::Float),
        ("year", FieldKind::Integer),
        ("duration", FieldKind::Float),
    ];
}

/// The song key: present, a string and not blank.
fn identifier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = String::deserialize(deserializer)?;
    if value.trim().is_empty() {
        return Err(D::Error::custom("identifier is blank"));
    }
    Ok(value)
}

/// One entry of the application usage log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageEvent {
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default, rename = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, rename = "lastName")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub length: Option<f64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "userAgent")]
    pub user_agent: Option<String>,
}

impl UsageEvent {
    /// Page value marking a song play.
    pub const PLAY_PAGE: &'static str = "NextSong";

    pub fn is_play(&self) -> bool {
        self.page.as_deref() == Some(Self::PLAY_PAGE)
    }

    /// `ts` truncated to whole seconds, as a naive UTC date-time.
    ///
    /// `None` when `ts` is missing or outside the representable range.
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        let ts = self.ts?;
        DateTime::from_timestamp(ts.div_euclid(1000), 0).map(|dt| dt.naive_utc())
    }
}

impl SourceRecord for UsageEvent {
    const DATASET: &'static str = "events";
    const FIELDS: &'static [(&'static str, FieldKind)] = &[
        ("userId", FieldKind::Text),
        ("firstName", FieldKind::Text),
        ("lastName", FieldKind::Text),
        ("gender", FieldKind::Text),
        ("level", FieldKind::Text),
        ("page", FieldKind::Text),
        ("artist", FieldKind::Text),
        ("song", FieldKind::Text),
        ("length", FieldKind::Float),
        ("ts", FieldKind::Integer),
        ("sessionId", FieldKind::Integer),
        ("location", FieldKind::Text),
        ("userAgent", FieldKind::Text),
    ];
}
