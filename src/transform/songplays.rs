//! Songplays derivation: plays left-joined against the song catalog.

use chrono::Datelike;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::events::{Play, month_name};
use crate::model::{SongRow, SongplayRow, TotalF64};

/// Bits reserved for the row position inside a file.
const ROW_BITS: u32 = 33;

/// Surrogate id of a play: unique and increasing within a file.
pub fn songplay_id(file_index: usize, row: usize) -> i64 {
    ((file_index as i64) << ROW_BITS) + row as i64
}

type SongKey = (String, String, TotalF64);
type SongRef = (String, Option<String>);

/// Exact-match lookup from (artist name, title, duration) to a song.
#[derive(Debug, Default)]
pub struct SongIndex {
    by_key: HashMap<SongKey, SongRef>,
}

impl SongIndex {
    /// Index songs by their join key.
    ///
    /// Songs with a null key component are not indexed. When several songs
    /// share a key, the one with the smallest `song_id` is used.
    pub fn build<'a>(songs: impl IntoIterator<Item = &'a SongRow>) -> Self {
        let mut by_key: HashMap<SongKey, SongRef> = HashMap::new();

        for song in songs {
            let Some(key) = join_key(
                song.artist_name.as_deref(),
                song.title.as_deref(),
                song.duration,
            ) else {
                continue;
            };

            match by_key.entry(key) {
                Entry::Occupied(mut entry) => {
                    if song.song_id < entry.get().0 {
                        entry.insert((song.song_id.clone(), song.artist_id.clone()));
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert((song.song_id.clone(), song.artist_id.clone()));
                }
            }
        }

        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// `(song_id, artist_id)` of the song matching a play, if any.
    pub fn lookup(
        &self,
        artist: Option<&str>,
        song: Option<&str>,
        length: Option<f64>,
    ) -> Option<(&str, Option<&str>)> {
        let key = join_key(artist, song, length)?;
        self.by_key
            .get(&key)
            .map(|(song_id, artist_id)| (song_id.as_str(), artist_id.as_deref()))
    }
}

fn join_key(artist: Option<&str>, title: Option<&str>, duration: Option<f64>) -> Option<SongKey> {
    let duration = duration.filter(|d| !d.is_nan())?;
    Some((artist?.to_string(), title?.to_string(), TotalF64(duration)))
}

/// Counts of plays with and without a catalog match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub matched: usize,
    pub unmatched: usize,
}

/// Join every play against the catalog, keeping plays without a match.
///
/// Exactly one row is produced per play, in play order.
pub fn derive_songplays(plays: &[Play<'_>], index: &SongIndex) -> (Vec<SongplayRow>, JoinStats) {
    let mut stats = JoinStats::default();

    let rows = plays
        .iter()
        .map(|play| {
            let event = play.event;
            let matched = index.lookup(
                event.artist.as_deref(),
                event.song.as_deref(),
                event.length,
            );
            match matched {
                Some(_) => stats.matched += 1,
                None => stats.unmatched += 1,
            }

            SongplayRow {
                songplay_id: songplay_id(play.file_index, play.row),
                timestamp: play.datetime,
                user_id: event.user_id.clone(),
                level: event.level.clone(),
                song_id: matched.map(|(song_id, _)| song_id.to_string()),
                artist_id: matched.and_then(|(_, artist_id)| artist_id.map(str::to_string)),
                session_id: event.session_id,
                location: event.location.clone(),
                user_agent: event.user_agent.clone(),
                month: month_name(play.datetime),
                year: play.datetime.year(),
            }
        })
        .collect();

    (rows, stats)
}
