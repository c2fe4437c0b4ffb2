//! Songs and Artists derivations over catalog records.

use crate::model::{ArtistRow, CatalogRecord, SongRow};

/// Project catalog records into songs, one row per `song_id`.
///
/// When a `song_id` occurs more than once, the row with the smallest
/// (title, artist_id, artist_name, year, duration) is kept, nulls first, so
/// the choice does not depend on input order. Output is sorted by `song_id`.
pub fn derive_songs<'a>(records: impl IntoIterator<Item = &'a CatalogRecord>) -> Vec<SongRow> {
    let mut songs: Vec<SongRow> = records
        .into_iter()
        .map(|record| SongRow {
            song_id: record.song_id.clone(),
            title: record.title.clone(),
            artist_name: record.artist_name.clone(),
            artist_id: record.artist_id.clone(),
            year: record.year,
            duration: record.duration,
        })
        .collect();

    songs.sort_by(|a, b| {
        a.song_id
            .cmp(&b.song_id)
            .then_with(|| a.preference_key().cmp(&b.preference_key()))
    });
    songs.dedup_by(|later, first| later.song_id == first.song_id);
    songs
}

/// Distinct artist variants over all catalog records.
///
/// Rows that differ in any column are all kept, so one `artist_id` can
/// appear with several names or locations.
pub fn derive_artists<'a>(records: impl IntoIterator<Item = &'a CatalogRecord>) -> Vec<ArtistRow> {
    let mut artists: Vec<ArtistRow> = records
        .into_iter()
        .map(|record| ArtistRow {
            artist_id: record.artist_id.clone(),
            name: record.artist_name.clone(),
            location: record.artist_location.clone(),
            latitude: record.artist_latitude,
            longitude: record.artist_longitude,
        })
        .collect();

    artists.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    artists.dedup_by(|later, first| later.sort_key() == first.sort_key());
    artists
}
