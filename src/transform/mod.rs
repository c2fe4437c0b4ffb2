//! Table derivations. Every function here is pure: it consumes an immutable
//! view of its input and returns new rows.

mod catalog;
mod events;
mod songplays;

pub use catalog::{derive_artists, derive_songs};
pub use events::{Play, Plays, derive_time, derive_users, month_name, select_plays, time_row};
pub use songplays::{JoinStats, SongIndex, derive_songplays, songplay_id};
