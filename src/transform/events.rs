//! Plays, Users and Time derivations over usage events.

use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::BTreeSet;

use crate::model::{TimeRow, UsageEvent, UserRow};
use crate::source::Dataset;

/// A play event with its position in the input and its timestamp.
#[derive(Debug, Clone, Copy)]
pub struct Play<'a> {
    pub event: &'a UsageEvent,
    pub datetime: NaiveDateTime,
    /// Position of the source file in the listing.
    pub file_index: usize,
    /// Position of the event within its file.
    pub row: usize,
}

/// Play events of a dataset.
#[derive(Debug, Default)]
pub struct Plays<'a> {
    pub plays: Vec<Play<'a>>,
    /// Play events dropped for a missing or unrepresentable `ts`.
    pub skipped: usize,
}

/// Select the play events, in input order, enriched with their timestamp.
pub fn select_plays(events: &Dataset<UsageEvent>) -> Plays<'_> {
    let mut selected = Plays::default();

    for file in &events.files {
        for (row, event) in file.records.iter().enumerate() {
            if !event.is_play() {
                continue;
            }
            match event.datetime() {
                Some(datetime) => selected.plays.push(Play {
                    event,
                    datetime,
                    file_index: file.index,
                    row,
                }),
                None => selected.skipped += 1,
            }
        }
    }

    selected
}

/// Distinct user states over all events, sorted.
///
/// The subscription level is part of the row, so a user who upgraded
/// appears once as `free` and once as `paid`.
pub fn derive_users<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> Vec<UserRow> {
    events
        .into_iter()
        .map(|event| UserRow {
            user_id: event.user_id.clone(),
            first_name: event.first_name.clone(),
            last_name: event.last_name.clone(),
            gender: event.gender.clone(),
            level: event.level.clone(),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Calendar decomposition of a timestamp.
pub fn time_row(datetime: NaiveDateTime) -> TimeRow {
    TimeRow {
        datetime,
        hour: datetime.hour() as i32,
        day_of_week: datetime.format("%a").to_string(),
        day_of_month: datetime.day() as i32,
        day_of_year: datetime.ordinal() as i32,
        month: month_name(datetime),
        year: datetime.year(),
        week_of_year: datetime.iso_week().week() as i32,
    }
}

/// Full English month name, the partition value used by time-keyed tables.
pub fn month_name(datetime: NaiveDateTime) -> String {
    datetime.format("%B").to_string()
}

/// One Time row per distinct play timestamp, sorted by timestamp.
pub fn derive_time(plays: &[Play<'_>]) -> Vec<TimeRow> {
    plays
        .iter()
        .map(|play| play.datetime)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(time_row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;
    use chrono::NaiveDate;

    fn event(page: &str, user_id: &str, level: &str, ts: i64) -> UsageEvent {
        UsageEvent {
            user_id: Some(user_id.to_string()),
            first_name: Some("Lily".to_string()),
            last_name: Some("Koch".to_string()),
            gender: Some("F".to_string()),
            level: Some(level.to_string()),
            page: Some(page.to_string()),
            artist: None,
            song: None,
            length: None,
            ts: Some(ts),
            session_id: Some(1),
            location: None,
            user_agent: None,
        }
    }

    fn dataset(files: Vec<Vec<UsageEvent>>) -> Dataset<UsageEvent> {
        Dataset {
            files: files
                .into_iter()
                .enumerate()
                .map(|(index, records)| SourceFile {
                    index,
                    path: format!("log_data/{index}.json"),
                    records,
                })
                .collect(),
            skipped: 0,
        }
    }

    #[test]
    fn test_select_plays_keeps_positions() {
        let events = dataset(vec![
            vec![
                event("Home", "15", "paid", 1_541_000_000_000),
                event("NextSong", "15", "paid", 1_541_000_001_999),
            ],
            vec![event("NextSong", "15", "paid", 1_541_000_002_000)],
        ]);

        let selected = select_plays(&events);
        assert_eq!(selected.skipped, 0);
        let plays = selected.plays;
        assert_eq!(plays.len(), 2);
        assert_eq!((plays[0].file_index, plays[0].row), (0, 1));
        assert_eq!((plays[1].file_index, plays[1].row), (1, 0));
        // Milliseconds are truncated
        assert_eq!(plays[0].datetime.and_utc().timestamp(), 1_541_000_001);
    }

    #[test]
    fn test_users_distinct_with_level_history() {
        let events = vec![
            event("Home", "15", "free", 1),
            event("NextSong", "15", "free", 2),
            event("NextSong", "15", "paid", 3),
            event("Logout", "16", "free", 4),
        ];

        let users = derive_users(&events);
        assert_eq!(users.len(), 3);
        let levels: Vec<_> = users
            .iter()
            .filter(|u| u.user_id.as_deref() == Some("15"))
            .map(|u| u.level.as_deref())
            .collect();
        assert_eq!(levels, vec![Some("free"), Some("paid")]);
    }

    #[test]
    fn test_events_without_timestamp() {
        let mut home = event("Home", "5", "free", 0);
        home.ts = None;
        let mut play = event("NextSong", "6", "free", 0);
        play.ts = None;
        let mut far_future = event("NextSong", "7", "paid", 0);
        far_future.ts = Some(i64::MAX);
        let events = dataset(vec![vec![
            home,
            play,
            far_future,
            event("NextSong", "8", "paid", 1_541_000_000_000),
        ]]);

        let selected = select_plays(&events);
        assert_eq!(selected.plays.len(), 1);
        assert_eq!(selected.skipped, 2);

        // Users still come from every event
        let users = derive_users(events.records());
        let ids: Vec<_> = users.iter().map(|u| u.user_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("5"), Some("6"), Some("7"), Some("8")]);
    }

    #[test]
    fn test_time_row_fields() {
        let datetime = NaiveDate::from_ymd_opt(2018, 11, 15)
            .unwrap()
            .and_hms_opt(0, 30, 26)
            .unwrap();
        let row = time_row(datetime);

        assert_eq!(row.hour, 0);
        assert_eq!(row.day_of_week, "Thu");
        assert_eq!(row.day_of_month, 15);
        assert_eq!(row.day_of_year, 319);
        assert_eq!(row.month, "November");
        assert_eq!(row.year, 2018);
        assert_eq!(row.week_of_year, 46);
    }

    #[test]
    fn test_iso_week_at_year_boundary() {
        // 2018-12-31 is a Monday in ISO week 1 of 2019
        let datetime = NaiveDate::from_ymd_opt(2018, 12, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let row = time_row(datetime);
        assert_eq!(row.week_of_year, 1);
        assert_eq!(row.year, 2018);
        assert_eq!(row.day_of_year, 365);
    }

    #[test]
    fn test_time_only_from_plays_and_unique() {
        let events = dataset(vec![vec![
            event("Home", "15", "paid", 1_541_000_000_000),
            event("NextSong", "15", "paid", 1_541_000_005_100),
            event("NextSong", "16", "free", 1_541_000_005_900),
            event("NextSong", "16", "free", 1_541_000_009_000),
        ]]);

        let time = derive_time(&select_plays(&events).plays);
        assert_eq!(time.len(), 2);
        assert!(time[0].datetime < time[1].datetime);
    }
}
