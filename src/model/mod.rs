//! Source records and analytical table rows.

mod records;
mod tables;

pub use records::{CatalogRecord, UsageEvent};
pub use tables::{ArtistRow, SongRow, SongplayRow, TimeRow, UserRow};

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// An `f64` with a total order, usable in sort keys and hash keys.
///
/// `-0.0` and `0.0` compare equal.
#[derive(Debug, Clone, Copy)]
pub struct TotalF64(pub f64);

impl TotalF64 {
    fn normalized(self) -> f64 {
        if self.0 == 0.0 { 0.0 } else { self.0 }
    }
}

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().total_cmp(&other.normalized())
    }
}

impl Hash for TotalF64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().to_bits().hash(state);
    }
}

/// Sort key wrapper for an optional float; nulls sort first.
pub fn total(value: Option<f64>) -> Option<TotalF64> {
    value.map(TotalF64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_total_order() {
        assert_eq!(TotalF64(0.0), TotalF64(-0.0));
        assert!(TotalF64(-1.5) < TotalF64(0.0));
        assert!(total(None) < total(Some(f64::MIN)));

        let set: HashSet<TotalF64> = [TotalF64(0.0), TotalF64(-0.0), TotalF64(1.0)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
