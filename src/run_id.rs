//! Run identifier ordering
//!
//! Runs are published with ids formatted as `%06x` of the unix start time, so
//! the natural order is the hexadecimal value. Both the grid's cell writes and
//! the per-row run window compare through this single `Ord` implementation.

use std::cmp::Ordering;
use std::fmt;

/// Longest id still parsed as a hexadecimal value (fits in a `u64`).
const MAX_HEX_DIGITS: usize = 16;

/// A run identifier with an explicit total order.
///
/// - Ids of 1..=16 hex digits order by value.
/// - Any other id orders after every numeric id, lexicographically.
/// - Equal values (e.g. `0100` vs `100`) break ties on the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    raw: String,
    value: Option<u64>,
}

impl RunId {
    /// Parse a run id, returning `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let value = if raw.len() <= MAX_HEX_DIGITS && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            u64::from_str_radix(raw, 16).ok()
        } else {
            None
        };

        Some(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[cfg(test)]
    fn value(&self) -> Option<u64> {
        self.value
    }
}

impl Ord for RunId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.value, other.value) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.raw.cmp(&other.raw)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.raw.cmp(&other.raw),
        }
    }
}

impl PartialOrd for RunId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
