//! Time-dependent value sequences.
//!
//! A trust service's status is not a single value: it is an ordered list of
//! half-open intervals `[start, end)` each holding the value in force during
//! that period. Lookups are range queries at the date of interest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TlError, TlResult};

/// One interval of a time-dependent sequence. `end == None` is open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDependent<T> {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub value: T,
}

impl<T> TimeDependent<T> {
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start && self.end.map_or(true, |end| date < end)
    }
}

/// Ordered, non-overlapping sequence of intervals (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDependentValues<T> {
    entries: Vec<TimeDependent<T>>,
}

impl<T> Default for TimeDependentValues<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> TimeDependentValues<T> {
    /// Build a sequence from point-in-time changes.
    ///
    /// Each change is in force from its start until the next change starts;
    /// the most recent one stays open. Two changes with the same start are
    /// rejected.
    pub fn from_changes(mut changes: Vec<(DateTime<Utc>, T)>) -> TlResult<Self> {
        changes.sort_by_key(|(start, _)| *start);

        for pair in changes.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(TlError::Parse(format!(
                    "Two status changes start at {}",
                    pair[0].0.to_rfc3339()
                )));
            }
        }

        let starts: Vec<DateTime<Utc>> = changes.iter().map(|(s, _)| *s).collect();
        let entries = changes
            .into_iter()
            .enumerate()
            .map(|(i, (start, value))| TimeDependent {
                start,
                end: starts.get(i + 1).copied(),
                value,
            })
            .collect();

        Ok(Self { entries })
    }

    /// Build a sequence from explicit intervals, rejecting overlaps.
    pub fn from_intervals(mut entries: Vec<TimeDependent<T>>) -> TlResult<Self> {
        entries.sort_by_key(|e| e.start);

        for (i, entry) in entries.iter().enumerate() {
            if let Some(end) = entry.end {
                if end <= entry.start {
                    return Err(TlError::Parse(format!(
                        "Interval starting at {} ends before it starts",
                        entry.start.to_rfc3339()
                    )));
                }
            }
            if let Some(next) = entries.get(i + 1) {
                match entry.end {
                    Some(end) if end <= next.start => {}
                    _ => {
                        return Err(TlError::Parse(format!(
                            "Intervals starting at {} and {} overlap",
                            entry.start.to_rfc3339(),
                            next.start.to_rfc3339()
                        )))
                    }
                }
            }
        }

        Ok(Self { entries })
    }

    /// Value in force at `date`, if any interval covers it.
    pub fn at(&self, date: DateTime<Utc>) -> Option<&T> {
        // entries are sorted and disjoint: find the last one starting at or before `date`
        let idx = self.entries.partition_point(|e| e.start <= date);
        let candidate = self.entries.get(idx.checked_sub(1)?)?;
        if candidate.contains(date) {
            Some(&candidate.value)
        } else {
            None
        }
    }

    /// Most recent interval.
    pub fn latest(&self) -> Option<&TimeDependent<T>> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[TimeDependent<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
