use std::fmt;

use serde::{Deserialize, Serialize};

/// Which end of a month's date-sorted listing a pass works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub(crate) fn sort_param(self) -> &'static str {
        match self {
            Direction::Forward => "dateascending",
            Direction::Backward => "datedescending",
        }
    }

    fn label_prefix(self) -> &'static str {
        match self {
            Direction::Forward => "",
            Direction::Backward => "B",
        }
    }
}

/// A contiguous run of listing positions fetched with one download request.
/// Positions are 1-based and inclusive, counted in the listing's own sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Batch {
    pub direction: Direction,
    pub first: usize,
    pub last: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.last + 1 - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// The range as the portal's download form expects it: `"1-100"`, or `"7"` for a single item.
    pub fn range_param(&self) -> String {
        if self.first == self.last {
            format!("{}", self.first)
        } else {
            format!("{}-{}", self.first, self.last)
        }
    }

    /// File stem used in the download directory. Backward batches carry a `B` prefix.
    pub fn label(&self) -> String {
        format!("{}{}", self.direction.label_prefix(), self.range_param())
    }

    /// Inverse of [`Batch::label`].
    pub fn from_label(label: &str) -> Option<Batch> {
        let (direction, range) = match label.strip_prefix('B') {
            Some(rest) => (Direction::Backward, rest),
            None => (Direction::Forward, label),
        };
        let (first, last) = match range.split_once('-') {
            Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
            None => {
                let n = range.parse().ok()?;
                (n, n)
            }
        };
        (first >= 1 && first <= last).then_some(Batch {
            direction,
            first,
            last,
        })
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Number of listing positions a pass can reach.
///
/// The portal only serves the first `query_cap` results of a query. Sorting the
/// other way round exposes the tail, so a backward pass reaches whatever the
/// forward pass could not, again capped at `query_cap`.
pub fn reachable(total: usize, query_cap: usize, direction: Direction) -> usize {
    match direction {
        Direction::Forward => total.min(query_cap),
        Direction::Backward => total.saturating_sub(query_cap).min(query_cap),
    }
}

/// Splits the reachable positions of a listing into batches of at most `batch_size`.
pub fn plan_batches(
    total: usize,
    query_cap: usize,
    batch_size: usize,
    direction: Direction,
) -> Vec<Batch> {
    if batch_size == 0 {
        return Vec::new();
    }
    let end = reachable(total, query_cap, direction);
    (1..=end)
        .step_by(batch_size)
        .map(|first| Batch {
            direction,
            first,
            last: (first + batch_size - 1).min(end),
        })
        .collect()
}
