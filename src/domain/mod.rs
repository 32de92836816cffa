//! Core data model: the persisted snapshot and its building blocks.
//!
//! The snapshot is the single source of truth between runs. Month-keyed
//! activity maps are sparse: a month with zero activity is absent, never
//! stored as zero. Lookback-period counts are the opposite, zeros are kept
//! because the scrape fallback inspects them.

mod months;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use months::{month_ranges, months_before, Month, ParseMonthError};

/// Bumped whenever the snapshot layout changes. A snapshot carrying any
/// other value is treated as absent and triggers a cold rebuild.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Trailing lookback windows offered by the leaderboard, in months.
pub const LOOKBACK_MONTHS: [u32; 5] = [1, 3, 6, 12, 24];

/// Sparse month-keyed activity counts for one login.
pub type MonthMap = BTreeMap<Month, u64>;

/// Per-login lookback counts, keyed by window.
pub type PeriodCounts = BTreeMap<Window, PeriodTally>;

/// A lookback window: the trailing N months, or all history.
///
/// Serialized as `"1"`, `"3"`, ... or `"all"`; ordered numerically with
/// `All` sorting last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Months(u32),
    All,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid lookback window {0:?}")]
pub struct ParseWindowError(String);

impl Window {
    /// The five trailing windows, narrowest first.
    pub fn lookbacks() -> impl Iterator<Item = Window> {
        LOOKBACK_MONTHS.into_iter().map(Window::Months)
    }
}

impl Ord for Window {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Window::Months(a), Window::Months(b)) => a.cmp(b),
            (Window::Months(_), Window::All) => Ordering::Less,
            (Window::All, Window::Months(_)) => Ordering::Greater,
            (Window::All, Window::All) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Window {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Months(n) => write!(f, "{n}"),
            Window::All => f.write_str("all"),
        }
    }
}

impl FromStr for Window {
    type Err = ParseWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Window::All);
        }
        s.parse::<u32>()
            .map(Window::Months)
            .map_err(|_| ParseWindowError(s.to_string()))
    }
}

impl Serialize for Window {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Window {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WindowVisitor;

        impl de::Visitor<'_> for WindowVisitor {
            type Value = Window;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a lookback window key (\"all\" or a month count)")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Window, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(WindowVisitor)
    }
}

/// One reviewer's cached history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerRecord {
    pub avatar_url: String,
    /// Months with at least one submitted review.
    #[serde(default)]
    pub monthly: MonthMap,
    /// Months with at least one PR commented on.
    #[serde(default)]
    pub comment_monthly: MonthMap,
    /// Months with at least one PR merged for someone else.
    #[serde(default)]
    pub merge_monthly: MonthMap,
}

impl ReviewerRecord {
    pub fn new(avatar_url: impl Into<String>) -> Self {
        Self {
            avatar_url: avatar_url.into(),
            monthly: MonthMap::new(),
            comment_monthly: MonthMap::new(),
            merge_monthly: MonthMap::new(),
        }
    }

    /// A record with all three maps empty is logically inactive and excluded
    /// from derived reports.
    pub fn has_activity(&self) -> bool {
        !(self.monthly.is_empty()
            && self.comment_monthly.is_empty()
            && self.merge_monthly.is_empty())
    }
}

/// Repo-wide totals for one lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub reviewed: u64,
    pub commented: u64,
    pub merged: u64,
}

/// Per-login review/comment counts for one lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTally {
    pub reviewed: u64,
    pub commented: u64,
}

/// Cheap repo-wide signals used by the staleness tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoActivity {
    /// Timestamp of the most recently touched PR; absent for an empty repo.
    /// Compared for equality only, so kept as the raw forge string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pr_updated_at: Option<String>,
    pub total_pr_count: u64,
    pub total_merged_prs: u64,
    pub total_reviewed_prs: u64,
    pub total_commented_prs: u64,
    /// Keyed by `"all"` and each lookback window.
    pub repo_totals: BTreeMap<Window, WindowTotals>,
}

/// The persisted cache root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Inclusive bounds of covered history, `start_month <= end_month`.
    pub start_month: Month,
    pub end_month: Month,
    pub reviewers: BTreeMap<String, ReviewerRecord>,
    /// Absent in snapshots written before activity tracking existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<RepoActivity>,
    #[serde(default)]
    pub reviewer_period_counts: BTreeMap<String, PeriodCounts>,
}
