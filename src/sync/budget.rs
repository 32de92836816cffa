//! Closed-form API call estimates and the pre-run budget check.

use tracing::{debug, info, warn};

use crate::domain::LOOKBACK_MONTHS;
use crate::github::{ALIAS_BATCH_SIZE, AVATAR_BATCH_SIZE};

use super::RepoSource;

/// Projected call count for a cold build over the full history.
///
/// Phase 1 usually surfaces about twice as many candidates as ranked
/// reviewers, and the paginated walks run about one page per month; the
/// estimate leans on those ratios rather than exact knowledge.
pub fn estimate_full_calls(history_months: usize, reviewers: usize) -> u64 {
    let months = history_months as u64;
    let r = reviewers as u64;
    let alias = ALIAS_BATCH_SIZE as u64;
    let windows = LOOKBACK_MONTHS.len() as u64;
    // activity summary + creation date
    2
        // discovery page walk
        + months
        // candidate ranking
        + (2 * r * 2).div_ceil(alias)
        + r.div_ceil(AVATAR_BATCH_SIZE as u64)
        // monthly counting
        + (r * months * 2).div_ceil(alias)
        // merged-PR walk
        + months
        // window tallies
        + (r * windows * 2).div_ceil(alias)
}

/// Projected call count for an incremental refresh.
///
/// `history_months` covers the allowance for one newly discovered
/// reviewer whose record gets backfilled over the whole cached range.
pub fn estimate_incremental_calls(
    reviewers: usize,
    stale_months: usize,
    history_months: usize,
) -> u64 {
    let stale = stale_months as u64;
    let r = reviewers as u64;
    let alias = ALIAS_BATCH_SIZE as u64;
    let windows = LOOKBACK_MONTHS.len() as u64;
    // activity summary
    1
        + stale
        + (2 * r * 2).div_ceil(alias)
        + (r * stale * 2).div_ceil(alias)
        + stale
        + (r * windows * 2).div_ceil(alias)
        // new-reviewer backfill allowance
        + (2 * history_months as u64).div_ceil(alias)
        + 1
}

/// Print the projection against the remaining budget, warning when the
/// run probably will not fit without a reset wait.
pub fn check_rate_limit_budget(source: &dyn RepoSource, estimate: u64) {
    let Some(limits) = source.rate_limit_info() else {
        debug!("rate limit budget unknown, proceeding");
        return;
    };
    match limits.reset_at {
        Some(reset) => info!(
            "API budget: {} remaining (resets {}), run needs about {} calls",
            limits.remaining,
            reset.format("%H:%M:%S"),
            estimate
        ),
        None => info!(
            "API budget: {} remaining, run needs about {} calls",
            limits.remaining, estimate
        ),
    }
    if estimate > limits.remaining {
        warn!(
            "projected {} calls exceed the {} remaining; expect a reset wait mid-run",
            estimate, limits.remaining
        );
    }
}
