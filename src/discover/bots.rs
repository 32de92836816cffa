//! Bot account detection for contributor discovery.

use once_cell::sync::Lazy;
use regex::Regex;

/// `[bot]`-suffixed app accounts plus `-bot`/`_bot`/bare `bot` names.
static BOT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\[bot\]$|(^|[-_])bot$)").unwrap());

/// Merge-queue and CI accounts that carry human-looking names.
fn is_known_bot(login: &str) -> bool {
    matches!(
        login,
        "bors-servo"
            | "highfive"
            | "servo-wpt-sync"
            | "webkit-commit-queue"
            | "webkit-early-warning-system"
    )
}

/// Check whether a login belongs to an automation account.
///
/// # Arguments
/// * `login` - Account login as returned by the API
///
/// # Returns
/// `true` if the login should be dropped from discovery
pub fn is_bot(login: &str) -> bool {
    BOT_PATTERN.is_match(login) || is_known_bot(login)
}
