//! review-pulse: reviewer activity leaderboards for GitHub repositories.

use anyhow::Result;

fn main() -> Result<()> {
    review_pulse::cli::run()
}
