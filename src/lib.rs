//! review-pulse: reviewer activity leaderboards for GitHub repositories.
//!
//! Builds a per-contributor review/comment/merge leaderboard from the
//! forge's search API and keeps it current through an incremental,
//! schema-versioned on-disk snapshot. Most runs touch only the months
//! that could still have changed; repo-wide activity signals decide how
//! much of the pipeline can be skipped entirely.

pub mod cache;
pub mod cli;
pub mod config;
pub mod discover;
pub mod domain;
pub mod fetch;
pub mod github;
pub mod render;
pub mod scrape;
pub mod sync;
