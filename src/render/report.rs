//! Leaderboard aggregation over the persisted snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{MonthMap, PeriodCounts, Snapshot, Window, WindowTotals};
use crate::render::page::render_page;

/// One leaderboard row, ready to embed in the page.
#[derive(Debug, Serialize)]
pub struct ReviewerRow {
    pub login: String,
    pub avatar_url: String,
    pub html_url: String,
    pub total: u64,
    pub total_comments: u64,
    pub total_merges: u64,
    pub monthly: MonthMap,
    pub comment_monthly: MonthMap,
    pub merge_monthly: MonthMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_counts: Option<PeriodCounts>,
}

/// Everything the page consumes, embedded as one JSON literal.
#[derive(Debug, Serialize)]
pub struct ReportData {
    pub repo: String,
    pub generated_at: String,
    pub reviewers: Vec<ReviewerRow>,
    pub monthly_totals: MonthMap,
    pub comment_monthly_totals: MonthMap,
    pub merge_monthly_totals: MonthMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_totals: Option<BTreeMap<Window, WindowTotals>>,
}

/// Aggregate a snapshot into sorted leaderboard rows.
///
/// Reviewers whose three month maps are all empty are dropped. A reviewer
/// the search index is blind to keeps empty maps; when both summed totals
/// are zero and a 24-month tally exists, the row's review and comment
/// totals come from that tally instead.
pub fn build_report(repo: &str, snapshot: &Snapshot, generated_at: DateTime<Utc>) -> ReportData {
    let mut reviewers = Vec::new();
    let mut monthly_totals = MonthMap::new();
    let mut comment_monthly_totals = MonthMap::new();
    let mut merge_monthly_totals = MonthMap::new();

    for (login, record) in &snapshot.reviewers {
        if !record.has_activity() {
            continue;
        }
        let mut total: u64 = record.monthly.values().sum();
        let mut total_comments: u64 = record.comment_monthly.values().sum();
        let total_merges: u64 = record.merge_monthly.values().sum();
        let period_counts = snapshot.reviewer_period_counts.get(login).cloned();
        if total == 0 && total_comments == 0 {
            if let Some(two_year) =
                period_counts.as_ref().and_then(|counts| counts.get(&Window::Months(24)))
            {
                total = two_year.reviewed;
                total_comments = two_year.commented;
            }
        }

        accumulate(&mut monthly_totals, &record.monthly);
        accumulate(&mut comment_monthly_totals, &record.comment_monthly);
        accumulate(&mut merge_monthly_totals, &record.merge_monthly);

        reviewers.push(ReviewerRow {
            login: login.clone(),
            avatar_url: record.avatar_url.clone(),
            html_url: format!("https://github.com/{login}"),
            total,
            total_comments,
            total_merges,
            monthly: record.monthly.clone(),
            comment_monthly: record.comment_monthly.clone(),
            merge_monthly: record.merge_monthly.clone(),
            period_counts,
        });
    }
    reviewers.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.login.cmp(&b.login)));

    ReportData {
        repo: repo.to_string(),
        generated_at: generated_at.format("%Y-%m-%dT%H:%M:%S+00:00").to_string(),
        reviewers,
        monthly_totals,
        comment_monthly_totals,
        merge_monthly_totals,
        repo_totals: snapshot.activity.as_ref().map(|activity| activity.repo_totals.clone()),
    }
}

fn accumulate(totals: &mut MonthMap, map: &MonthMap) {
    for (&month, &count) in map {
        *totals.entry(month).or_default() += count;
    }
}

/// Write `index.html` into the output directory, replacing any prior page.
pub fn write_report(output_dir: &Path, data: &ReportData) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating report directory {}", output_dir.display()))?;
    let page = render_page(data)?;
    let path = output_dir.join("index.html");
    fs::write(&path, page).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Month, PeriodTally, ReviewerRecord, RepoActivity, SNAPSHOT_VERSION};

    fn m(key: &str) -> Month {
        key.parse().expect("month")
    }

    fn record(
        avatar: &str,
        monthly: &[(&str, u64)],
        comments: &[(&str, u64)],
        merges: &[(&str, u64)],
    ) -> ReviewerRecord {
        let mut record = ReviewerRecord::new(avatar);
        record.monthly = monthly.iter().map(|(key, count)| (m(key), *count)).collect();
        record.comment_monthly = comments.iter().map(|(key, count)| (m(key), *count)).collect();
        record.merge_monthly = merges.iter().map(|(key, count)| (m(key), *count)).collect();
        record
    }

    fn snapshot(reviewers: Vec<(&str, ReviewerRecord)>) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            start_month: m("2024-01"),
            end_month: m("2024-03"),
            reviewers: reviewers
                .into_iter()
                .map(|(login, record)| (login.to_string(), record))
                .collect(),
            activity: None,
            reviewer_period_counts: BTreeMap::new(),
        }
    }

    fn stamp() -> DateTime<Utc> {
        "2024-01-15T00:00:00Z".parse().expect("stamp")
    }

    #[test]
    fn test_rows_carry_totals_links_and_ordering() {
        let snapshot = snapshot(vec![
            (
                "alice",
                record(
                    "https://a.com/alice.png",
                    &[("2024-01", 15), ("2024-02", 8)],
                    &[("2024-01", 3), ("2024-02", 1)],
                    &[("2024-01", 2)],
                ),
            ),
            (
                "bob",
                record(
                    "https://a.com/bob.png",
                    &[("2024-01", 5), ("2024-03", 3)],
                    &[("2024-01", 2)],
                    &[("2024-02", 1), ("2024-03", 1)],
                ),
            ),
        ]);

        let data = build_report("mdn/content", &snapshot, stamp());

        assert_eq!(data.repo, "mdn/content");
        assert_eq!(data.generated_at, "2024-01-15T00:00:00+00:00");
        assert_eq!(data.reviewers.len(), 2);

        let alice = &data.reviewers[0];
        assert_eq!(alice.login, "alice");
        assert_eq!(alice.total, 23);
        assert_eq!(alice.total_comments, 4);
        assert_eq!(alice.total_merges, 2);
        assert_eq!(alice.monthly[&m("2024-01")], 15);
        assert_eq!(alice.html_url, "https://github.com/alice");

        let bob = &data.reviewers[1];
        assert_eq!(bob.login, "bob");
        assert_eq!(bob.total, 8);
        assert_eq!(bob.total_comments, 2);
        assert_eq!(bob.total_merges, 2);
    }

    #[test]
    fn test_equal_totals_break_ties_by_login() {
        let snapshot = snapshot(vec![
            ("zoe", record("z", &[("2024-01", 5)], &[], &[])),
            ("amy", record("a", &[("2024-02", 5)], &[], &[])),
        ]);
        let data = build_report("o/r", &snapshot, stamp());
        let logins: Vec<&str> = data.reviewers.iter().map(|row| row.login.as_str()).collect();
        assert_eq!(logins, ["amy", "zoe"]);
    }

    #[test]
    fn test_empty_snapshot_renders_no_rows() {
        let data = build_report("test/repo", &snapshot(vec![]), stamp());
        assert!(data.reviewers.is_empty());
        assert!(data.monthly_totals.is_empty());
        assert!(data.comment_monthly_totals.is_empty());
        assert!(data.merge_monthly_totals.is_empty());
        assert!(data.repo_totals.is_none());
    }

    #[test]
    fn test_monthly_totals_sum_across_reviewers() {
        let snapshot = snapshot(vec![
            (
                "alice",
                record(
                    "a",
                    &[("2024-01", 10), ("2024-02", 5)],
                    &[("2024-01", 2), ("2024-03", 1)],
                    &[("2024-01", 3), ("2024-02", 1)],
                ),
            ),
            (
                "bob",
                record("b", &[("2024-01", 3), ("2024-03", 7)], &[("2024-02", 4)], &[("2024-01", 1)]),
            ),
        ]);

        let data = build_report("test/repo", &snapshot, stamp());

        assert_eq!(data.monthly_totals[&m("2024-01")], 13);
        assert_eq!(data.monthly_totals[&m("2024-02")], 5);
        assert_eq!(data.monthly_totals[&m("2024-03")], 7);
        assert_eq!(data.comment_monthly_totals[&m("2024-01")], 2);
        assert_eq!(data.comment_monthly_totals[&m("2024-02")], 4);
        assert_eq!(data.comment_monthly_totals[&m("2024-03")], 1);
        assert_eq!(data.merge_monthly_totals[&m("2024-01")], 4);
        assert_eq!(data.merge_monthly_totals[&m("2024-02")], 1);
    }

    #[test]
    fn test_fully_inactive_reviewers_are_skipped() {
        let snapshot = snapshot(vec![
            ("alice", record("a", &[("2024-01", 10)], &[], &[])),
            ("inactive", record("x", &[], &[], &[])),
        ]);
        let data = build_report("test/repo", &snapshot, stamp());
        assert_eq!(data.reviewers.len(), 1);
        assert_eq!(data.reviewers[0].login, "alice");
    }

    #[test]
    fn test_comment_only_reviewer_is_kept() {
        let snapshot = snapshot(vec![
            ("reviewer", record("r", &[("2024-01", 10)], &[], &[])),
            ("commenter", record("c", &[], &[("2024-01", 5), ("2024-02", 3)], &[])),
        ]);
        let data = build_report("test/repo", &snapshot, stamp());
        assert_eq!(data.reviewers.len(), 2);
        let commenter = data
            .reviewers
            .iter()
            .find(|row| row.login == "commenter")
            .expect("commenter row");
        assert_eq!(commenter.total, 0);
        assert_eq!(commenter.total_comments, 8);
        assert_eq!(commenter.total_merges, 0);
    }

    #[test]
    fn test_merge_only_reviewer_is_kept() {
        let snapshot = snapshot(vec![
            ("reviewer", record("r", &[("2024-01", 10)], &[], &[])),
            ("merger", record("m", &[], &[], &[("2024-01", 7), ("2024-02", 4)])),
        ]);
        let data = build_report("test/repo", &snapshot, stamp());
        let merger =
            data.reviewers.iter().find(|row| row.login == "merger").expect("merger row");
        assert_eq!(merger.total, 0);
        assert_eq!(merger.total_comments, 0);
        assert_eq!(merger.total_merges, 11);
    }

    #[test]
    fn test_period_counts_attached_only_when_present() {
        let mut snap = snapshot(vec![
            ("alice", record("a", &[("2024-01", 15)], &[("2024-01", 3)], &[])),
            ("bob", record("b", &[("2024-01", 5)], &[], &[])),
        ]);
        let mut alice_periods = PeriodCounts::new();
        alice_periods.insert(Window::Months(1), PeriodTally { reviewed: 10, commented: 2 });
        alice_periods.insert(Window::Months(3), PeriodTally { reviewed: 15, commented: 3 });
        snap.reviewer_period_counts.insert("alice".to_string(), alice_periods.clone());

        let data = build_report("test/repo", &snap, stamp());

        let alice = data.reviewers.iter().find(|row| row.login == "alice").expect("alice");
        assert_eq!(alice.period_counts.as_ref(), Some(&alice_periods));
        let bob = data.reviewers.iter().find(|row| row.login == "bob").expect("bob");
        assert!(bob.period_counts.is_none());
    }

    #[test]
    fn test_blind_reviewer_totals_come_from_two_year_tally() {
        // Search reports nothing for this login; the 24-month tally was
        // scraped from result pages and stands in for the zero sums.
        let mut snap =
            snapshot(vec![("trflynn", record("t", &[], &[], &[("2024-01", 50)]))]);
        let mut periods = PeriodCounts::new();
        periods.insert(Window::Months(1), PeriodTally { reviewed: 22, commented: 26 });
        periods.insert(Window::Months(24), PeriodTally { reviewed: 394, commented: 472 });
        snap.reviewer_period_counts.insert("trflynn".to_string(), periods);

        let data = build_report("test/repo", &snap, stamp());

        let row = &data.reviewers[0];
        assert_eq!(row.total, 394);
        assert_eq!(row.total_comments, 472);
        assert_eq!(row.total_merges, 50);
    }

    #[test]
    fn test_repo_totals_pass_through_from_activity() {
        let mut snap = snapshot(vec![("alice", record("a", &[("2024-01", 1)], &[], &[]))]);
        let mut repo_totals = BTreeMap::new();
        repo_totals.insert(
            Window::All,
            WindowTotals { reviewed: 500, commented: 620, merged: 450 },
        );
        snap.activity = Some(RepoActivity {
            last_pr_updated_at: None,
            total_pr_count: 1000,
            total_merged_prs: 450,
            total_reviewed_prs: 500,
            total_commented_prs: 620,
            repo_totals: repo_totals.clone(),
        });

        let data = build_report("test/repo", &snap, stamp());

        assert_eq!(data.repo_totals, Some(repo_totals));
    }
}
