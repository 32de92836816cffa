//! Repo-wide probes: the creation month and the change-detection summary.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde_json::Value;

use crate::domain::{months_before, Month, RepoActivity, Window, WindowTotals, LOOKBACK_MONTHS};
use crate::github::Forge;

use super::graphql_string;

const REPO_START_QUERY: &str = "\
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    createdAt
  }
}";

/// Month the repository was created, the left edge of its full history.
pub fn repo_start(api: &dyn Forge, owner: &str, name: &str) -> Result<Month> {
    let vars = [("owner", owner.to_string()), ("name", name.to_string())];
    let data = api.query(REPO_START_QUERY, &vars)?;
    let created_at = data
        .get("repository")
        .and_then(|repo| repo.get("createdAt"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("no creation date for {}/{}", owner, name))?;
    created_at
        .get(..7)
        .unwrap_or(created_at)
        .parse()
        .with_context(|| format!("unparseable creation date {created_at:?}"))
}

/// Repo-wide activity summary in a single request.
///
/// Carries the newest PR update stamp, overall totals, and per-window
/// reviewed/commented/merged totals. Comparing one of these against a
/// stored copy is how a run decides whether anything changed at all.
pub fn repo_activity(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    today: NaiveDate,
) -> Result<RepoActivity> {
    let document = activity_query(owner, name, today);
    let vars = [("owner", owner.to_string()), ("name", name.to_string())];
    let data = api.query(&document, &vars)?;

    let repository = data
        .get("repository")
        .filter(|repo| !repo.is_null())
        .ok_or_else(|| anyhow!("repository {}/{} not found", owner, name))?;
    let pull_requests = repository.get("pullRequests");
    let total_pr_count = pull_requests
        .and_then(|prs| prs.get("totalCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let last_pr_updated_at = pull_requests
        .and_then(|prs| prs.get("nodes"))
        .and_then(Value::as_array)
        .and_then(|nodes| nodes.first())
        .and_then(|node| node.get("updatedAt"))
        .and_then(Value::as_str)
        .map(String::from);

    let mut repo_totals = BTreeMap::new();
    for (window, key) in window_keys() {
        repo_totals.insert(
            window,
            WindowTotals {
                reviewed: alias_total(&data, "reviewed", &key),
                commented: alias_total(&data, "commented", &key),
                merged: alias_total(&data, "merged", &key),
            },
        );
    }
    let all = repo_totals.get(&Window::All).copied().unwrap_or_default();

    Ok(RepoActivity {
        last_pr_updated_at,
        total_pr_count,
        total_merged_prs: all.merged,
        total_reviewed_prs: all.reviewed,
        total_commented_prs: all.commented,
        repo_totals,
    })
}

/// Eighteen aliased searches plus the newest-update probe, one request.
fn activity_query(owner: &str, name: &str, today: NaiveDate) -> String {
    let repo = format!("repo:{owner}/{name} is:pr");
    let mut doc = String::from(
        "query($owner: String!, $name: String!) {\n  rateLimit { remaining resetAt }\n",
    );
    doc.push_str(
        "  repository(owner: $owner, name: $name) {\n    \
         pullRequests(first: 1, orderBy: {field: UPDATED_AT, direction: DESC}) {\n      \
         totalCount\n      nodes { updatedAt }\n    }\n  }\n",
    );
    for (window, key) in window_keys() {
        let suffix = match window {
            Window::All => String::new(),
            Window::Months(n) => format!(" updated:>={}", months_before(today, n)),
        };
        for (metric, filter) in [
            ("reviewed", format!("{repo} -review:none{suffix}")),
            ("commented", format!("{repo} comments:>0{suffix}")),
            ("merged", format!("{repo} is:merged{suffix}")),
        ] {
            doc.push_str(&format!(
                "  {metric}_{key}: search(query: {}, type: ISSUE) {{ issueCount }}\n",
                graphql_string(&filter)
            ));
        }
    }
    doc.push('}');
    doc
}

fn window_keys() -> Vec<(Window, String)> {
    let mut keys = vec![(Window::All, "all".to_string())];
    keys.extend(LOOKBACK_MONTHS.into_iter().map(|n| (Window::Months(n), n.to_string())));
    keys
}

fn alias_total(data: &Value, metric: &str, key: &str) -> u64 {
    data.get(format!("{metric}_{key}"))
        .and_then(|v| v.get("issueCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
