//! Merge attribution: who pressed the button, month by month.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::domain::{Month, MonthMap};
use crate::github::Forge;

const MERGED_PAGE_QUERY: &str = "\
query($q: String!, $cursor: String) {
  search(query: $q, type: ISSUE, first: 100, after: $cursor) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on PullRequest {
        createdAt
        author { login }
        mergedBy { login }
      }
    }
  }
}";

/// Merged-PR counts per tracked login for each month in `months`.
///
/// Pages through every merged PR created in the month and credits the
/// login that merged it. Self-merges, merges by untracked logins, and
/// PRs whose merger the API no longer knows are dropped. Every tracked
/// login still gets an entry, possibly empty.
pub fn merge_counts(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    logins: &[String],
    months: &[Month],
) -> Result<BTreeMap<String, MonthMap>> {
    let tracked: BTreeSet<&str> = logins.iter().map(String::as_str).collect();
    let mut merges: BTreeMap<String, MonthMap> = BTreeMap::new();
    for login in logins {
        merges.entry(login.clone()).or_default();
    }

    for (index, &month) in months.iter().enumerate() {
        if index > 0 {
            api.pace();
        }
        let filter = format!(
            "repo:{owner}/{name} is:pr is:merged created:{}..{}",
            month.first_day(),
            month.last_day()
        );
        let mut cursor: Option<String> = None;
        loop {
            let mut vars = vec![("q", filter.clone())];
            if let Some(cursor) = &cursor {
                vars.push(("cursor", cursor.clone()));
            }
            let data = api.query(MERGED_PAGE_QUERY, &vars)?;
            let search = data.get("search").cloned().unwrap_or(Value::Null);
            tally_page(&search, &tracked, &mut merges);

            let page = search.get("pageInfo");
            let has_next = page
                .and_then(|p| p.get("hasNextPage"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            cursor = page
                .and_then(|p| p.get("endCursor"))
                .and_then(Value::as_str)
                .map(String::from);
            if !has_next || cursor.is_none() {
                break;
            }
        }
    }
    debug!("attributed merges over {} months for {} logins", months.len(), logins.len());
    Ok(merges)
}

fn tally_page(search: &Value, tracked: &BTreeSet<&str>, merges: &mut BTreeMap<String, MonthMap>) {
    let nodes = search.get("nodes").and_then(Value::as_array);
    for node in nodes.into_iter().flatten() {
        let Some(merged_by) = login_of(node.get("mergedBy")) else {
            continue;
        };
        if login_of(node.get("author")) == Some(merged_by) || !tracked.contains(merged_by) {
            continue;
        }
        let Some(created) = node.get("createdAt").and_then(Value::as_str) else {
            continue;
        };
        let Ok(month) = created.get(..7).unwrap_or(created).parse::<Month>() else {
            continue;
        };
        *merges.entry(merged_by.to_string()).or_default().entry(month).or_insert(0) += 1;
    }
}

fn login_of(actor: Option<&Value>) -> Option<&str> {
    actor.and_then(|a| a.get("login")).and_then(Value::as_str)
}
