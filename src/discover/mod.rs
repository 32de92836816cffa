//! Two-phase contributor discovery.
//!
//! Phase 1 walks every PR created in the month range and collects the
//! humans that authored or merged them. Phase 2 ranks those candidates by
//! their all-time reviewed plus commented volume. Logins search never
//! returns results for are kept anyway when they merge other people's
//! work, so button-pressers with broken search visibility still chart.

mod bots;

pub use bots::is_bot;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::Month;
use crate::fetch::{alias_count, batch_bar, build_count_query, CountKind};
use crate::github::{Forge, ALIAS_BATCH_SIZE};

const CREATED_PAGE_QUERY: &str = "\
query($q: String!, $cursor: String) {
  search(query: $q, type: ISSUE, first: 100, after: $cursor) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on PullRequest {
        author { login }
        mergedBy { login }
      }
    }
  }
}";

/// Ordered reviewer list for the month range.
///
/// The score-ranked list is cut at `top_n`; search-blind candidates (zero
/// score, nonzero merge frequency) ride along after it without consuming
/// slots, ordered by how often they merged.
pub fn discover_reviewers(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    months: &[Month],
    top_n: usize,
    exclude: &BTreeSet<String>,
) -> Result<Vec<String>> {
    let frequency = collect_candidates(api, owner, name, months, exclude)?;
    if frequency.is_empty() {
        debug!("no discovery candidates in {} months", months.len());
        return Ok(Vec::new());
    }

    let candidates: Vec<&String> = frequency.keys().collect();
    let scores = rank_scores(api, owner, name, &candidates)?;

    // Candidates arrive alphabetical; the stable sorts keep that order
    // for ties.
    let mut ranked: Vec<(&String, u64)> =
        candidates.iter().map(|login| (*login, scores[login.as_str()])).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut result: Vec<String> = ranked
        .iter()
        .filter(|(_, score)| *score > 0)
        .take(top_n)
        .map(|(login, _)| (*login).clone())
        .collect();

    let mut blind: Vec<(&String, u64)> = candidates
        .iter()
        .filter(|login| scores[login.as_str()] == 0 && frequency[login.as_str()] > 0)
        .map(|login| (*login, frequency[login.as_str()]))
        .collect();
    blind.sort_by(|a, b| b.1.cmp(&a.1));
    let blind_count = blind.len();
    result.extend(blind.into_iter().map(|(login, _)| login.clone()));

    info!("discovered {} reviewers ({} search-blind)", result.len(), blind_count);
    Ok(result)
}

/// Phase 1: distinct human authors and mergers with merge frequencies.
fn collect_candidates(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    months: &[Month],
    exclude: &BTreeSet<String>,
) -> Result<BTreeMap<String, u64>> {
    let mut frequency: BTreeMap<String, u64> = BTreeMap::new();
    for (index, &month) in months.iter().enumerate() {
        if index > 0 {
            api.pace();
        }
        let filter = format!(
            "repo:{owner}/{name} is:pr created:{}..{}",
            month.first_day(),
            month.last_day()
        );
        let mut cursor: Option<String> = None;
        loop {
            let mut vars = vec![("q", filter.clone())];
            if let Some(cursor) = &cursor {
                vars.push(("cursor", cursor.clone()));
            }
            let data = api.query(CREATED_PAGE_QUERY, &vars)?;
            let search = data.get("search").cloned().unwrap_or(Value::Null);
            let nodes = search.get("nodes").and_then(Value::as_array);
            for node in nodes.into_iter().flatten() {
                if let Some(author) = login_of(node.get("author")) {
                    if tracked_human(author, exclude) {
                        frequency.entry(author.to_string()).or_insert(0);
                    }
                }
                if let Some(merger) = login_of(node.get("mergedBy")) {
                    if tracked_human(merger, exclude) {
                        *frequency.entry(merger.to_string()).or_insert(0) += 1;
                    }
                }
            }
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
    Ok(frequency)
}

/// Phase 2: all-time reviewed plus commented volume per candidate.
fn rank_scores(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    candidates: &[&String],
) -> Result<BTreeMap<String, u64>> {
    let mut scores: BTreeMap<String, u64> = BTreeMap::new();
    let mut tasks: Vec<(&String, CountKind)> = Vec::new();
    for login in candidates {
        scores.insert((*login).clone(), 0);
        for kind in CountKind::BOTH {
            tasks.push((login, kind));
        }
    }

    let bar = batch_bar(tasks.chunks(ALIAS_BATCH_SIZE).len(), "ranking reviewers");
    for (index, batch) in tasks.chunks(ALIAS_BATCH_SIZE).enumerate() {
        if index > 0 {
            api.pace();
        }
        let filters = batch
            .iter()
            .map(|(login, kind)| kind.base_filter(owner, name, login))
            .collect::<Vec<_>>();
        let data = api.query(&build_count_query(&filters), &[])?;
        for (slot, (login, _)) in batch.iter().enumerate() {
            *scores.entry((*login).clone()).or_insert(0) += alias_count(&data, slot);
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(scores)
}

fn tracked_human(login: &str, exclude: &BTreeSet<String>) -> bool {
    !is_bot(login) && !exclude.contains(login)
}

fn login_of(actor: Option<&Value>) -> Option<&str> {
    actor.and_then(|a| a.get("login")).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fetch::testing::{count_payload, ScriptedForge};

    fn m(s: &str) -> Month {
        s.parse().expect("month")
    }

    fn pr(author: Option<&str>, merged_by: Option<&str>) -> Value {
        json!({
            "author": author.map(|a| json!({ "login": a })),
            "mergedBy": merged_by.map(|m| json!({ "login": m })),
        })
    }

    fn page(nodes: Vec<Value>) -> Value {
        json!({
            "search": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "nodes": nodes,
            }
        })
    }

    fn no_exclusions() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn test_discovery_ranks_by_review_and_comment_volume() {
        // Candidates rank alphabetically into Phase 2: alice, bob, carol.
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page(vec![
                    pr(Some("alice"), None),
                    pr(Some("bob"), None),
                    pr(Some("carol"), None),
                ])
            } else {
                count_payload(&[1, 1, 5, 5, 3, 3])
            }
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 10, &no_exclusions())
                .expect("discovery");
        assert_eq!(result, vec!["bob", "carol", "alice"]);
    }

    #[test]
    fn test_discovery_caps_ranked_list_at_top_n() {
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page(vec![
                    pr(Some("alice"), None),
                    pr(Some("bob"), None),
                    pr(Some("carol"), None),
                ])
            } else {
                count_payload(&[1, 1, 5, 5, 3, 3])
            }
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 2, &no_exclusions())
                .expect("discovery");
        assert_eq!(result, vec!["bob", "carol"]);
    }

    #[test]
    fn test_discovery_search_blind_mergers_ride_along() {
        // bob and dave never show up in search counts but merge PRs, so
        // they stay, ordered by merge frequency, without costing slots.
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page(vec![
                    pr(Some("alice"), Some("dave")),
                    pr(Some("alice"), Some("dave")),
                    pr(Some("alice"), Some("dave")),
                    pr(Some("carol"), Some("bob")),
                ])
            } else {
                // alice, bob, carol, dave
                count_payload(&[4, 4, 0, 0, 2, 2, 0, 0])
            }
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 1, &no_exclusions())
                .expect("discovery");
        assert_eq!(result, vec!["alice", "dave", "bob"]);
    }

    #[test]
    fn test_discovery_drops_bots_and_excluded_logins() {
        let exclude = BTreeSet::from(["shadow".to_string()]);
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page(vec![
                    pr(Some("dependabot[bot]"), Some("bors-servo")),
                    pr(Some("shadow"), None),
                    pr(Some("alice"), None),
                ])
            } else {
                count_payload(&[7, 7])
            }
        });
        let result = discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 10, &exclude)
            .expect("discovery");
        assert_eq!(result, vec!["alice"]);
    }

    #[test]
    fn test_discovery_without_months_makes_no_calls() {
        let forge = ScriptedForge::new(|_, _| json!({}));
        let result = discover_reviewers(&forge, "octo", "demo", &[], 10, &no_exclusions())
            .expect("discovery");
        assert!(result.is_empty());
        assert_eq!(forge.calls(), 0);
    }

    #[test]
    fn test_discovery_without_candidates_skips_ranking() {
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            assert!(doc.contains("pageInfo"), "only the page walk should run");
            page(vec![pr(Some("dependabot[bot]"), None)])
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 10, &no_exclusions())
                .expect("discovery");
        assert!(result.is_empty());
        assert_eq!(forge.calls(), 1);
    }

    #[test]
    fn test_discovery_inactive_unmerging_candidates_vanish() {
        // carol neither scores nor merges, so she is dropped outright.
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page(vec![pr(Some("alice"), None), pr(Some("carol"), None)])
            } else {
                count_payload(&[3, 3, 0, 0])
            }
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 10, &no_exclusions())
                .expect("discovery");
        assert_eq!(result, vec!["alice"]);
    }

    #[test]
    fn test_discovery_phase_two_batches_large_candidate_sets() {
        // 20 candidates x 2 metrics = 40 searches = 2 ranking requests,
        // after the single page walk.
        let forge = ScriptedForge::new(|doc: &str, _: &[(&str, String)]| {
            if doc.contains("pageInfo") {
                page((0..20).map(|n| pr(Some(&format!("user{n:02}")), None)).collect())
            } else {
                count_payload(&[1; 25])
            }
        });
        let result =
            discover_reviewers(&forge, "octo", "demo", &[m("2024-01")], 30, &no_exclusions())
                .expect("discovery");
        assert_eq!(result.len(), 20);
        assert_eq!(forge.calls(), 3);
    }
}
