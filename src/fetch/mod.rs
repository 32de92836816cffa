//! Fetchers over the forge query capability: activity probes, batched
//! counts, merge classification, and avatar lookups.
//!
//! Count fetchers pack many `search(...) { issueCount }` sub-queries into
//! one request via aliases and pace themselves between batches; the alias
//! limits live in [`crate::github`].

mod activity;
mod avatars;
mod counts;
mod merges;

pub use activity::{repo_activity, repo_start};
pub use avatars::{avatars, fallback_avatar};
pub use counts::{monthly_counts, period_counts, MonthlyCounts};
pub use merges::merge_counts;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::domain::Month;

/// Quote a search filter for embedding as a GraphQL string literal.
pub(crate) fn graphql_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The two per-login count metrics issued everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountKind {
    Reviewed,
    Commented,
}

impl CountKind {
    pub(crate) const BOTH: [CountKind; 2] = [CountKind::Reviewed, CountKind::Commented];

    /// PRs the login reviewed or commented on, their own PRs excluded.
    pub(crate) fn base_filter(self, owner: &str, name: &str, login: &str) -> String {
        match self {
            CountKind::Reviewed => {
                format!("repo:{owner}/{name} is:pr reviewed-by:{login} -author:{login}")
            }
            CountKind::Commented => {
                format!("repo:{owner}/{name} is:pr commenter:{login} -author:{login}")
            }
        }
    }

    pub(crate) fn month_filter(self, owner: &str, name: &str, login: &str, month: Month) -> String {
        format!(
            "{} created:{}..{}",
            self.base_filter(owner, name, login),
            month.first_day(),
            month.last_day()
        )
    }

    pub(crate) fn window_filter(
        self,
        owner: &str,
        name: &str,
        login: &str,
        start: NaiveDate,
    ) -> String {
        format!("{} updated:>={}", self.base_filter(owner, name, login), start)
    }
}

/// One aliased-count request: `q0..qN` search sub-queries plus the budget
/// metadata the client watches.
pub(crate) fn build_count_query(filters: &[String]) -> String {
    let mut doc = String::from("query {\n  rateLimit { remaining resetAt }\n");
    for (slot, filter) in filters.iter().enumerate() {
        doc.push_str(&format!(
            "  q{slot}: search(query: {}, type: ISSUE) {{ issueCount }}\n",
            graphql_string(filter)
        ));
    }
    doc.push('}');
    doc
}

pub(crate) fn alias_count(data: &Value, slot: usize) -> u64 {
    data.get(format!("q{slot}"))
        .and_then(|v| v.get("issueCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Progress over batched requests; hidden for trivially short runs.
pub(crate) fn batch_bar(batches: usize, label: &'static str) -> ProgressBar {
    if batches < 2 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(batches as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:30.cyan/blue}] {pos}/{len}")
            .expect("valid progress template")
            .progress_chars("█▓░"),
    );
    bar.set_message(label);
    bar
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;
    use std::cell::RefCell;

    use serde_json::{json, Value};

    use crate::github::{Forge, QueryError, RateLimitInfo};

    /// Routes every query through a scripted handler, recording the call.
    pub(crate) struct ScriptedForge<F: Fn(&str, &[(&str, String)]) -> Value> {
        handler: F,
        pub queries: RefCell<Vec<(String, Vec<(String, String)>)>>,
        pub paces: Cell<usize>,
    }

    impl<F: Fn(&str, &[(&str, String)]) -> Value> ScriptedForge<F> {
        pub fn new(handler: F) -> Self {
            Self { handler, queries: RefCell::new(Vec::new()), paces: Cell::new(0) }
        }

        pub fn calls(&self) -> usize {
            self.queries.borrow().len()
        }

        pub fn query_text(&self, index: usize) -> String {
            self.queries.borrow()[index].0.clone()
        }

        pub fn variables(&self, index: usize) -> Vec<(String, String)> {
            self.queries.borrow()[index].1.clone()
        }
    }

    impl<F: Fn(&str, &[(&str, String)]) -> Value> Forge for ScriptedForge<F> {
        fn query(&self, document: &str, variables: &[(&str, String)]) -> Result<Value, QueryError> {
            let recorded =
                variables.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<Vec<_>>();
            self.queries.borrow_mut().push((document.to_string(), recorded));
            Ok((self.handler)(document, variables))
        }

        fn query_partial(
            &self,
            document: &str,
            variables: &[(&str, String)],
        ) -> Result<Value, QueryError> {
            self.query(document, variables)
        }

        fn pace(&self) {
            self.paces.set(self.paces.get() + 1);
        }

        fn rate_limit_info(&self) -> Option<RateLimitInfo> {
            None
        }
    }

    /// Aliased-count payload: slot `i` answers `counts[i]`.
    pub(crate) fn count_payload(counts: &[u64]) -> Value {
        let mut map = serde_json::Map::new();
        for (slot, count) in counts.iter().enumerate() {
            map.insert(format!("q{slot}"), json!({ "issueCount": count }));
        }
        Value::Object(map)
    }
}
