//! Incremental synchronization against the cached snapshot.
//!
//! Each run fetches one repo-wide activity summary, compares it with the
//! cached one, and picks the cheapest tier that still produces a correct
//! snapshot. History strictly before the cached `end_month` is sealed
//! and copied forward untouched; the window from `end_month` through the
//! current month is re-fetched because search indexing lags and even a
//! closed month can gain late activity.

pub mod budget;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::discover;
use crate::domain::{
    month_ranges, Month, MonthMap, PeriodCounts, RepoActivity, ReviewerRecord, Snapshot,
    SNAPSHOT_VERSION,
};
use crate::fetch::{self, fallback_avatar, MonthlyCounts};
use crate::github::{Clock, Forge, RateLimitInfo};
use crate::scrape::{Scraper, SearchPage};

use budget::{check_rate_limit_budget, estimate_full_calls, estimate_incremental_calls};

/// Everything the synchronizer asks of the forge, as one seam.
pub trait RepoSource {
    fn repo_activity(&self, owner: &str, name: &str, today: NaiveDate) -> Result<RepoActivity>;

    fn repo_start(&self, owner: &str, name: &str) -> Result<Month>;

    fn discover(
        &self,
        owner: &str,
        name: &str,
        months: &[Month],
        top_n: usize,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<String>>;

    fn avatars(&self, logins: &[String]) -> Result<BTreeMap<String, String>>;

    fn monthly_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        months: &[Month],
    ) -> Result<MonthlyCounts>;

    fn merge_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        months: &[Month],
    ) -> Result<BTreeMap<String, MonthMap>>;

    fn period_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        today: NaiveDate,
    ) -> Result<BTreeMap<String, PeriodCounts>>;

    fn apply_scrape_fallback(
        &self,
        owner: &str,
        name: &str,
        today: NaiveDate,
        reviewers: &BTreeMap<String, ReviewerRecord>,
        period_counts: &mut BTreeMap<String, PeriodCounts>,
    );

    fn rate_limit_info(&self) -> Option<RateLimitInfo>;
}

/// Production source: GraphQL for everything, result pages for the
/// scrape fallback.
pub struct GraphSource<'a> {
    api: &'a dyn Forge,
    scraper: Scraper<'a>,
}

impl<'a> GraphSource<'a> {
    pub fn new(api: &'a dyn Forge, page: &'a dyn SearchPage, clock: &'a dyn Clock) -> Self {
        Self { api, scraper: Scraper::new(page, clock) }
    }
}

impl RepoSource for GraphSource<'_> {
    fn repo_activity(&self, owner: &str, name: &str, today: NaiveDate) -> Result<RepoActivity> {
        fetch::repo_activity(self.api, owner, name, today)
    }

    fn repo_start(&self, owner: &str, name: &str) -> Result<Month> {
        fetch::repo_start(self.api, owner, name)
    }

    fn discover(
        &self,
        owner: &str,
        name: &str,
        months: &[Month],
        top_n: usize,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        discover::discover_reviewers(self.api, owner, name, months, top_n, exclude)
    }

    fn avatars(&self, logins: &[String]) -> Result<BTreeMap<String, String>> {
        fetch::avatars(self.api, logins)
    }

    fn monthly_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        months: &[Month],
    ) -> Result<MonthlyCounts> {
        fetch::monthly_counts(self.api, owner, name, logins, months)
    }

    fn merge_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        months: &[Month],
    ) -> Result<BTreeMap<String, MonthMap>> {
        fetch::merge_counts(self.api, owner, name, logins, months)
    }

    fn period_counts(
        &self,
        owner: &str,
        name: &str,
        logins: &[String],
        today: NaiveDate,
    ) -> Result<BTreeMap<String, PeriodCounts>> {
        fetch::period_counts(self.api, owner, name, logins, today)
    }

    fn apply_scrape_fallback(
        &self,
        owner: &str,
        name: &str,
        today: NaiveDate,
        reviewers: &BTreeMap<String, ReviewerRecord>,
        period_counts: &mut BTreeMap<String, PeriodCounts>,
    ) {
        self.scraper.apply_fallback(owner, name, today, reviewers, period_counts);
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.api.rate_limit_info()
    }
}

/// Staleness tier for one run, cheapest match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// No usable snapshot; rebuild everything.
    Cold,
    /// Nothing changed upstream; only the bookkeeping is refreshed.
    FullSkip,
    /// PR count unchanged; reviewer set frozen to the cached logins.
    SkipDiscovery,
    /// Merge total unchanged; cached merge maps kept verbatim.
    SkipMerges,
    /// Everything over the stale window is refreshed.
    FullRefresh,
}

pub struct SyncOutcome {
    pub snapshot: Snapshot,
    pub tier: Tier,
}

/// Run one synchronization pass, cold or incremental.
pub fn synchronize(
    source: &dyn RepoSource,
    owner: &str,
    name: &str,
    cached: Option<Snapshot>,
    top_n: usize,
    exclude: &BTreeSet<String>,
    today: NaiveDate,
) -> Result<SyncOutcome> {
    match cached {
        Some(snapshot) => incremental_update(source, owner, name, snapshot, top_n, exclude, today),
        None => {
            let snapshot = full_build(source, owner, name, top_n, exclude, today)?;
            Ok(SyncOutcome { snapshot, tier: Tier::Cold })
        }
    }
}

/// Build a snapshot from scratch over the repository's entire history.
pub fn full_build(
    source: &dyn RepoSource,
    owner: &str,
    name: &str,
    top_n: usize,
    exclude: &BTreeSet<String>,
    today: NaiveDate,
) -> Result<Snapshot> {
    let activity = source.repo_activity(owner, name, today)?;
    let start_month = source.repo_start(owner, name)?;
    let end_month = Month::containing(today);
    let months = month_ranges(start_month, end_month);
    info!("building {}/{} from scratch over {} months", owner, name, months.len());
    check_rate_limit_budget(source, estimate_full_calls(months.len(), top_n));

    let discovered = source.discover(owner, name, &months, top_n, exclude)?;
    let avatar_map = source.avatars(&discovered)?;
    let counts = source.monthly_counts(owner, name, &discovered, &months)?;
    let merges = source.merge_counts(owner, name, &discovered, &months)?;
    let mut period = source.period_counts(owner, name, &discovered, today)?;

    let mut reviewers = BTreeMap::new();
    for login in &discovered {
        let mut record = ReviewerRecord::new(
            avatar_map.get(login).cloned().unwrap_or_else(|| fallback_avatar(login)),
        );
        if let Some(map) = counts.reviews.get(login) {
            record.monthly = map.clone();
        }
        if let Some(map) = counts.comments.get(login) {
            record.comment_monthly = map.clone();
        }
        if let Some(map) = merges.get(login) {
            record.merge_monthly = map.clone();
        }
        reviewers.insert(login.clone(), record);
    }
    source.apply_scrape_fallback(owner, name, today, &reviewers, &mut period);

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        start_month,
        end_month,
        reviewers,
        activity: Some(activity),
        reviewer_period_counts: period,
    })
}

/// Refresh a cached snapshot, fetching only what its tier requires.
pub fn incremental_update(
    source: &dyn RepoSource,
    owner: &str,
    name: &str,
    cached: Snapshot,
    top_n: usize,
    exclude: &BTreeSet<String>,
    today: NaiveDate,
) -> Result<SyncOutcome> {
    let fresh = source.repo_activity(owner, name, today)?;
    let tier = pick_tier(&cached, &fresh);
    let current_month = Month::containing(today);
    info!("{}/{} sync tier: {:?}", owner, name, tier);

    if tier == Tier::FullSkip {
        let mut snapshot = cached;
        snapshot.end_month = current_month;
        snapshot.activity = Some(fresh);
        return Ok(SyncOutcome { snapshot, tier });
    }

    let stale_months = month_ranges(cached.end_month, current_month);
    let history_len = month_ranges(cached.start_month, current_month).len();
    check_rate_limit_budget(
        source,
        estimate_incremental_calls(cached.reviewers.len(), stale_months.len(), history_len),
    );

    let discovered = if tier == Tier::SkipDiscovery {
        cached.reviewers.keys().cloned().collect::<Vec<_>>()
    } else {
        source.discover(owner, name, &stale_months, top_n, exclude)?
    };

    let new_logins: Vec<String> = discovered
        .iter()
        .filter(|login| !cached.reviewers.contains_key(*login))
        .cloned()
        .collect();
    let avatar_map = if new_logins.is_empty() {
        BTreeMap::new()
    } else {
        source.avatars(&new_logins)?
    };

    let stale_counts = source.monthly_counts(owner, name, &discovered, &stale_months)?;

    // Sealed history exists only when the cache spans more than the
    // stale window's first month.
    let history_months: Vec<Month> = if !new_logins.is_empty() && cached.start_month < cached.end_month
    {
        month_ranges(cached.start_month, cached.end_month.prev())
    } else {
        Vec::new()
    };
    let history_counts = if history_months.is_empty() {
        MonthlyCounts::default()
    } else {
        debug!("backfilling {} new reviewers over {} months", new_logins.len(), history_months.len());
        source.monthly_counts(owner, name, &new_logins, &history_months)?
    };

    let (stale_merges, history_merges) = if tier == Tier::SkipMerges {
        (BTreeMap::new(), BTreeMap::new())
    } else {
        let stale = source.merge_counts(owner, name, &discovered, &stale_months)?;
        let history = if history_months.is_empty() {
            BTreeMap::new()
        } else {
            source.merge_counts(owner, name, &new_logins, &history_months)?
        };
        (stale, history)
    };

    let mut reviewers: BTreeMap<String, ReviewerRecord> = BTreeMap::new();
    for login in &discovered {
        let mut record = match cached.reviewers.get(login) {
            Some(existing) => {
                let mut record = existing.clone();
                for month in &stale_months {
                    record.monthly.remove(month);
                    record.comment_monthly.remove(month);
                    if tier != Tier::SkipMerges {
                        record.merge_monthly.remove(month);
                    }
                }
                record
            }
            None => ReviewerRecord::new(
                avatar_map.get(login).cloned().unwrap_or_else(|| fallback_avatar(login)),
            ),
        };
        merge_month_map(&mut record.monthly, history_counts.reviews.get(login));
        merge_month_map(&mut record.monthly, stale_counts.reviews.get(login));
        merge_month_map(&mut record.comment_monthly, history_counts.comments.get(login));
        merge_month_map(&mut record.comment_monthly, stale_counts.comments.get(login));
        merge_month_map(&mut record.merge_monthly, history_merges.get(login));
        merge_month_map(&mut record.merge_monthly, stale_merges.get(login));
        reviewers.insert(login.clone(), record);
    }

    // Reviewers that fell out of the ranking keep their cached record
    // untouched; only their now-relative window tallies are dropped.
    for (login, record) in &cached.reviewers {
        reviewers.entry(login.clone()).or_insert_with(|| record.clone());
    }

    let mut period = source.period_counts(owner, name, &discovered, today)?;
    source.apply_scrape_fallback(owner, name, today, &reviewers, &mut period);

    Ok(SyncOutcome {
        snapshot: Snapshot {
            version: cached.version,
            start_month: cached.start_month,
            end_month: current_month,
            reviewers,
            activity: Some(fresh),
            reviewer_period_counts: period,
        },
        tier,
    })
}

/// First matching tier wins; later checks are not even evaluated.
fn pick_tier(cached: &Snapshot, fresh: &RepoActivity) -> Tier {
    let Some(prior) = &cached.activity else {
        return Tier::FullRefresh;
    };
    if prior.last_pr_updated_at == fresh.last_pr_updated_at
        || prior.repo_totals == fresh.repo_totals
    {
        return Tier::FullSkip;
    }
    if prior.total_pr_count == fresh.total_pr_count {
        return Tier::SkipDiscovery;
    }
    if prior.total_merged_prs == fresh.total_merged_prs {
        return Tier::SkipMerges;
    }
    Tier::FullRefresh
}

fn merge_month_map(target: &mut MonthMap, fetched: Option<&MonthMap>) {
    if let Some(map) = fetched {
        for (&month, &count) in map {
            target.insert(month, count);
        }
    }
}
