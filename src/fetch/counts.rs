//! Batched per-login counts: monthly history and rolling lookback windows.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{months_before, Month, MonthMap, PeriodCounts, Window, LOOKBACK_MONTHS};
use crate::github::{Forge, ALIAS_BATCH_SIZE};

use super::{alias_count, batch_bar, build_count_query, CountKind};

/// Review and comment histories split per login, zero months absent.
#[derive(Debug, Clone, Default)]
pub struct MonthlyCounts {
    pub reviews: BTreeMap<String, MonthMap>,
    pub comments: BTreeMap<String, MonthMap>,
}

/// Per-month reviewed and commented counts for every login over `months`.
///
/// One search per login, month, and metric, packed [`ALIAS_BATCH_SIZE`]
/// to a request. Zero counts are dropped so the maps stay sparse, but
/// every login keeps an entry even when it collected nothing.
pub fn monthly_counts(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    logins: &[String],
    months: &[Month],
) -> Result<MonthlyCounts> {
    let mut counts = MonthlyCounts::default();
    for login in logins {
        counts.reviews.entry(login.clone()).or_default();
        counts.comments.entry(login.clone()).or_default();
    }

    let mut tasks: Vec<(&String, Month, CountKind)> = Vec::new();
    for login in logins {
        for &month in months {
            for kind in CountKind::BOTH {
                tasks.push((login, month, kind));
            }
        }
    }
    if tasks.is_empty() {
        return Ok(counts);
    }

    let bar = batch_bar(tasks.chunks(ALIAS_BATCH_SIZE).len(), "monthly counts");
    for (index, batch) in tasks.chunks(ALIAS_BATCH_SIZE).enumerate() {
        if index > 0 {
            api.pace();
        }
        let filters = batch
            .iter()
            .map(|(login, month, kind)| kind.month_filter(owner, name, login, *month))
            .collect::<Vec<_>>();
        let data = api.query(&build_count_query(&filters), &[])?;
        for (slot, (login, month, kind)) in batch.iter().enumerate() {
            let count = alias_count(&data, slot);
            if count == 0 {
                continue;
            }
            let target = match kind {
                CountKind::Reviewed => &mut counts.reviews,
                CountKind::Commented => &mut counts.comments,
            };
            target.entry((*login).clone()).or_default().insert(*month, count);
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    debug!("counted {} logins over {} months", logins.len(), months.len());
    Ok(counts)
}

/// Rolling-window tallies per login, keyed by lookback length.
///
/// Unlike the monthly maps, zeros are kept: an empty window is still an
/// answer and the report layer checks for the entry when it decides
/// whether search results can be trusted.
pub fn period_counts(
    api: &dyn Forge,
    owner: &str,
    name: &str,
    logins: &[String],
    today: NaiveDate,
) -> Result<BTreeMap<String, PeriodCounts>> {
    let mut result: BTreeMap<String, PeriodCounts> = BTreeMap::new();
    let mut tasks: Vec<(&String, u32, CountKind)> = Vec::new();
    for login in logins {
        let slots = result.entry(login.clone()).or_default();
        for n in LOOKBACK_MONTHS {
            slots.entry(Window::Months(n)).or_default();
            for kind in CountKind::BOTH {
                tasks.push((login, n, kind));
            }
        }
    }
    if tasks.is_empty() {
        return Ok(result);
    }

    let bar = batch_bar(tasks.chunks(ALIAS_BATCH_SIZE).len(), "window tallies");
    for (index, batch) in tasks.chunks(ALIAS_BATCH_SIZE).enumerate() {
        if index > 0 {
            api.pace();
        }
        let filters = batch
            .iter()
            .map(|(login, n, kind)| {
                kind.window_filter(owner, name, login, months_before(today, *n))
            })
            .collect::<Vec<_>>();
        let data = api.query(&build_count_query(&filters), &[])?;
        for (slot, (login, n, kind)) in batch.iter().enumerate() {
            let count = alias_count(&data, slot);
            let tally = result
                .entry((*login).clone())
                .or_default()
                .entry(Window::Months(*n))
                .or_default();
            match kind {
                CountKind::Reviewed => tally.reviewed = count,
                CountKind::Commented => tally.commented = count,
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(result)
}
