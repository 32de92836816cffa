//! Scrape fallback for logins the search API under-reports.
//!
//! Search sometimes answers zero for accounts that demonstrably review
//! and merge. The human-facing results page still renders the right
//! numbers, so for those logins the window tallies are re-read from page
//! text instead, behind a gate check that keeps the request count small.

mod page;

pub use page::{HttpSearchPage, PageError, SearchPage};

use std::cell::Cell;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use crate::domain::{months_before, PeriodCounts, PeriodTally, ReviewerRecord, Window};
use crate::fetch::CountKind;
use crate::github::Clock;

/// Minimum spacing between page fetches.
const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(1);
/// Base wait after a throttling response.
const THROTTLE_DELAY: Duration = Duration::from_secs(2);
/// Jitter spread added to the throttle wait, in milliseconds.
const THROTTLE_JITTER_MS: u64 = 2_000;
/// Attempts per count before giving up with zero.
const FETCH_ATTEMPTS: u32 = 3;

/// Windows scraped after the gate; the gate itself covers 24.
const FOLLOW_UP_WINDOWS: [u32; 4] = [1, 3, 6, 12];

static OPEN_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d,]+)\s+Open").unwrap());
static CLOSED_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d,]+)\s+Closed").unwrap());

/// What search reported for one login and window, reconciled against the
/// raw activity maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowCount {
    Reported(u64),
    SearchBlind,
}

fn classify(tally: PeriodTally, record: &ReviewerRecord) -> WindowCount {
    let reported = tally.reviewed + tally.commented;
    if reported == 0 && record.has_activity() {
        WindowCount::SearchBlind
    } else {
        WindowCount::Reported(reported)
    }
}

fn needs_scraping(counts: &PeriodCounts, record: &ReviewerRecord) -> bool {
    !counts.is_empty()
        && counts.values().all(|tally| classify(*tally, record) == WindowCount::SearchBlind)
}

/// Page-scraping corrector with its own pacing, independent of the
/// GraphQL budget.
pub struct Scraper<'a> {
    page: &'a dyn SearchPage,
    clock: &'a dyn Clock,
    last_fetch: Cell<Option<DateTime<Utc>>>,
}

impl<'a> Scraper<'a> {
    pub fn new(page: &'a dyn SearchPage, clock: &'a dyn Clock) -> Self {
        Self { page, clock, last_fetch: Cell::new(None) }
    }

    /// Overwrite window tallies for logins search is blind to.
    ///
    /// The widest window is fetched first as a gate: when both of its
    /// metrics come back zero the login is treated as fully inactive and
    /// the remaining windows keep their zeros.
    pub fn apply_fallback(
        &self,
        owner: &str,
        name: &str,
        today: NaiveDate,
        reviewers: &BTreeMap<String, ReviewerRecord>,
        period_counts: &mut BTreeMap<String, PeriodCounts>,
    ) {
        for (login, counts) in period_counts.iter_mut() {
            let Some(record) = reviewers.get(login) else {
                continue;
            };
            if !needs_scraping(counts, record) {
                continue;
            }
            debug!("search is blind to {}, scraping result pages", login);

            let gate_reviewed =
                self.scrape_count(owner, name, login, 24, CountKind::Reviewed, today);
            let gate_commented =
                self.scrape_count(owner, name, login, 24, CountKind::Commented, today);
            if gate_reviewed == 0 && gate_commented == 0 {
                debug!("scrape gate empty for {}, windows stay zero", login);
                continue;
            }
            counts.insert(
                Window::Months(24),
                PeriodTally { reviewed: gate_reviewed, commented: gate_commented },
            );
            for window_months in FOLLOW_UP_WINDOWS {
                let tally = PeriodTally {
                    reviewed: self
                        .scrape_count(owner, name, login, window_months, CountKind::Reviewed, today),
                    commented: self.scrape_count(
                        owner,
                        name,
                        login,
                        window_months,
                        CountKind::Commented,
                        today,
                    ),
                };
                counts.insert(Window::Months(window_months), tally);
            }
        }
    }

    /// One scraped count; throttling retries with jitter, everything
    /// else degrades to zero.
    fn scrape_count(
        &self,
        owner: &str,
        name: &str,
        login: &str,
        window_months: u32,
        kind: CountKind,
        today: NaiveDate,
    ) -> u64 {
        let filter = kind.window_filter(owner, name, login, months_before(today, window_months));
        let Some(url) = search_url(&filter) else {
            return 0;
        };
        for attempt in 0..FETCH_ATTEMPTS {
            self.pace();
            match self.page.fetch(&url) {
                Ok(body) => return parse_result_count(&body),
                Err(PageError::Throttled) => {
                    if attempt + 1 < FETCH_ATTEMPTS {
                        let jitter =
                            Duration::from_millis(retry_jitter_ms(attempt, THROTTLE_JITTER_MS));
                        self.clock.sleep(THROTTLE_DELAY + jitter);
                    }
                }
                Err(err) => {
                    debug!("scrape failed for {}: {}", login, err);
                    return 0;
                }
            }
        }
        debug!("scrape throttled out for {}, counting zero", login);
        0
    }

    fn pace(&self) {
        let now = self.clock.now();
        if let Some(last) = self.last_fetch.get() {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < MIN_FETCH_INTERVAL {
                self.clock.sleep(MIN_FETCH_INTERVAL - elapsed);
            }
        }
        self.last_fetch.set(Some(self.clock.now()));
    }
}

fn search_url(filter: &str) -> Option<String> {
    Url::parse_with_params("https://github.com/search", [("q", filter), ("type", "pullrequests")])
        .ok()
        .map(|url| url.to_string())
}

/// Sum the "N Open" / "M Closed" markers on a results page.
fn parse_result_count(body: &str) -> u64 {
    let mut total = 0;
    for pattern in [&OPEN_COUNT, &CLOSED_COUNT] {
        if let Some(captures) = pattern.captures(body) {
            total += captures[1].replace(',', "").parse::<u64>().unwrap_or(0);
        }
    }
    total
}

/// Jitter in `[0, spread_ms)` derived from the attempt number; a small
/// LCG keeps the retry spread deterministic without a rand dependency.
fn retry_jitter_ms(attempt: u32, spread_ms: u64) -> u64 {
    // LCG parameters (Numerical Recipes)
    const A: u64 = 1_664_525;
    const C: u64 = 1_013_904_223;
    const M: u64 = 1u64 << 32;
    let state = A.wrapping_mul(attempt as u64 + 1).wrapping_add(C) % M;
    state % spread_ms.max(1)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use chrono::TimeZone;

    use super::*;
    use crate::domain::Month;

    struct FakePage {
        script: RefCell<VecDeque<Result<String, PageError>>>,
        default_body: String,
        urls: RefCell<Vec<String>>,
    }

    impl FakePage {
        fn new(default_body: &str) -> Self {
            Self {
                script: RefCell::new(VecDeque::new()),
                default_body: default_body.to_string(),
                urls: RefCell::new(Vec::new()),
            }
        }

        fn push(self, response: Result<String, PageError>) -> Self {
            self.script.borrow_mut().push_back(response);
            self
        }

        fn fetches(&self) -> usize {
            self.urls.borrow().len()
        }
    }

    impl SearchPage for FakePage {
        fn fetch(&self, url: &str) -> Result<String, PageError> {
            self.urls.borrow_mut().push(url.to_string());
            match self.script.borrow_mut().pop_front() {
                Some(result) => result,
                None => Ok(self.default_body.clone()),
            }
        }
    }

    struct FakeClock {
        now: DateTime<Utc>,
        sleeps: RefCell<Vec<Duration>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                now: Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap(),
                sleeps: RefCell::new(Vec::new()),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.now
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }

    fn today() -> NaiveDate {
        "2024-06-15".parse().expect("date")
    }

    fn active_record() -> ReviewerRecord {
        let mut record = ReviewerRecord::new("https://avatars.example/alice".to_string());
        record.monthly.insert("2024-01".parse::<Month>().expect("month"), 5);
        record
    }

    fn zero_counts() -> PeriodCounts {
        Window::lookbacks().map(|window| (window, PeriodTally::default())).collect()
    }

    fn alice_maps(
        record: ReviewerRecord,
        counts: PeriodCounts,
    ) -> (BTreeMap<String, ReviewerRecord>, BTreeMap<String, PeriodCounts>) {
        (
            BTreeMap::from([("alice".to_string(), record)]),
            BTreeMap::from([("alice".to_string(), counts)]),
        )
    }

    #[test]
    fn test_gate_alone_runs_for_fully_quiet_logins() {
        let page = FakePage::new("No results matched your search.");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        assert_eq!(page.fetches(), 2);
        let tally = counts["alice"][&Window::Months(24)];
        assert_eq!((tally.reviewed, tally.commented), (0, 0));
    }

    #[test]
    fn test_gate_hit_scrapes_every_window() {
        let page = FakePage::new("42 Open\n58 Closed");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        assert_eq!(page.fetches(), 10);
        for window in Window::lookbacks() {
            let tally = counts["alice"][&window];
            assert_eq!((tally.reviewed, tally.commented), (100, 100));
        }
    }

    #[test]
    fn test_logins_search_already_sees_are_left_alone() {
        let page = FakePage::new("42 Open");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let mut seen = zero_counts();
        seen.insert(Window::Months(6), PeriodTally { reviewed: 9, commented: 0 });
        let (reviewers, mut counts) = alice_maps(active_record(), seen.clone());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        assert_eq!(page.fetches(), 0);
        assert_eq!(counts["alice"], seen);
    }

    #[test]
    fn test_records_without_raw_activity_are_skipped() {
        let page = FakePage::new("42 Open");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let idle = ReviewerRecord::new("https://avatars.example/alice".to_string());
        let (reviewers, mut counts) = alice_maps(idle, zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        assert_eq!(page.fetches(), 0);
    }

    #[test]
    fn test_throttled_fetch_retries_with_jitter() {
        let page = FakePage::new("")
            .push(Err(PageError::Throttled))
            .push(Ok("3 Open".to_string()));
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        // Gate reviewed takes two fetches, gate commented one, then the
        // four follow-up windows at two each.
        assert_eq!(page.fetches(), 11);
        let tally = counts["alice"][&Window::Months(24)];
        assert_eq!((tally.reviewed, tally.commented), (3, 0));
        let throttle_waits = clock
            .sleeps
            .borrow()
            .iter()
            .filter(|d| **d >= THROTTLE_DELAY)
            .count();
        assert_eq!(throttle_waits, 1);
    }

    #[test]
    fn test_throttling_exhausts_to_zero() {
        let mut page = FakePage::new("");
        for _ in 0..6 {
            page = page.push(Err(PageError::Throttled));
        }
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        // Both gate metrics burn all three attempts, then the gate stops
        // the login with its zeros intact.
        assert_eq!(page.fetches(), 6);
        let tally = counts["alice"][&Window::Months(1)];
        assert_eq!((tally.reviewed, tally.commented), (0, 0));
    }

    #[test]
    fn test_network_errors_degrade_to_zero() {
        let page = FakePage::new("")
            .push(Err(PageError::Other("connection reset".to_string())))
            .push(Err(PageError::Other("connection reset".to_string())));
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        assert_eq!(page.fetches(), 2);
        let tally = counts["alice"][&Window::Months(24)];
        assert_eq!((tally.reviewed, tally.commented), (0, 0));
    }

    #[test]
    fn test_scrape_urls_target_the_search_frontend() {
        let page = FakePage::new("1 Open");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        let urls = page.urls.borrow();
        assert!(urls[0].starts_with("https://github.com/search?"));
        assert!(urls[0].contains("type=pullrequests"));
        assert!(urls[0].contains("reviewed-by%3Aalice"));
        // 24 months before 2024-06-15.
        assert!(urls[0].contains("updated%3A%3E%3D2022-06-15"));
        assert!(urls[1].contains("commenter%3Aalice"));
    }

    #[test]
    fn test_fetches_keep_a_minimum_interval() {
        let page = FakePage::new("No results");
        let clock = FakeClock::new();
        let scraper = Scraper::new(&page, &clock);
        let (reviewers, mut counts) = alice_maps(active_record(), zero_counts());

        scraper.apply_fallback("octo", "demo", today(), &reviewers, &mut counts);

        // The fake clock never advances, so every fetch after the first
        // waits out the full interval.
        assert_eq!(clock.sleeps.borrow().as_slice(), &[MIN_FETCH_INTERVAL]);
    }

    #[test]
    fn test_result_count_sums_open_and_closed_with_commas() {
        assert_eq!(parse_result_count("1,234 Open and 5,678 Closed"), 6912);
        assert_eq!(parse_result_count("12 Open"), 12);
        assert_eq!(parse_result_count("7 Closed"), 7);
        assert_eq!(parse_result_count("<html>nothing here</html>"), 0);
    }

    #[test]
    fn test_retry_jitter_is_deterministic_and_bounded() {
        assert_eq!(retry_jitter_ms(0, 2000), retry_jitter_ms(0, 2000));
        assert!(retry_jitter_ms(0, 2000) < 2000);
        assert!(retry_jitter_ms(1, 2000) < 2000);
        assert_ne!(retry_jitter_ms(0, 2000), retry_jitter_ms(1, 2000));
    }
}
