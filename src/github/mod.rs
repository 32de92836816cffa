//! GraphQL access to the forge, with retry and rate-limit cooperation.
//!
//! [`Client`] is the only component that talks to the network for query
//! traffic. It classifies failures into transient (retried with a fixed
//! delay), rate-limit signals (waited out without consuming the retry
//! budget), and fatal rejections, and it proactively pauses when a response
//! reports the remaining budget is nearly gone. Everything above consumes it
//! through the [`Forge`] trait.

mod transport;

use std::cell::Cell;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use transport::{GhTransport, QueryTransport, TransportError};

/// Sub-queries batched into one count request.
pub const ALIAS_BATCH_SIZE: usize = 25;
/// Logins batched into one avatar lookup request.
pub const AVATAR_BATCH_SIZE: usize = 15;

const RESET_POLL_CHUNK: Duration = Duration::from_secs(10);

/// Wall-clock seam so pauses and cooldowns are testable.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, dur: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep(&self, dur: Duration) {
        (**self).sleep(dur)
    }
}

impl<T: QueryTransport + ?Sized> QueryTransport for &T {
    fn run_query(&self, query: &str, variables: &[(&str, String)]) -> Result<String, TransportError> {
        (**self).run_query(query, variables)
    }

    fn fetch_rate_limit(&self) -> Result<String, TransportError> {
        (**self).fetch_rate_limit()
    }
}

/// Explicit retry behavior consumed by the client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, the first call included.
    pub max_attempts: u32,
    /// Fixed pause between transient attempts.
    pub retry_delay: Duration,
    /// Fallback pause when the forge signals rate limiting but no usable
    /// reset instant is available.
    pub rate_limit_cooldown: Duration,
    /// Remaining-budget level at which a successful response still triggers
    /// a proactive pause until the reported reset.
    pub low_water_mark: u64,
    /// Slack added on top of a reported reset instant.
    pub reset_margin: Duration,
    /// Pause between consecutive batch requests.
    pub batch_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            retry_delay: Duration::from_secs(2),
            rate_limit_cooldown: Duration::from_secs(60),
            low_water_mark: 100,
            reset_margin: Duration::from_secs(5),
            batch_pause: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("query rejected: {0}")]
    Rejected(String),
    #[error("query reported errors: {0}")]
    ResultErrors(String),
    #[error("malformed response payload: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// Remaining request budget as reported by the REST probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// The query capability everything above the client consumes.
pub trait Forge {
    /// Execute a query, failing on any result-level error.
    fn query(&self, document: &str, variables: &[(&str, String)]) -> Result<Value, QueryError>;

    /// Execute a batched query, tolerating partial results: when one
    /// sub-query fails the rest of the `data` object is still returned.
    fn query_partial(&self, document: &str, variables: &[(&str, String)])
        -> Result<Value, QueryError>;

    /// Short pause between consecutive batch requests.
    fn pace(&self);

    /// Remaining request budget, when the forge can report it.
    fn rate_limit_info(&self) -> Option<RateLimitInfo>;
}

enum FailureClass {
    RateLimited,
    Transient,
    Fatal,
}

fn classify_failure(stderr: &str) -> FailureClass {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("rate limit") || lower.contains("ratelimit") || lower.contains("403") {
        FailureClass::RateLimited
    } else if lower.contains("http 5")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("could not resolve host")
        || lower.contains("network")
    {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

fn result_errors(payload: &Value) -> Option<&Value> {
    payload
        .get("errors")
        .filter(|e| e.as_array().is_some_and(|a| !a.is_empty()))
}

fn errors_mention_rate_limit(errors: &Value) -> bool {
    errors.as_array().into_iter().flatten().any(|e| {
        e.get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.eq_ignore_ascii_case("rate_limited"))
            || e.get("message")
                .and_then(Value::as_str)
                .is_some_and(|m| m.to_ascii_lowercase().contains("rate limit"))
    })
}

fn summarize_errors(errors: &Value) -> String {
    let messages: Vec<&str> = errors
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    if messages.is_empty() {
        errors.to_string()
    } else {
        messages.join("; ")
    }
}

fn usable_data(payload: &Value) -> Option<Value> {
    payload.get("data").filter(|d| !d.is_null()).cloned()
}

fn salvage_partial(stdout: &str) -> Option<Value> {
    let payload: Value = serde_json::from_str(stdout).ok()?;
    usable_data(&payload)
}

/// The production query client.
///
/// One instance lives for exactly one run, so the cached reset instant is
/// naturally per-run state.
pub struct Client<T: QueryTransport, C: Clock> {
    transport: T,
    clock: C,
    policy: RetryPolicy,
    reset_probed: Cell<bool>,
    reset_target: Cell<Option<DateTime<Utc>>>,
}

impl Client<GhTransport, SystemClock> {
    pub fn new() -> Self {
        Self::with_parts(GhTransport, SystemClock, RetryPolicy::default())
    }
}

impl Default for Client<GhTransport, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueryTransport, C: Clock> Client<T, C> {
    pub fn with_parts(transport: T, clock: C, policy: RetryPolicy) -> Self {
        Self {
            transport,
            clock,
            policy,
            reset_probed: Cell::new(false),
            reset_target: Cell::new(None),
        }
    }

    fn execute(
        &self,
        query: &str,
        variables: &[(&str, String)],
        allow_partial: bool,
    ) -> Result<Value, QueryError> {
        let mut failures = 0u32;
        let mut last_failure = String::new();
        loop {
            match self.transport.run_query(query, variables) {
                Ok(raw) => {
                    let payload: Value = serde_json::from_str(&raw)?;
                    if let Some(errors) = result_errors(&payload) {
                        if errors_mention_rate_limit(errors) {
                            warn!("query result reported rate limiting, waiting out the budget");
                            self.wait_for_reset();
                            continue;
                        }
                        if allow_partial {
                            if let Some(data) = usable_data(&payload) {
                                debug!("accepting partial result despite reported errors");
                                self.pause_if_budget_low(&data);
                                return Ok(data);
                            }
                        }
                        return Err(QueryError::ResultErrors(summarize_errors(errors)));
                    }
                    let data = payload.get("data").cloned().unwrap_or(Value::Null);
                    self.pause_if_budget_low(&data);
                    return Ok(data);
                }
                Err(TransportError::Failed { stderr, stdout }) => {
                    let class = classify_failure(&stderr);
                    if let FailureClass::RateLimited = class {
                        warn!("transport reported rate limiting, waiting out the budget");
                        self.wait_for_reset();
                        continue;
                    }
                    if allow_partial {
                        if let Some(data) = salvage_partial(&stdout) {
                            debug!("salvaged partial payload from a failed transport run");
                            return Ok(data);
                        }
                    }
                    if let FailureClass::Fatal = class {
                        return Err(QueryError::Rejected(stderr.trim().to_string()));
                    }
                    failures += 1;
                    last_failure = stderr.trim().to_string();
                }
                Err(TransportError::Spawn(err)) => {
                    failures += 1;
                    last_failure = err.to_string();
                }
            }
            if failures >= self.policy.max_attempts {
                return Err(QueryError::RetriesExhausted { attempts: failures, last: last_failure });
            }
            debug!("transient query failure ({}), retrying: {}", failures, last_failure);
            self.clock.sleep(self.policy.retry_delay);
        }
    }

    /// Pause when a successful response says the budget is nearly spent.
    fn pause_if_budget_low(&self, data: &Value) {
        let Some(rate) = data.get("rateLimit") else { return };
        let Some(remaining) = rate.get("remaining").and_then(Value::as_u64) else { return };
        if remaining > self.policy.low_water_mark {
            return;
        }
        let reset_at = rate.get("resetAt").and_then(Value::as_str).unwrap_or("");
        match DateTime::parse_from_rfc3339(reset_at) {
            Ok(reset) => {
                let until = (reset.with_timezone(&Utc) - self.clock.now())
                    .to_std()
                    .unwrap_or_default();
                let pause = until + self.policy.reset_margin;
                warn!("rate budget low ({} remaining), pausing {}s", remaining, pause.as_secs());
                self.clock.sleep(pause);
            }
            Err(_) => {
                warn!("rate budget low ({} remaining) with no reset instant, cooling down", remaining);
                self.clock.sleep(self.policy.rate_limit_cooldown);
            }
        }
    }

    /// Wait out an exhausted budget. The REST probe runs at most once per
    /// run; the computed reset instant is cached for any later waits. Falls
    /// back to one fixed cooldown when no usable instant is available.
    fn wait_for_reset(&self) {
        if !self.reset_probed.get() {
            self.reset_probed.set(true);
            let target = self
                .rate_limit_probe()
                .and_then(|info| info.reset_at)
                .filter(|reset| *reset - self.clock.now() <= chrono::Duration::minutes(60));
            self.reset_target.set(target);
        }
        let Some(target) = self.reset_target.get() else {
            debug!("no usable reset instant, fixed cooldown");
            self.clock.sleep(self.policy.rate_limit_cooldown);
            return;
        };
        let until = (target - self.clock.now()).to_std().unwrap_or_default();
        if until.is_zero() {
            self.clock.sleep(self.policy.rate_limit_cooldown);
            return;
        }
        let mut remaining = until + self.policy.reset_margin;
        debug!("waiting {}s for rate budget reset", remaining.as_secs());
        while !remaining.is_zero() {
            let step = remaining.min(RESET_POLL_CHUNK);
            self.clock.sleep(step);
            remaining -= step;
        }
    }

    fn rate_limit_probe(&self) -> Option<RateLimitInfo> {
        let raw = match self.transport.fetch_rate_limit() {
            Ok(raw) => raw,
            Err(err) => {
                debug!("rate limit probe unavailable: {}", err);
                return None;
            }
        };
        let payload: Value = serde_json::from_str(&raw).ok()?;
        let core = payload.get("resources")?.get("core")?;
        let remaining = core.get("remaining")?.as_u64()?;
        let reset_at = core
            .get("reset")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        Some(RateLimitInfo { remaining, reset_at })
    }
}

impl<T: QueryTransport, C: Clock> Forge for Client<T, C> {
    fn query(&self, document: &str, variables: &[(&str, String)]) -> Result<Value, QueryError> {
        self.execute(document, variables, false)
    }

    fn query_partial(
        &self,
        document: &str,
        variables: &[(&str, String)],
    ) -> Result<Value, QueryError> {
        self.execute(document, variables, true)
    }

    fn pace(&self) {
        self.clock.sleep(self.policy.batch_pause);
    }

    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.rate_limit_probe()
    }
}
