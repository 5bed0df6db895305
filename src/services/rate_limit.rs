//! Outbound request budget for the FieldClimate API.
//!
//! Each endpoint class keeps a rolling log of dispatch instants. A request is
//! admitted only while fewer than the budgeted number of dispatches fall in
//! the trailing minute and hour. Above half of a budget, dispatches are spread
//! out so the remaining allowance is not spent in one burst.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Station details and sensor lists.
    Metadata,
    /// Measurement pages.
    Data,
}

impl EndpointClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl RateBudget {
    #[must_use]
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            per_hour: per_hour.max(1),
        }
    }

    /// Delay before the next dispatch, given the class's log (oldest first).
    fn delay(&self, log: &VecDeque<Instant>, now: Instant) -> Duration {
        window_delay(log, now, MINUTE, self.per_minute)
            .max(window_delay(log, now, HOUR, self.per_hour))
    }
}

/// Budgets by endpoint class; a class without a budget is not throttled.
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    budgets: HashMap<EndpointClass, RateBudget>,
}

impl RateLimits {
    #[must_use]
    pub fn with(mut self, class: EndpointClass, budget: RateBudget) -> Self {
        self.budgets.insert(class, budget);
        self
    }

    #[must_use]
    pub fn budget(&self, class: EndpointClass) -> Option<RateBudget> {
        self.budgets.get(&class).copied()
    }
}

fn window_delay(log: &VecDeque<Instant>, now: Instant, window: Duration, limit: u32) -> Duration {
    let limit = limit as usize;
    let in_window: Vec<Instant> = log
        .iter()
        .copied()
        .filter(|t| now.saturating_duration_since(*t) < window)
        .collect();
    let used = in_window.len();

    if used >= limit {
        // Wait until enough entries age out to leave room for one more.
        let freeing = in_window[used - limit];
        return (freeing + window).saturating_duration_since(now);
    }

    let soft = limit / 2;
    if used < soft.max(1) {
        return Duration::ZERO;
    }

    // Spacing grows linearly from zero at half budget to window/limit at full.
    let pressure = (used - soft) as f64 / (limit - soft) as f64;
    let spacing = window.div_f64(limit as f64).mul_f64(pressure);
    match in_window.last() {
        Some(last) => (*last + spacing).saturating_duration_since(now),
        None => Duration::ZERO,
    }
}

pub struct RateLimiter {
    limits: RateLimits,
    log: Mutex<HashMap<EndpointClass, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            log: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request of `class` fits the budget, then record it.
    ///
    /// Never rejects; returns the total time spent waiting.
    pub async fn acquire(&self, class: EndpointClass) -> Duration {
        let Some(budget) = self.limits.budget(class) else {
            return Duration::ZERO;
        };

        let mut waited = Duration::ZERO;
        loop {
            let delay = {
                let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
                let entries = log.entry(class).or_default();
                let now = Instant::now();

                while entries
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= HOUR)
                {
                    entries.pop_front();
                }

                let delay = budget.delay(entries, now);
                if delay.is_zero() {
                    entries.push_back(now);
                    return waited;
                }
                delay
            };

            tracing::debug!(
                class = %class,
                delay_ms = delay.as_millis() as u64,
                "Throttling outbound request"
            );
            sleep(delay).await;
            waited += delay;
        }
    }

    /// Dispatches of `class` in the trailing minute.
    #[must_use]
    pub fn recent(&self, class: EndpointClass) -> usize {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        log.get(&class).map_or(0, |entries| {
            entries
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < MINUTE)
                .count()
        })
    }
}
