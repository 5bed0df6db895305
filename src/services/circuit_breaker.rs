//! Failure isolation for the upstream API.
//!
//! Closed → (threshold transient failures inside the window) → Open →
//! (cool-down elapsed) → HalfOpen, where exactly one trial request is let through.
//! A successful trial request closes the breaker; a failed one re-opens it.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Failures older than this no longer count towards the threshold.
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: VecDeque<Instant> },
    Open { since: Instant },
    HalfOpen,
}

/// Admission ticket returned by [`CircuitBreaker::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single half-open trial request; its outcome decides the next state.
    Trial,
}

pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                failures: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Ask to dispatch a call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CircuitOpen` while the breaker is open, or while a
    /// half-open trial request is already in flight.
    pub fn admit(&self) -> AppResult<Admission> {
        let mut inner = self.lock();
        let now = Instant::now();

        match &*inner {
            Inner::Closed { .. } => Ok(Admission::Normal),
            Inner::Open { since } => {
                let reopen_at = *since + self.config.cooldown;
                if now >= reopen_at {
                    tracing::info!(target_url = %self.target, "Circuit half-open, sending trial request");
                    *inner = Inner::HalfOpen;
                    Ok(Admission::Trial)
                } else {
                    Err(AppError::CircuitOpen {
                        target: self.target.clone(),
                        retry_in: reopen_at - now,
                    })
                }
            }
            Inner::HalfOpen => Err(AppError::CircuitOpen {
                target: self.target.clone(),
                retry_in: Duration::ZERO,
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match &mut *inner {
            Inner::Closed { failures } => failures.clear(),
            Inner::HalfOpen => {
                tracing::info!(target_url = %self.target, "Trial request succeeded, circuit closed");
                *inner = Inner::Closed {
                    failures: VecDeque::new(),
                };
            }
            // A call admitted before the breaker opened; the cool-down stands.
            Inner::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        match &mut *inner {
            Inner::Closed { failures } => {
                while failures
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) > self.config.window)
                {
                    failures.pop_front();
                }
                failures.push_back(now);

                if failures.len() >= self.config.failure_threshold as usize {
                    tracing::warn!(
                        target_url = %self.target,
                        failures = failures.len(),
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit opened"
                    );
                    *inner = Inner::Open { since: now };
                }
            }
            Inner::HalfOpen => {
                tracing::warn!(target_url = %self.target, "Trial request failed, circuit re-opened");
                *inner = Inner::Open { since: now };
            }
            Inner::Open { .. } => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
