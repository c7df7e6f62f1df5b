//! Sliding-window error aggregation gating new-position opening.
//!
//! **Closes and rollbacks are never gated by this breaker** — callers must
//! only consult [`CircuitBreaker::can_open_new_position`] before *opening*
//! exposure; the slice executor's rollback path and the orchestrator's
//! final-imbalance repair call the venue directly.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Errors within `window` needed to trip the breaker from CLOSED.
    pub error_threshold: u32,
    pub window: Duration,
    /// How long OPEN blocks new openings before probing.
    pub cooldown: Duration,
    /// How many opportunities HALF_OPEN admits before requiring the
    /// consecutive-success count to close.
    pub half_open_probe_limit: u32,
    pub close_after_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_probe_limit: 1,
            close_after_successes: 3,
        }
    }
}

struct Inner {
    state: CircuitState,
    error_timestamps: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_probes_admitted: u32,
    consecutive_successes: u32,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                error_timestamps: VecDeque::new(),
                opened_at: None,
                half_open_probes_admitted: 0,
                consecutive_successes: 0,
            }),
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.maybe_transition_from_open();
        self.inner.lock().state
    }

    /// If OPEN and cooldown has elapsed, transitions to HALF_OPEN. Cheap and
    /// idempotent; called by every public method so state is always fresh.
    fn maybe_transition_from_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probes_admitted = 0;
                    inner.consecutive_successes = 0;
                    tracing::info!("circuit breaker cooldown elapsed, transitioning to half-open");
                }
            }
        }
    }

    /// Whether a new position may be opened. HALF_OPEN admits a bounded
    /// number of probe opportunities; every call counted here is assumed to
    /// correspond to one opportunity the caller is about to attempt.
    pub fn can_open_new_position(&self) -> bool {
        self.maybe_transition_from_open();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_probes_admitted < self.config.half_open_probe_limit {
                    inner.half_open_probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_error(&self, kind: &str) {
        self.maybe_transition_from_open();
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(kind, "error during half-open probe, reopening circuit");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.error_timestamps.clear();
                inner.error_timestamps.push_back(now);
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.error_timestamps.push_back(now);
                let window = self.config.window;
                while let Some(front) = inner.error_timestamps.front() {
                    if now.duration_since(*front) > window {
                        inner.error_timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.error_timestamps.len() as u32 >= self.config.error_threshold {
                    tracing::warn!(
                        count = inner.error_timestamps.len(),
                        "circuit breaker tripped, blocking new positions"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::Open => {
                inner.error_timestamps.push_back(now);
            }
        }
    }

    pub fn record_success(&self) {
        self.maybe_transition_from_open();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.close_after_successes {
                    tracing::info!("circuit breaker closing after consecutive successes");
                    inner.state = CircuitState::Closed;
                    inner.error_timestamps.clear();
                    inner.opened_at = None;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Closed => {
                // A success in the normal operating state doesn't need to do
                // anything beyond letting old errors age out of the window.
            }
            CircuitState::Open => {}
        }
    }
}
