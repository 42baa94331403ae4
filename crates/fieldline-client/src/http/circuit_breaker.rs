//! Circuit breaker guarding the request pipeline
//!
//! Tracks consecutive transient failures per client. At the configured
//! threshold the circuit opens and every call fails fast for a cool-down
//! window; once the window elapses a single trial call is allowed through —
//! its success closes the circuit, its failure re-opens it.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without contacting the remote
    Open,
    /// One trial request is allowed to probe recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self { failure_threshold, cooldown }
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be greater than 0".to_string()));
        }
        if self.cooldown.is_zero() {
            return Err(Error::Config("cooldown must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Shared-state circuit breaker
///
/// All state lives behind one short-lived mutex; no lock is ever held across
/// I/O, so concurrent callers contend only for the time it takes to read or
/// update a counter. Generic over [`Clock`] so the cool-down window can be
/// tested with `MockClock` instead of sleeping.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
            clock: Arc::new(clock),
        })
    }

    /// Whether a call may proceed right now.
    ///
    /// In the open state this transitions to half-open once the cool-down
    /// has elapsed; the caller that observes the transition owns the single
    /// trial slot. Callers that receive `true` must report the outcome via
    /// `record_success` or `record_failure`.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed =
                    inner.opened_at.map(|at| self.clock.now().duration_since(at));
                if elapsed.is_some_and(|e| e >= self.config.cooldown) {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    debug!("circuit half-open, allowing trial call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("circuit closed after successful trial call");
            }
            CircuitState::Open => {
                // Late success from a call that started before the circuit
                // opened; leave the state alone.
            }
        }
    }

    /// Record a transient failure.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit opened after consecutive transient failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                inner.trial_in_flight = false;
                warn!("circuit re-opened after failed trial call");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current consecutive transient-failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Reset to closed, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!("circuit breaker manually reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("circuit breaker lock poisoned, recovering state");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("default config is valid")
    }
}
