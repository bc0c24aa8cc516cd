//! Pacing: keeps chunk sends under the device channel's message quota.
//!
//! Two pacers:
//!   FixedInterval: sleep a fixed interval after every chunk (default 10s)
//!   TokenBucket: `rate` tokens/minute, `burst` capacity; waits for a token
//!
//! Unlike a QoS bucket, a pacer never drops: a chunk that finds the bucket
//! empty waits for the next token.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use fwbroker_core::config::{PacingConfig, TransferConfig};

#[async_trait]
pub trait Pacer: Send + Sync {
    /// Called after each chunk send; returns when the next send may start.
    async fn pace(&self);
}

/// Build the pacer described by the transfer config.
pub fn from_config(config: &TransferConfig) -> Box<dyn Pacer> {
    match config.pacing {
        PacingConfig::Fixed => Box::new(FixedInterval::new(config.chunk_send_interval())),
        PacingConfig::TokenBucket {
            rate_per_minute,
            burst,
        } => Box::new(TokenBucket::new(rate_per_minute as f64 / 60.0, burst as f64)),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Pacer for FixedInterval {
    async fn pace(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Slowest refill a bucket accepts: one token per hour.
pub const MIN_REFILL_RATE: f64 = 1.0 / 3600.0;

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket starts full. `refill_rate` is tokens per second.
    ///
    /// A rate below [`MIN_REFILL_RATE`] (zero or NaN included) is raised to
    /// it, and capacity is at least one token, so every wait is finite.
    pub fn new(refill_rate: f64, capacity: f64) -> Self {
        let refill_rate = refill_rate.max(MIN_REFILL_RATE);
        let capacity = capacity.max(1.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, waiting for the refill if the bucket is empty.
    pub async fn acquire(&self) {
        // Holding the lock across the sleep serialises waiters in FIFO order.
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens < 1.0 {
            let deficit = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_rate);
            tokio::time::sleep(wait).await;
            self.refill(&mut state);
        }
        state.tokens = (state.tokens - 1.0).max(0.0);
    }

    pub async fn tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[async_trait]
impl Pacer for TokenBucket {
    async fn pace(&self) {
        self.acquire().await;
    }
}
