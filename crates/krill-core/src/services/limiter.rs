//! # Limiter
//!
//! Token bucket shared by any number of publishers. Tokens accrue at `rate`
//! per second up to `burst`; the bucket starts full.
//!
//! `acquire` suspends until a token is available. It never fails with a
//! "rate exceeded" error, only with [`Cancelled`].

use super::{withdraw, EntityService, Scope};
use crate::error::{BuildError, Cancelled};
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EntityKind, LimiterSpec};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Float slack for refill arithmetic.
const EPSILON: f64 = 1e-6;

/// Longest single sleep in `acquire`; the bucket is checked again after it.
const MAX_WAIT_SECS: f64 = 3600.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct Limiter {
    name: String,
    rate: f64,
    burst: u32,
    bucket: Mutex<Bucket>,
    granted: AtomicU64,
}

impl Limiter {
    /// A full bucket. `rate` must be positive and `burst` at least one.
    #[must_use]
    pub fn new(name: &str, rate: f64, burst: u32) -> Self {
        Self {
            name: name.to_string(),
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
            granted: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Tokens handed out so far.
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(f64::from(self.burst));
        bucket.last = now;
    }

    /// Take a token or report how long until one accrues.
    fn reserve(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 - EPSILON {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            self.granted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.rate;
            Err(Duration::from_secs_f64(wait.clamp(EPSILON, MAX_WAIT_SECS)))
        }
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_ok()
    }

    /// Wait for a token or for `cancel`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let wait = match self.reserve() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Tokens currently in the bucket.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }
}

impl Entity for Limiter {
    const KIND: EntityKind = EntityKind::Limiter;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct LimiterService {
    stores: Arc<Stores>,
}

impl LimiterService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for LimiterService {
    type Spec = LimiterSpec;
    type Entity = Limiter;

    fn create(&self, spec: &LimiterSpec) -> Result<Arc<Limiter>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        if !spec.rate.is_finite() || spec.rate <= 0.0 {
            return Err(scope.invalid(format!("rate must be positive, got {}", spec.rate)));
        }
        if spec.burst == 0 {
            return Err(scope.invalid("burst must be at least 1"));
        }
        scope.admit(
            &self.stores.limiters,
            Arc::new(Limiter::new(&spec.name, spec.rate, spec.burst)),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.limiters, name);
    }
}
