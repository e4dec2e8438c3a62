//! Per-client rate limiting and CSRF token bookkeeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::store::{ExpiringStore, MemoryStore};

/// Fixed window: `count` requests seen since the window opened, resetting
/// at `reset_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: Instant,
}

pub struct RateLimiter {
    store: Arc<dyn ExpiringStore<RateWindow>>,
    window: Duration,
    max_requests: u32,
    // get + set on the store must be one step
    guard: Mutex<()>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), window, max_requests)
    }

    pub fn with_store(
        store: Arc<dyn ExpiringStore<RateWindow>>,
        window: Duration,
        max_requests: u32,
    ) -> Self {
        Self {
            store,
            window,
            max_requests,
            guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<dyn ExpiringStore<RateWindow>> {
        Arc::clone(&self.store)
    }

    /// Count one request for `key`. Returns `Err(retry_after_secs)` once the
    /// window is full.
    pub fn check(&self, key: &str, now: Instant) -> Result<(), u64> {
        let _held = self.guard.lock().unwrap_or_else(|p| p.into_inner());

        let mut window = self.store.get(key, now).unwrap_or(RateWindow {
            count: 0,
            reset_at: now + self.window,
        });
        if window.count >= self.max_requests {
            let remaining = window.reset_at.saturating_duration_since(now);
            // Round up so clients never retry a moment too early.
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            debug!(key, retry_after = secs, "Rate limit hit");
            return Err(secs.max(1));
        }
        window.count += 1;
        self.store.set(key.to_string(), window, window.reset_at);
        Ok(())
    }
}

/// CSRF tokens bound to the client key that requested them.
pub struct CsrfTokens {
    store: Arc<dyn ExpiringStore<String>>,
    ttl: Duration,
}

impl CsrfTokens {
    pub fn new(ttl: Duration) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), ttl)
    }

    pub fn with_store(store: Arc<dyn ExpiringStore<String>>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> Arc<dyn ExpiringStore<String>> {
        Arc::clone(&self.store)
    }

    pub fn issue(&self, client: &str, now: Instant) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .set(token.clone(), client.to_string(), now + self.ttl);
        token
    }

    /// Live token issued to this same client. Tokens are reusable until they
    /// expire.
    pub fn validate(&self, token: &str, client: &str, now: Instant) -> bool {
        !token.is_empty() && self.store.get(token, now).is_some_and(|owner| owner == client)
    }
}

/// Anything the sweeper can clean.
pub trait Sweep: Send + Sync {
    fn sweep_expired(&self, now: Instant) -> usize;
}

impl<V> Sweep for Arc<dyn ExpiringStore<V>> {
    fn sweep_expired(&self, now: Instant) -> usize {
        self.sweep(now)
    }
}

/// Background task that drops expired entries on a fixed period.
pub fn spawn_sweeper(
    period: Duration,
    stores: Vec<Box<dyn Sweep>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately; nothing to sweep yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // Tokio's clock so a paused runtime drives expiry too.
            let now = tokio::time::Instant::now().into_std();
            let removed: usize = stores.iter().map(|s| s.sweep_expired(now)).sum();
            if removed > 0 {
                debug!(removed, "Swept expired limiter and CSRF entries");
            }
        }
    })
}
