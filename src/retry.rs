//! Retries for remote object fetches
//!
//! A download that fails with a transient error (connect failure, timeout,
//! 429 or 5xx) is tried again after a doubling, jittered pause. Anything
//! else goes straight back to the cache, which keeps its last good value.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;
use tracing::warn;

/// How many times to retry a fetch and how long to pause in between
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_object_fetch()
    }
}

impl RetryConfig {
    /// Profile used for object store downloads
    ///
    /// Worst case adds a few seconds to a refresh, well inside the lock lease.
    pub fn for_object_fetch() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }

    /// Pause before retry number `attempt` (0-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// Up to 25% on top of `base` so processes refreshing together spread out
fn jittered(base: Duration) -> Duration {
    let spread = RandomState::new().build_hasher().finish() % 1000;
    base + base.mul_f64(spread as f64 / 4000.0)
}

/// Errors that may succeed when simply tried again
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let pause = jittered(config.backoff(attempt));
                warn!(
                    what,
                    attempt = attempt + 1,
                    pause_ms = pause.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
