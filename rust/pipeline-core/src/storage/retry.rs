// rust/pipeline-core/src/storage/retry.rs

//! Backoff for transient object-store failures.
//!
//! Only the S3 backend retries. Once a storage error reaches the record
//! reader it is fatal.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::S3Config;

/// Doubling backoff, capped, with up to 25% random stretch per wait.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_retries: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl From<&S3Config> for Backoff {
    fn from(config: &S3Config) -> Self {
        Self {
            max_retries: config.max_retries,
            first_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Wait before retry `retry` (0 is the first retry), or `None` once the
    /// budget is spent.
    pub fn wait(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let doubled = self.first_delay.saturating_mul(1u32 << retry.min(31));
        let wait = doubled.min(self.max_delay);
        if !self.jitter {
            return Some(wait);
        }
        Some(wait.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25)))
    }
}

/// How one request attempt ended.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Transient(E),
    Fatal(E),
}

/// Repeats `request` while it fails transiently and the backoff allows.
/// On exhaustion the last transient error is returned.
pub async fn with_backoff<T, E, F, Fut>(backoff: &Backoff, mut request: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut retry = 0;
    loop {
        let error = match request().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(error) => return Err(error),
            Attempt::Transient(error) => error,
        };
        let Some(wait) = backoff.wait(retry) else {
            return Err(error);
        };
        tracing::debug!(retry, wait_ms = wait.as_millis() as u64, "retrying storage request");
        tokio::time::sleep(wait).await;
        retry += 1;
    }
}
