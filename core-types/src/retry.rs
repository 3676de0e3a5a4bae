// Copyright (c) James Kassemi, SC, US. All rights reserved.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Jittered exponential backoff for transient async failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms.max(1)),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Policy for idempotent vendor lookups (status, reference data).
    pub fn default_network() -> Self {
        Self::new(3, 250, 2_000, 0.25)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let capped = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        if self.jitter_pct <= 0.0 {
            return Duration::from_millis(capped);
        }
        let spread = (capped as f64 * self.jitter_pct) as i64;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(capped.saturating_add_signed(delta))
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping the
    /// backoff schedule between failures. The closure receives the attempt
    /// index starting at zero.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    sleep(self.next_delay(attempt - 1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{advance, pause};

    #[test]
    fn constructor_clamps_degenerate_inputs() {
        let policy = RetryPolicy::new(0, 0, 0, 7.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn delays_double_until_cap() {
        let policy = RetryPolicy::new(4, 100, 300, 0.0);
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(300));
        assert_eq!(policy.next_delay(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        pause();
        let policy = RetryPolicy::new(3, 10, 10, 0.0);
        let attempts = Arc::new(AtomicUsize::new(0));
        let advancer = tokio::spawn(async {
            advance(Duration::from_millis(10)).await;
            advance(Duration::from_millis(10)).await;
        });
        let result: Result<usize, &str> = policy
            .retry_async(|attempt| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err("transient") } else { Ok(attempt) }
                }
            })
            .await;
        advancer.await.unwrap();
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        pause();
        let policy = RetryPolicy::new(2, 5, 5, 0.0);
        let advancer = tokio::spawn(async { advance(Duration::from_millis(5)).await });
        let result: Result<(), &str> = policy.retry_async(|_| async { Err("down") }).await;
        advancer.await.unwrap();
        assert_eq!(result, Err("down"));
    }
}
