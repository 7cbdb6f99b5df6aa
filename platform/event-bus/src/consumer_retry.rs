//! Backoff helpers for consumers
//!
//! Consumers never retry a failed handler in-process: a failed message is
//! redelivered by the broker. [`Backoff`] paces that redelivery and the
//! polling loop while the broker is unreachable. [`retry_with_backoff`]
//! bounds the one operation that is retried locally, forwarding a message to
//! the dead-letter topic.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Pacing of redeliveries and local retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts made by [`retry_with_backoff`], the first one included
    pub max_attempts: u32,
    /// First delay of a [`Backoff`] sequence
    pub initial_backoff: Duration,
    /// Upper bound of every delay
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential delay sequence: `initial, 2×initial, …` capped at `max`
///
/// Call [`Backoff::reset`] after a success so the next failure starts from
/// the initial delay again.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial: config.initial_backoff,
            max: config.max_backoff,
            current: config.initial_backoff,
        }
    }

    /// Delay to wait now; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is spent
///
/// Waits a [`Backoff`] delay between attempts and returns the last error
/// when every attempt failed. `name` only labels the log lines.
///
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let receipt = retry_with_backoff(|| async { Ok::<_, String>("acked") }, &RetryConfig::default(), "forward").await?;
/// assert_eq!(receipt, "acked");
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, config: &RetryConfig, name: &str) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = Backoff::new(config);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if attempt == max_attempts {
            warn!(operation = %name, attempts = attempt, error = %error, "Giving up after final attempt");
            return Err(error);
        }

        let delay = backoff.next_delay();
        warn!(
            operation = %name,
            attempt,
            max_attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(15),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 0,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(35));
        assert_eq!(backoff.next_delay(), Duration::from_millis(35));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call < 3 {
                        Err(format!("broker busy ({call})"))
                    } else {
                        Ok(call)
                    }
                }
            },
            &quick(3),
            "forward",
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_attempts_run_out() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(format!("down ({call})")) }
            },
            &quick(2),
            "forward",
        )
        .await;

        assert_eq!(result, Err("down (2)".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let calls = AtomicU32::new(0);

        let _ = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("refused") }
            },
            &quick(0),
            "forward",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _ = retry_with_backoff(|| async { Err::<(), _>("refused") }, &quick(4), "forward").await;

        // 10ms + 15ms + 15ms
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
