//! Transient-error retry policy for compute API calls.
//!
//! Every API call the engine issues goes through [`RetryPolicy::run`]. A call
//! is retried when the failure is plausibly transient: connection resets and
//! truncated responses, server-side 5xx/429, rate-limit 403s, and credential
//! refresh hiccups. HTTP/2 GOAWAY and ENHANCE_YOUR_CALM responses double the
//! backoff multiplier since they signal deliberate shedding.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ComputeError;

/// Hard cap on attempts, counting the first call.
const MAX_ATTEMPTS: u32 = 3;

/// How a failure affects the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transience {
    Permanent,
    Transient,
    /// Transient, and the server asked us to calm down.
    TransientBackOff,
}

/// Retry configuration. The defaults are the production policy; tests shrink
/// the delays to keep the suite fast.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Policy with near-zero delays for tests.
    pub fn immediate() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::from_millis(1),
        }
    }

    /// Invoke `call`, retrying transient failures.
    ///
    /// The backoff before attempt `n+1` is `(jitter + base) * n * multiplier`
    /// where the multiplier starts at 1 and doubles on back-off-requested
    /// failures.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ComputeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ComputeError>>,
    {
        let mut multiplier: u32 = 1;
        let mut attempt: u32 = 1;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let transience = classify(&error);
            if transience == Transience::Permanent || attempt >= self.max_attempts {
                return Err(error);
            }
            if transience == Transience::TransientBackOff {
                multiplier *= 2;
            }

            let jitter = rand::thread_rng().gen_range(0..=self.max_jitter.as_millis() as u64);
            let delay = (Duration::from_millis(jitter) + self.base_delay) * attempt * multiplier;
            warn!(call = what, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying transient API failure");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn classify(error: &ComputeError) -> Transience {
    match error {
        ComputeError::Transport { message } => {
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("goaway") || lowered.contains("enhance_your_calm") {
                Transience::TransientBackOff
            } else if lowered.contains("connection reset by peer") || lowered.contains("unexpected eof") {
                Transience::Transient
            } else {
                Transience::Permanent
            }
        }
        ComputeError::Http { status, reason, .. } => {
            if *status >= 500 || *status == 429 {
                Transience::Transient
            } else if *status == 403 && reason.as_deref() == Some("rateLimitExceeded") {
                Transience::Transient
            } else {
                Transience::Permanent
            }
        }
        ComputeError::Auth { .. } => Transience::Transient,
        _ => Transience::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn http(status: u16, reason: Option<&str>) -> ComputeError {
        ComputeError::http(status, reason.map(str::to_string), "boom")
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = RetryPolicy::immediate()
            .run("disks.insert", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(http(503, None))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly three attempts");
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = RetryPolicy::immediate()
            .run("disks.get", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(http(404, Some("notFound")))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = RetryPolicy::immediate()
            .run("images.insert", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ComputeError::transport("connection reset by peer"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sleeps_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_jitter: Duration::from_millis(1),
        };
        let started = Instant::now();
        let result: Result<(), _> = policy.run("op", || async { Err(http(500, None)) }).await;
        assert!(result.is_err());
        // Two sleeps: 20ms * 1 + 20ms * 2 at minimum.
        assert!(started.elapsed() >= Duration::from_millis(60), "elapsed {:?}", started.elapsed());
    }

    #[test]
    fn classification_matrix() {
        assert_eq!(classify(&http(500, None)), Transience::Transient);
        assert_eq!(classify(&http(429, None)), Transience::Transient);
        assert_eq!(classify(&http(403, Some("rateLimitExceeded"))), Transience::Transient);
        assert_eq!(classify(&http(403, Some("forbidden"))), Transience::Permanent);
        assert_eq!(classify(&http(400, None)), Transience::Permanent);
        assert_eq!(classify(&ComputeError::transport("unexpected EOF")), Transience::Transient);
        assert_eq!(classify(&ComputeError::transport("http2 GOAWAY received")), Transience::TransientBackOff);
        assert_eq!(
            classify(&ComputeError::transport("stream reset: ENHANCE_YOUR_CALM")),
            Transience::TransientBackOff
        );
        assert_eq!(classify(&ComputeError::auth("token refresh failed")), Transience::Transient);
        assert_eq!(classify(&ComputeError::response("truncated json")), Transience::Permanent);
    }
}
