//! **RetryPolicy** — the uniform retry/backoff/timeout wrapper applied to
//! every call into an external collaborator (device, extractor, recognizer,
//! reasoner). Policy values differ per call site; the mechanism is shared.

use crate::error::{CoreError, CoreResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Per-call-site retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Hard per-attempt timeout; the operation is abandoned when exceeded.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Run `op` under the policy. `op` is a factory producing a fresh future per
/// attempt. A timeout consumes an attempt like any other failure. On
/// exhaustion the last error is returned tagged `RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(label: &str, config: RetryConfig, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last: Option<CoreError> = None;

    for attempt in 1..=attempts {
        let err = match tokio::time::timeout(config.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => CoreError::Timeout(config.timeout),
        };
        warn!(label, attempt, max = attempts, error = %err, "attempt failed");
        last = Some(err);
        if attempt < attempts {
            tokio::time::sleep(config.backoff).await;
        }
    }

    Err(CoreError::RetriesExhausted {
        label: label.to_string(),
        attempts,
        last: Box::new(last.unwrap_or(CoreError::TransientIo("no attempts made".to_string()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry("flaky", fast_config(), move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CoreError::TransientIo(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: CoreResult<()> = with_retry("doomed", fast_config(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::TransientIo("nope".to_string()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(CoreError::RetriesExhausted {
                label, attempts, ..
            }) => {
                assert_eq!(label, "doomed");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_operation_times_out() {
        let config = RetryConfig {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };
        let result: CoreResult<()> = with_retry("hung", config, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(CoreError::RetriesExhausted { last, .. }) => {
                assert!(matches!(*last, CoreError::Timeout(_)));
            }
            other => panic!("expected RetriesExhausted(Timeout), got {other:?}"),
        }
    }
}
