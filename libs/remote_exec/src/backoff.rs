//! Generic retry-with-fixed-backoff, grounded in the same shape the teacher
//! codebase uses for client retries (`utils::backoff::retry`, as called from
//! `storage_controller::safekeeper::Safekeeper::with_client_retries`): a
//! fallible future factory, a fatal-error predicate, a warn threshold and a
//! max attempt count, driven to completion or exhaustion.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::RETRY_BACKOFF;

/// Retries `op` up to `max_attempts` times with a fixed delay between
/// attempts. Stops early if `is_fatal` says the error can't be helped by
/// retrying, or if `cancel` fires.
pub async fn retry<T, E, O, F>(
    mut op: O,
    is_fatal: impl Fn(&E) -> bool,
    warn_threshold: u32,
    max_attempts: u32,
    description: &str,
    cancel: &CancellationToken,
) -> Result<T, E>
where
    O: FnMut() -> F,
    F: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = op().await;
        match result {
            Ok(value) => return Ok(value),
            Err(e) if is_fatal(&e) || attempt >= max_attempts || cancel.is_cancelled() => {
                return Err(e);
            }
            Err(e) => {
                if attempt >= warn_threshold {
                    warn!(attempt, max_attempts, %description, "retrying after failure");
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
    }
}

fn backoff_delay(_attempt: u32) -> Duration {
    RETRY_BACKOFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            |_: &&str| true,
            10,
            3,
            "test",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_: &&str| false,
            10,
            3,
            "test",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("auth failed") }
            },
            |e: &&str| *e == "auth failed",
            10,
            5,
            "test",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result, Err("auth failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
