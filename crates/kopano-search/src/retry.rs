//! Deadlock-retry policy for the search folder engine's per-folder row
//! lock (§4.4, §8 invariant table: "Database deadlocks at the row-lock
//! step → retry up to 4 times, then skip (counted)").
//!
//! A small fixed backoff schedule with jitter, plus a counter so callers
//! can report how many attempts a batch burned through.

use std::time::Duration;

use kopano_core::Error;
use rand::Rng;

/// Base delays for attempts 0..=3, doubling each time (50/100/200/400ms),
/// scaled to the engine's "retry up to 4 times" bound.
const BASE_DELAYS_MS: [u64; 4] = [50, 100, 200, 400];

/// Outcome of a retried operation, including how many attempts it took.
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Retries `op` up to 4 times on `Error::Deadlock`/`Error::LockTimeout`,
/// sleeping a jittered backoff between attempts. Any other error is
/// returned immediately. On exhausting retries, returns the last error.
pub async fn retry_on_deadlock<T, F, Fut>(mut op: F) -> Result<RetryOutcome<T>, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(RetryOutcome { value, attempts: attempt }),
            Err(e) if is_retryable(&e) && (attempt as usize) < BASE_DELAYS_MS.len() => {
                let delay = jittered(BASE_DELAYS_MS[attempt as usize]);
                asupersync::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(e: &Error) -> bool {
    matches!(e, Error::Deadlock(_) | Error::LockTimeout(_))
}

fn jittered(base_ms: u64) -> Duration {
    let mut rng = rand::rng();
    let jitter = rng.random_range(-25..=25i64);
    let ms = (base_ms as i64 + base_ms as i64 * jitter / 100).max(1) as u64;
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn gives_up_after_four_retries() {
        let calls = AtomicU32::new(0);
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let result = rt.block_on(retry_on_deadlock(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::Deadlock("folder:1".into())) }
        }));
        assert!(result.is_err());
        // initial attempt + 4 retries = 5 calls
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let result = rt.block_on(retry_on_deadlock(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), Error>(Error::NotFound("x".into())) }
        }));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
