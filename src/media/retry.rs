use std::future::Future;

use tracing::warn;

use crate::error::FetchError;

/// Errors that can tell whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Cancelled)
    }
}

/// All attempts failed; `last` is the error of the final one.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` up to `max_attempts` times, returning the first success.
///
/// Attempts follow each other immediately. A non-retryable error ends the
/// loop early. `max_attempts` of zero is treated as one.
pub async fn with_retries<T, E, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, Exhausted<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let remaining = max_attempts - attempt;
                if remaining == 0 || !e.is_retryable() {
                    return Err(Exhausted { attempts: attempt, last: e });
                }
                warn!(attempt, remaining, error = %e, "attempt failed, retrying");
                attempt += 1;
            }
        }
    }
}
