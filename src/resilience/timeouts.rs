//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap dials and downstream calls with a deadline
//! - Keep "deadline elapsed" distinct from the operation's own error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Callers log the two cases differently; the breaker counts both

use std::future::Future;
use std::time::Duration;

/// Outcome of a deadline-bounded operation that did not succeed.
#[derive(Debug)]
pub enum DeadlineError<E> {
    /// The deadline elapsed before the operation finished.
    Elapsed(Duration),
    /// The operation finished with its own error.
    Failed(E),
}

/// Run `fut` under `deadline`.
pub async fn with_deadline<F, T, E>(deadline: Duration, fut: F) -> Result<T, DeadlineError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Failed(e)),
        Err(_) => Err(DeadlineError::Elapsed(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_is_distinct_from_failure() {
        let slow = with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;
        assert!(matches!(slow, Err(DeadlineError::Elapsed(d)) if d == Duration::from_secs(1)));

        let failed = with_deadline(Duration::from_secs(1), async { Err::<(), _>("boom") }).await;
        assert!(matches!(failed, Err(DeadlineError::Failed("boom"))));

        let ok = with_deadline(Duration::from_secs(1), async { Ok::<_, ()>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
