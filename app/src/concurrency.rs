use std::{error::Error, future::Future, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("concurrency conflict")]
pub struct ConflictError;

const MAX_ATTEMPTS: u64 = 10;

/// Retry loop for optimistic concurrency conflicts. The callback is retried with a growing
/// backoff as long as its error chain contains a [`ConflictError`]. If the conflict persists
/// past [`MAX_ATTEMPTS`], the error of the final attempt is returned and the caller surfaces
/// it as a transient failure.
pub async fn retry_loop<F: Future<Output = Result<T, E>>, T, E: Error + 'static>(
    mut cb: impl FnMut() -> F,
) -> Result<T, E> {
    for i in 1..MAX_ATTEMPTS {
        match cb().await {
            Ok(result) => return Ok(result),
            Err(e) if is_conflict(Some(&e)) => {
                let timeout = Duration::from_secs(i);
                log::info!("ledger write conflict, retrying in {:?}", timeout);
                tokio::time::sleep(timeout).await;
            }
            Err(e) => return Err(e),
        }
    }
    cb().await
}

fn is_conflict(e: Option<&(dyn Error + 'static)>) -> bool {
    e.map(|e| e.is::<ConflictError>() || is_conflict(e.source()))
        .unwrap_or(false)
}
