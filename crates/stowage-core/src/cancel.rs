use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StowageError};

/// Race `fut` against `cancel`, yielding [`StowageError::Cancelled`] if the token fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StowageError::Cancelled),
        res = fut => res,
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StowageError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
