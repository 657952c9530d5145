use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

/// Races a source call against the shutdown token. On cancellation the
/// pending call is abandoned and the caller gets
/// [`ExtractError::Cancelled`] instead of blocking on a slow source.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, ExtractError>
where
    F: Future<Output = Result<T, ExtractError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ExtractError::Cancelled),
        res = fut => res,
    }
}
