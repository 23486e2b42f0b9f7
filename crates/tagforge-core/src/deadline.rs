use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Await `fut`, failing with [`TransportError::TimedOut`] once `deadline` elapses.
/// With no deadline the future runs to completion.
pub(crate) async fn with_deadline<T, F>(
    operation: &str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| TransportError::TimedOut {
                operation: operation.to_string(),
                after,
            })?,
        None => fut.await,
    }
}
