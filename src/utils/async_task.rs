use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::timeout;
use tracing::error;

use crate::Result;
use crate::SystemError;
use crate::UpstreamError;

/// Runs `task` under a deadline; elapsed deadlines become `UpstreamError::Timeout`.
pub(crate) async fn with_timeout<T, F>(
    duration: Duration,
    task: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, task).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(duration).into()),
    }
}

/// Polls `task` to completion, turning a panic into `SystemError::WorkerPanicked`.
pub(crate) async fn catch_panic<F, T>(
    name: &str,
    task: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("task {name} panicked: {message}");
            Err(SystemError::WorkerPanicked(format!("{name}: {message}")).into())
        }
    }
}
