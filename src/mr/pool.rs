use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::error::StageError;

/// Spawns every job on the runtime, at most `limit` running at a time, and
/// waits for all of them. Results come back in job order.
pub async fn run_tasks<T, F>(limit: usize, jobs: impl IntoIterator<Item = F>) -> Vec<Result<T, StageError>>
where
    F: Future<Output = Result<T, StageError>> + Send + 'static,
    T: Send + 'static,
{
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let sem = sem.clone();
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await?;
                job.await
            })
        })
        .collect();
    log::debug!("spawned {} tasks, {} at a time", handles.len(), limit.max(1));

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(StageError::from).and_then(|res| res))
        .collect()
}
