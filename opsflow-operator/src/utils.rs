use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

/// Run the given tasks concurrently, with at most `parallelism` in flight at once.
///
/// A `parallelism` of zero or less disables the bound. Results are returned in input order, and
/// a failed task never prevents its siblings from running.
pub async fn run_bounded<I, F>(parallelism: i64, tasks: I) -> Vec<Result<()>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let permits = usize::try_from(parallelism).ok().filter(|val| *val > 0).map(|val| Arc::new(Semaphore::new(val)));
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let permits = permits.clone();
            tokio::spawn(async move {
                let _permit = match permits {
                    Some(permits) => Some(permits.acquire_owned().await.context("task semaphore closed")?),
                    None => None,
                };
                task.await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.context("error joining bounded task").and_then(|res| res));
    }
    results
}
