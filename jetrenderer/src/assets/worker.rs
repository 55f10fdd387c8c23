use crate::error::AssetError;
use futures::{executor::ThreadPool, task::SpawnExt};
use std::sync::OnceLock;

fn pool() -> Result<&'static ThreadPool, AssetError> {
    static POOL: OnceLock<Result<ThreadPool, String>> = OnceLock::new();

    POOL.get_or_init(|| {
        ThreadPool::builder()
            .pool_size(2)
            .name_prefix("jetrenderer-assets-")
            .create()
            .map_err(|err| err.to_string())
    })
    .as_ref()
    .map_err(|reason| AssetError::Worker(reason.clone()))
}

/// Runs `work` on the shared asset thread pool and resolves with its result.
///
/// The caller stays on its own executor: only the returned future needs to be
/// polled there, so results are always written back on the run loop.
pub async fn unblock<T, F>(work: F) -> Result<T, AssetError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = pool()?
        .spawn_with_handle(async move { work() })
        .map_err(|err| AssetError::Worker(err.to_string()))?;
    Ok(handle.await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_runs_off_the_calling_thread() {
        let caller = std::thread::current().id();
        let worker = pollster::block_on(unblock(|| std::thread::current().id())).unwrap();
        assert_ne!(caller, worker);
    }

    #[test]
    fn results_come_back_intact() {
        let sum = pollster::block_on(unblock(|| (1..=10).sum::<u32>())).unwrap();
        assert_eq!(sum, 55);
    }
}
