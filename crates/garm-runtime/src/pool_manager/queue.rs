//! Bounded worker pool for provider create/delete/start/stop calls (§4.2
//! worker task 7 "Provisioning queue"). Tasks are detached once spawned;
//! each one is responsible for writing its own result back to the store.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps concurrent provider calls per manager (§4.2: "e.g. 10 concurrent
/// provider calls per manager").
pub struct ProvisioningQueue {
    semaphore: Arc<Semaphore>,
}

impl ProvisioningQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Runs `task` once a permit is available. The task runs to completion
    /// even if the caller drops its own future first.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            task.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_spawned_tasks() {
        let queue = ProvisioningQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            queue.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
