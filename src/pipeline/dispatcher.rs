use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Successful-download counter shared by all workers of a page.
#[derive(Debug, Default, Clone)]
pub struct ProgressCounter {
    completed: Arc<AtomicUsize>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one success, returning the new total.
    pub fn increment(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Fixed-capacity task pool. `submit` waits for a free slot; `drain` is the
/// end-of-page barrier.
pub struct BoundedDispatcher<T> {
    slots: Arc<Semaphore>,
    workers: usize,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> BoundedDispatcher<T> {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            slots: Arc::new(Semaphore::new(workers)),
            workers,
            tasks: JoinSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.workers
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn `task` once a worker slot is free. The slot is released when the task ends.
    pub async fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed");
        self.tasks.spawn(async move {
            let out = task.await;
            drop(permit);
            out
        });
    }

    /// Wait for every submitted task. Tasks that panicked are logged and left out.
    pub async fn drain(&mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(out) => results.push(out),
                Err(e) => error!("Download task aborted: {}", e),
            }
        }
        results
    }
}
