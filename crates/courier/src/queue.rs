use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use tokio::task::{JoinError, JoinSet};

/// FIFO work queue running at most `concurrency` items at once.
///
/// Items start in admission order. The owner drives completions through
/// [`WorkQueue::next_completion`]; each completion frees a slot for the next
/// pending item.
pub(crate) struct WorkQueue<T, W> {
    concurrency: usize,
    pending: VecDeque<T>,
    running: JoinSet<()>,
    worker: W,
}

impl<T, W, Fut> WorkQueue<T, W>
where
    W: Fn(T) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub(crate) fn new(concurrency: NonZeroUsize, worker: W) -> Self {
        Self {
            concurrency: concurrency.get(),
            pending: VecDeque::new(),
            running: JoinSet::new(),
            worker,
        }
    }

    /// Admits an item, starting it right away if a slot is free.
    pub(crate) fn push(&mut self, item: T) {
        self.pending.push_back(item);
        self.fill();
    }

    /// Waits for the next running item to finish.
    ///
    /// Returns `None` when nothing is running. Cancel safe.
    pub(crate) async fn next_completion(&mut self) -> Option<Result<(), JoinError>> {
        let done = self.running.join_next().await?;
        self.fill();
        Some(done)
    }

    /// No item is running or waiting.
    pub(crate) fn is_drained(&self) -> bool {
        self.running.is_empty() && self.pending.is_empty()
    }

    pub(crate) fn running(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    fn fill(&mut self) {
        while self.running.len() < self.concurrency {
            let Some(item) = self.pending.pop_front() else { break };
            self.running.spawn((self.worker)(item));
        }
    }
}
