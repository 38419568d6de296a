//! Worker-pool stages connected by bounded channels
//!
//! A [`Stage`] owns a fixed number of workers that pull from one shared input
//! channel, run a transform, and push any output onto a bounded output channel.
//! The output channel closes once every worker has stopped, so downstream
//! consumers simply read until `None`.

use crate::CatalogError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Sends `item`, waiting for capacity unless the token is cancelled first
///
/// If the channel has room the item is delivered even when the token is
/// already cancelled; only a send that would block observes cancellation.
pub async fn send_or_cancel<T>(
    sender: &mpsc::Sender<T>,
    item: T,
    token: &CancellationToken,
) -> Result<(), CatalogError> {
    tokio::select! {
        biased;
        result = sender.send(item) => {
            result.map_err(|_| CatalogError::ChannelClosed("receiver dropped"))
        }
        _ = token.cancelled() => Err(CatalogError::Cancelled),
    }
}

/// Builds a closed channel already holding every item
///
/// The channel capacity equals the item count, so nothing is ever blocked or
/// dropped while loading it.
pub fn preloaded<T>(items: impl IntoIterator<Item = T>) -> mpsc::Receiver<T> {
    let items: Vec<T> = items.into_iter().collect();
    let (sender, receiver) = mpsc::channel(items.len().max(1));

    for item in items {
        if sender.try_send(item).is_err() {
            tracing::error!("Preloaded channel rejected an item");
        }
    }

    receiver
}

/// A fixed-size pool of workers between two channels
#[derive(Debug, Clone)]
pub struct Stage {
    name: &'static str,
    workers: usize,
    buffer: usize,
}

impl Stage {
    /// Creates a stage description
    ///
    /// # Arguments
    ///
    /// * `name` - Used in log output
    /// * `workers` - Number of concurrent workers (at least one is spawned)
    /// * `buffer` - Capacity of the output channel
    pub fn new(name: &'static str, workers: usize, buffer: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
            buffer: buffer.max(1),
        }
    }

    /// Spawns the workers and returns the output channel plus a join handle
    ///
    /// Each worker loops: stop if the token is cancelled, take the next input,
    /// run `transform`, and forward `Some` results. A transform that fails for
    /// one item is expected to log it and return `None`; it never stops the
    /// stage. Workers exit when the input channel is drained and closed, when
    /// the token is cancelled, or when the output receiver is dropped.
    pub fn run<I, O, F, Fut>(
        &self,
        token: &CancellationToken,
        input: mpsc::Receiver<I>,
        transform: F,
    ) -> (mpsc::Receiver<O>, StageHandle)
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<O>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let input = Arc::new(Mutex::new(input));
        let transform = Arc::new(transform);
        let mut workers = JoinSet::new();

        for worker in 0..self.workers {
            let input = Arc::clone(&input);
            let transform = Arc::clone(&transform);
            let sender = sender.clone();
            let token = token.clone();
            let name = self.name;

            workers.spawn(async move {
                let mut handled = 0usize;

                loop {
                    if token.is_cancelled() {
                        break;
                    }

                    let next = {
                        let mut guard = input.lock().await;
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => None,
                            item = guard.recv() => item,
                        }
                    };

                    let Some(item) = next else {
                        break;
                    };
                    handled += 1;

                    if let Some(output) = transform(item).await {
                        if let Err(e) = send_or_cancel(&sender, output, &token).await {
                            tracing::debug!("{} worker {}: output not delivered: {}", name, worker, e);
                            break;
                        }
                    }
                }

                tracing::debug!("{} worker {} stopped after {} items", name, worker, handled);
            });
        }

        (
            receiver,
            StageHandle {
                name: self.name,
                workers,
            },
        )
    }
}

/// Join handle for the workers of a running [`Stage`]
#[derive(Debug)]
pub struct StageHandle {
    name: &'static str,
    workers: JoinSet<()>,
}

impl StageHandle {
    /// Waits for every worker to stop
    ///
    /// Returns the number of workers that panicked.
    pub async fn join(mut self) -> usize {
        let mut panicked = 0;

        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("{} worker panicked: {}", self.name, e);
                panicked += 1;
            }
        }

        panicked
    }
}
