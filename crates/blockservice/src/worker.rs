//! Background announcement of newly added blocks.
//!
//! ```text
//! block_added ──▶ [client chan] ──▶ dispatcher (dedup queue) ──▶ [worker chan] ──▶ N workers ──▶ Exchange::has_block
//! ```
//!
//! The [`Notifier`] boundary is all the service depends on: submit a block
//! or learn that the notifier is closed, and shut it down once.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::block::{Block, Key};
use crate::config::BlockServiceConfig;
use crate::error::WorkerError;
use crate::exchange::Exchange;

/// Receives "block stored locally" events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Submit a newly stored block. Fails once the notifier is shut down.
    async fn block_added(&self, block: &Block) -> Result<(), WorkerError>;

    /// Stop accepting work and wait for background tasks. One-shot.
    async fn shutdown(&self) -> Result<(), WorkerError>;
}

/// Default notifier: announces blocks to the exchange from a task pool.
pub struct Worker {
    requests: mpsc::Sender<Block>,
    cancel: CancellationToken,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Start the dispatcher and worker tasks on the current Tokio runtime.
    ///
    /// With no exchange, submitted blocks are accepted and dropped.
    pub fn new(
        exchange: Option<Arc<dyn Exchange>>,
        config: &BlockServiceConfig,
    ) -> Result<Self, WorkerError> {
        let runtime = Handle::try_current().map_err(|e| WorkerError::Runtime {
            message: format!("no tokio runtime available: {}", e),
        })?;

        let (requests, incoming) =
            mpsc::channel(BlockServiceConfig::channel_capacity(config.client_buffer_size));
        let (work_tx, work_rx) =
            mpsc::channel(BlockServiceConfig::channel_capacity(config.worker_buffer_size));
        let cancel = CancellationToken::new();

        let num_workers = config.num_workers.max(1);
        let mut tasks = Vec::with_capacity(num_workers + 1);
        tasks.push(runtime.spawn(dispatch(incoming, work_tx, cancel.clone())));

        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        for id in 0..num_workers {
            tasks.push(runtime.spawn(announce(
                id,
                work_rx.clone(),
                exchange.clone(),
                cancel.clone(),
            )));
        }

        debug!(num_workers, "started block announcement worker");

        Ok(Self {
            requests,
            cancel,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        })
    }

    /// Whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Notifier for Worker {
    async fn block_added(&self, block: &Block) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Closed);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkerError::Closed),
            sent = self.requests.send(block.clone()) => sent.map_err(|_| WorkerError::Closed),
        }
    }

    async fn shutdown(&self) -> Result<(), WorkerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(WorkerError::Closed);
        }

        self.cancel.cancel();

        let tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        info!("block announcement worker shut down");
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Queue incoming blocks, collapsing duplicates still waiting for a worker.
async fn dispatch(
    mut incoming: mpsc::Receiver<Block>,
    work: mpsc::Sender<Block>,
    cancel: CancellationToken,
) {
    let mut queue: VecDeque<Block> = VecDeque::new();
    let mut queued: HashSet<Key> = HashSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = work.reserve(), if !queue.is_empty() => {
                let Ok(permit) = permit else { break };
                if let Some(block) = queue.pop_front() {
                    queued.remove(block.key());
                    permit.send(block);
                }
            }
            next = incoming.recv() => match next {
                Some(block) => {
                    if queued.insert(block.key().clone()) {
                        queue.push_back(block);
                    } else {
                        debug!(key = %block.key(), "block already queued for announcement");
                    }
                }
                None => break,
            },
        }
    }

    if !queue.is_empty() {
        debug!(pending = queue.len(), "dropping unannounced blocks on shutdown");
    }
}

async fn announce(
    id: usize,
    work: Arc<tokio::sync::Mutex<mpsc::Receiver<Block>>>,
    exchange: Option<Arc<dyn Exchange>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = async { work.lock().await.recv().await } => next,
        };
        let Some(block) = next else { return };

        let Some(exchange) = &exchange else { continue };
        if let Err(e) = exchange.has_block(&cancel, &block).await {
            warn!(worker = id, key = %block.key(), error = %e, "failed to announce block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExchangeError, ExchangeResult};
    use crate::exchange::BlockStream;
    use std::time::Duration;

    struct AnnounceRecorder {
        announced: mpsc::UnboundedSender<Key>,
    }

    #[async_trait]
    impl Exchange for AnnounceRecorder {
        async fn get_block(&self, _ctx: &CancellationToken, key: &Key) -> ExchangeResult<Block> {
            Err(ExchangeError::NotFound { key: key.clone() })
        }

        async fn get_blocks(
            &self,
            _ctx: &CancellationToken,
            _keys: Vec<Key>,
        ) -> ExchangeResult<BlockStream> {
            Ok(Box::pin(tokio_stream::empty()))
        }

        async fn has_block(&self, _ctx: &CancellationToken, block: &Block) -> ExchangeResult<()> {
            let _ = self.announced.send(block.key().clone());
            Ok(())
        }
    }

    fn recording_worker(config: &BlockServiceConfig) -> (Worker, mpsc::UnboundedReceiver<Key>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let exchange: Arc<dyn Exchange> = Arc::new(AnnounceRecorder { announced: tx });
        (Worker::new(Some(exchange), config).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_announces_added_blocks() {
        let (worker, mut announced) = recording_worker(&BlockServiceConfig::default());

        let a = Block::new(b"a".to_vec());
        let b = Block::new(b"b".to_vec());
        worker.block_added(&a).await.unwrap();
        worker.block_added(&b).await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..2 {
            let key = tokio::time::timeout(Duration::from_secs(5), announced.recv())
                .await
                .expect("announcement timed out")
                .expect("recorder dropped");
            seen.insert(key);
        }
        assert!(seen.contains(a.key()));
        assert!(seen.contains(b.key()));

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_added_after_shutdown_fails() {
        let (worker, _announced) = recording_worker(&BlockServiceConfig::default());
        worker.shutdown().await.unwrap();

        assert!(worker.is_closed());
        let err = worker
            .block_added(&Block::new(b"late".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_is_one_shot() {
        let (worker, _announced) = recording_worker(&BlockServiceConfig::default());
        worker.shutdown().await.unwrap();
        assert!(matches!(worker.shutdown().await, Err(WorkerError::Closed)));
    }

    #[tokio::test]
    async fn test_without_exchange_accepts_and_drops() {
        let config = BlockServiceConfig::default().with_num_workers(2);
        let worker = Worker::new(None, &config).unwrap();

        for i in 0..16u8 {
            worker.block_added(&Block::new(vec![i])).await.unwrap();
        }
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_workers_clamped() {
        let config = BlockServiceConfig::default().with_num_workers(0);
        let (worker, mut announced) = recording_worker(&config);

        let block = Block::new(b"solo".to_vec());
        worker.block_added(&block).await.unwrap();

        let key = tokio::time::timeout(Duration::from_secs(5), announced.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&key, block.key());
        worker.shutdown().await.unwrap();
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = Worker::new(None, &BlockServiceConfig::default());
        assert!(matches!(result, Err(WorkerError::Runtime { .. })));
    }
}
