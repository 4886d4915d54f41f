//! Hybrid block service.
//!
//! Reads go to the local blockstore first and fall back to the exchange:
//! 1. Local blockstore (synchronous; bulk scans run on the blocking pool)
//! 2. Exchange (remote fetch, bounded by the caller's cancellation token)
//!
//! Writes go to the local blockstore and are then announced through the
//! notifier.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::block::{Block, Key};
use crate::blockstore::Blockstore;
use crate::config::BlockServiceConfig;
use crate::error::{BlockServiceError, BlockServiceResult};
use crate::exchange::{BlockStream, Exchange};
use crate::worker::{Notifier, Worker};

/// Builder for [`BlockService`].
#[derive(Default)]
pub struct BlockServiceBuilder {
    blockstore: Option<Arc<dyn Blockstore>>,
    exchange: Option<Arc<dyn Exchange>>,
    notifier: Option<Box<dyn Notifier>>,
    config: BlockServiceConfig,
}

impl BlockServiceBuilder {
    /// Local blockstore. Required.
    pub fn blockstore(mut self, blockstore: Arc<dyn Blockstore>) -> Self {
        self.blockstore = Some(blockstore);
        self
    }

    /// Exchange used for remote fallback. Optional.
    pub fn exchange(mut self, exchange: Arc<dyn Exchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Replace the default [`Worker`] notifier.
    pub fn notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set channel sizes and worker count.
    pub fn config(mut self, config: BlockServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the service. Must be called from within a Tokio runtime.
    pub fn build(self) -> BlockServiceResult<BlockService> {
        let blockstore = self.blockstore.ok_or_else(|| BlockServiceError::Config {
            message: "BlockService requires valid blockstore".to_string(),
        })?;

        let runtime = Handle::try_current().map_err(|e| BlockServiceError::Config {
            message: format!("BlockService requires a tokio runtime: {}", e),
        })?;

        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => Box::new(Worker::new(self.exchange.clone(), &self.config)?),
        };

        debug!(
            exchange = self.exchange.is_some(),
            num_workers = self.config.num_workers,
            "created block service"
        );

        Ok(BlockService {
            blockstore,
            exchange: self.exchange,
            notifier,
            runtime,
            config: self.config,
        })
    }
}

/// Block service combining a local blockstore with an optional exchange.
pub struct BlockService {
    blockstore: Arc<dyn Blockstore>,
    exchange: Option<Arc<dyn Exchange>>,
    notifier: Box<dyn Notifier>,
    runtime: Handle,
    config: BlockServiceConfig,
}

impl BlockService {
    /// Start building a service with custom collaborators.
    pub fn builder() -> BlockServiceBuilder {
        BlockServiceBuilder::default()
    }

    /// Create a service with the default notifier and configuration.
    pub fn new(
        blockstore: Arc<dyn Blockstore>,
        exchange: Option<Arc<dyn Exchange>>,
    ) -> BlockServiceResult<Self> {
        let builder = Self::builder().blockstore(blockstore);
        match exchange {
            Some(exchange) => builder.exchange(exchange).build(),
            None => builder.build(),
        }
    }

    /// Store a block locally and announce it.
    ///
    /// A blockstore failure is returned as [`BlockServiceError::Blockstore`]
    /// and nothing is announced. If the notifier is closed the block is
    /// already stored and [`BlockServiceError::Closed`] is returned.
    pub async fn add_block(&self, block: &Block) -> BlockServiceResult<Key> {
        let key = block.key().clone();

        self.blockstore
            .put(block)
            .map_err(|source| BlockServiceError::Blockstore {
                key: key.clone(),
                source,
            })?;

        if let Err(e) = self.notifier.block_added(block).await {
            warn!(key = %key, error = %e, "block stored but notifier rejected it");
            return Err(BlockServiceError::Closed { key });
        }

        debug!(key = %key, size = block.len(), "added block");
        Ok(key)
    }

    /// Get a block, locally if possible, otherwise from the exchange.
    ///
    /// Any local failure other than "not found" is reported as
    /// [`BlockServiceError::NotFound`]. Exchange errors are returned as-is.
    pub async fn get_block(&self, ctx: &CancellationToken, key: &Key) -> BlockServiceResult<Block> {
        match self.blockstore.get(key) {
            Ok(block) => {
                debug!(key = %key, "local hit");
                Ok(block)
            }
            Err(e) if e.is_not_found() => match &self.exchange {
                Some(exchange) => {
                    debug!(key = %key, "local miss, fetching from exchange");
                    Ok(exchange.get_block(ctx, key).await?)
                }
                None => Err(BlockServiceError::NotFound { key: key.clone() }),
            },
            Err(e) => {
                warn!(key = %key, error = %e, "blockstore read failed, reporting not found");
                Err(BlockServiceError::NotFound { key: key.clone() })
            }
        }
    }

    /// Get many blocks as a stream.
    ///
    /// Local hits are emitted first as they are found; the remaining keys are
    /// requested from the exchange in a single batch. No ordering, and keys
    /// that cannot be found are silently omitted. The stream ends early when
    /// `ctx` is cancelled or the exchange fails; a block already buffered when
    /// `ctx` is cancelled is not yielded.
    pub fn get_blocks(
        &self,
        ctx: &CancellationToken,
        keys: impl IntoIterator<Item = Key>,
    ) -> BlockStream {
        let (out, rx) = mpsc::channel(BlockServiceConfig::channel_capacity(
            self.config.output_buffer_size,
        ));

        let mut seen = HashSet::new();
        let keys: Vec<Key> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        self.runtime.spawn(produce_blocks(
            self.blockstore.clone(),
            self.exchange.clone(),
            ctx.clone(),
            keys,
            out,
        ));

        let ctx = ctx.clone();
        Box::pin(ReceiverStream::new(rx).take_while(move |_| !ctx.is_cancelled()))
    }

    /// Delete a block from the local blockstore.
    pub fn delete_block(&self, key: &Key) -> BlockServiceResult<()> {
        self.blockstore
            .delete(key)
            .map_err(|source| BlockServiceError::Blockstore {
                key: key.clone(),
                source,
            })
    }

    /// Shut down the notifier. Subsequent [`add_block`](Self::add_block)
    /// calls fail with [`BlockServiceError::Closed`]; reads and deletes keep
    /// working.
    pub async fn close(&self) -> BlockServiceResult<()> {
        self.notifier.shutdown().await?;
        info!("block service closed");
        Ok(())
    }

    /// The local blockstore.
    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }

    /// The exchange, if one was configured.
    pub fn exchange(&self) -> Option<&Arc<dyn Exchange>> {
        self.exchange.as_ref()
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &BlockServiceConfig {
        &self.config
    }
}

/// Send one block unless the caller has gone away.
async fn deliver(ctx: &CancellationToken, out: &mpsc::Sender<Block>, block: Block) -> bool {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => false,
        sent = out.send(block) => sent.is_ok(),
    }
}

/// Read `keys` from the local blockstore, pushing hits into `hits` and
/// returning the misses. Stops early once `ctx` is cancelled or the
/// receiving side is gone.
fn scan_local(
    blockstore: &dyn Blockstore,
    ctx: &CancellationToken,
    keys: Vec<Key>,
    hits: &mpsc::UnboundedSender<Block>,
) -> Vec<Key> {
    let mut misses = Vec::new();

    for key in keys {
        if ctx.is_cancelled() {
            break;
        }
        match blockstore.get(&key) {
            Ok(block) => {
                if hits.send(block).is_err() {
                    break;
                }
            }
            Err(e) => {
                if !e.is_not_found() {
                    warn!(key = %key, error = %e, "blockstore read failed, treating as miss");
                }
                misses.push(key);
            }
        }
    }

    misses
}

async fn produce_blocks(
    blockstore: Arc<dyn Blockstore>,
    exchange: Option<Arc<dyn Exchange>>,
    ctx: CancellationToken,
    keys: Vec<Key>,
    out: mpsc::Sender<Block>,
) {
    let requested = keys.len();

    // Blockstore reads may hit the filesystem, so the scan runs off the
    // async workers and streams hits back as it finds them.
    let (hits_tx, mut hits) = mpsc::unbounded_channel();
    let scan = {
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || scan_local(blockstore.as_ref(), &ctx, keys, &hits_tx))
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            next = hits.recv() => next,
        };
        let Some(block) = next else { break };
        if !deliver(&ctx, &out, block).await {
            return;
        }
    }

    let misses = match scan.await {
        Ok(misses) => misses,
        Err(e) => {
            warn!(error = %e, "local blockstore scan failed");
            return;
        }
    };

    debug!(requested, misses = misses.len(), "local pass complete");

    if misses.is_empty() {
        return;
    }
    let Some(exchange) = exchange else {
        debug!(misses = misses.len(), "no exchange configured, skipping remote fetch");
        return;
    };

    let wanted: HashSet<Key> = misses.iter().cloned().collect();
    let remote = tokio::select! {
        biased;
        _ = ctx.cancelled() => return,
        remote = exchange.get_blocks(&ctx, misses) => remote,
    };
    let mut remote = match remote {
        Ok(stream) => stream,
        Err(e) => {
            // Optimistic call: missing blocks are simply not returned.
            warn!(error = %e, "exchange bulk fetch failed");
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            next = remote.next() => next,
        };
        let Some(block) = next else { break };

        if !wanted.contains(block.key()) {
            debug!(key = %block.key(), "dropping unrequested block from exchange");
            continue;
        }
        if !deliver(&ctx, &out, block).await {
            return;
        }
    }
}
