//! Remote block retrieval.
//!
//! An [`Exchange`] fetches blocks from peers. Every call that may suspend
//! takes a [`CancellationToken`] scoped to that call; implementations must
//! return promptly once it is cancelled.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::block::{Block, Key};
use crate::blockstore::Blockstore;
use crate::error::{ExchangeError, ExchangeResult};

/// Lazily produced sequence of blocks, in no particular order.
pub type BlockStream = Pin<Box<dyn Stream<Item = Block> + Send + 'static>>;

/// Network block exchange.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Fetch a single block from the network.
    async fn get_block(&self, ctx: &CancellationToken, key: &Key) -> ExchangeResult<Block>;

    /// Fetch many blocks.
    ///
    /// Blocks that cannot be found are omitted. The stream ends on internal
    /// failure or once `ctx` is cancelled; it never yields per-key errors.
    async fn get_blocks(&self, ctx: &CancellationToken, keys: Vec<Key>)
        -> ExchangeResult<BlockStream>;

    /// Announce that a block is now available locally.
    async fn has_block(&self, ctx: &CancellationToken, block: &Block) -> ExchangeResult<()>;
}

/// Exchange that never talks to the network.
///
/// Serves lookups from a local blockstore only. Useful for offline mode and
/// tests.
pub struct OfflineExchange {
    store: Arc<dyn Blockstore>,
}

impl OfflineExchange {
    pub fn new(store: Arc<dyn Blockstore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Exchange for OfflineExchange {
    async fn get_block(&self, ctx: &CancellationToken, key: &Key) -> ExchangeResult<Block> {
        if ctx.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }

        self.store
            .get(key)
            .map_err(|_| ExchangeError::NotFound { key: key.clone() })
    }

    async fn get_blocks(
        &self,
        ctx: &CancellationToken,
        keys: Vec<Key>,
    ) -> ExchangeResult<BlockStream> {
        if ctx.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }

        let found: Vec<Block> = keys
            .iter()
            .filter_map(|key| self.store.get(key).ok())
            .collect();
        debug!(requested = keys.len(), found = found.len(), "offline exchange lookup");

        Ok(Box::pin(tokio_stream::iter(found)))
    }

    async fn has_block(&self, _ctx: &CancellationToken, _block: &Block) -> ExchangeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::MemoryBlockstore;
    use tokio_stream::StreamExt;

    fn offline_with(blocks: &[Block]) -> OfflineExchange {
        let store = MemoryBlockstore::new();
        for block in blocks {
            store.put(block).unwrap();
        }
        OfflineExchange::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_offline_get_block() {
        let a = Block::new(b"a".to_vec());
        let exchange = offline_with(&[a.clone()]);
        let ctx = CancellationToken::new();

        assert_eq!(exchange.get_block(&ctx, a.key()).await.unwrap(), a);

        let missing = Key::for_data(b"missing");
        let err = exchange.get_block(&ctx, &missing).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound { key } if key == missing));
    }

    #[tokio::test]
    async fn test_offline_get_blocks_omits_missing() {
        let a = Block::new(b"a".to_vec());
        let b = Block::new(b"b".to_vec());
        let exchange = offline_with(&[a.clone(), b.clone()]);
        let ctx = CancellationToken::new();

        let stream = exchange
            .get_blocks(&ctx, vec![a.key().clone(), Key::for_data(b"x")])
            .await
            .unwrap();
        let got: Vec<Block> = stream.collect().await;
        assert_eq!(got, vec![a]);
    }

    #[tokio::test]
    async fn test_offline_respects_cancelled_context() {
        let a = Block::new(b"a".to_vec());
        let exchange = offline_with(&[a.clone()]);
        let ctx = CancellationToken::new();
        ctx.cancel();

        assert!(matches!(
            exchange.get_block(&ctx, a.key()).await,
            Err(ExchangeError::Cancelled)
        ));
        assert!(exchange.get_blocks(&ctx, vec![a.key().clone()]).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_has_block_is_noop() {
        let exchange = offline_with(&[]);
        let block = Block::new(b"announce".to_vec());
        exchange
            .has_block(&CancellationToken::new(), &block)
            .await
            .unwrap();
    }
}
