//! Hybrid block service for content-addressed storage.
//!
//! A [`BlockService`] gives callers one interface over:
//!
//! - a local [`Blockstore`] that is always consulted first
//! - an optional network [`Exchange`] used when a block is not held locally
//! - a background [`Notifier`] that announces newly added blocks
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blockservice::{Block, BlockService, MemoryBlockstore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = BlockService::new(Arc::new(MemoryBlockstore::new()), None)?;
//!
//! let key = service.add_block(&Block::new(b"hello".to_vec())).await?;
//! let block = service.get_block(&CancellationToken::new(), &key).await?;
//! assert_eq!(block.data(), b"hello");
//!
//! service.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `BLOCKSERVICE_NUM_WORKERS` | Announcement worker tasks (default: 25) |
//! | `BLOCKSERVICE_CLIENT_BUFFER` | Notifier input buffer (default: 0) |
//! | `BLOCKSERVICE_WORKER_BUFFER` | Worker queue buffer (default: 0) |
//! | `BLOCKSERVICE_OUTPUT_BUFFER` | `get_blocks` output buffer (default: 0) |

pub mod block;
pub mod blockstore;
pub mod config;
pub mod error;
pub mod exchange;
pub mod service;
pub mod worker;

// Re-export main types
pub use block::{Block, Key, KeyParseError};
pub use blockstore::{Blockstore, FsBlockstore, MemoryBlockstore};
pub use config::BlockServiceConfig;
pub use error::{
    BlockServiceError, BlockServiceResult, BlockstoreError, BlockstoreResult, ExchangeError,
    ExchangeResult, WorkerError,
};
pub use exchange::{BlockStream, Exchange, OfflineExchange};
pub use service::{BlockService, BlockServiceBuilder};
pub use worker::{Notifier, Worker};
