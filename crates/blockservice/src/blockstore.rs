//! Local block storage.
//!
//! The service reads through a [`Blockstore`] synchronously and only falls
//! back to the exchange when the store reports [`BlockstoreError::NotFound`].
//!
//! # Filesystem Layout
//!
//! ```text
//! {root}/{first two hex chars}/{full hex digest}
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::block::{Block, Key};
use crate::error::{BlockstoreError, BlockstoreResult};

/// Synchronous content-addressed block storage.
pub trait Blockstore: Send + Sync {
    /// Store a block. Overwrites an existing entry for the same key.
    fn put(&self, block: &Block) -> BlockstoreResult<()>;

    /// Load a block, or [`BlockstoreError::NotFound`].
    fn get(&self, key: &Key) -> BlockstoreResult<Block>;

    /// Whether a block is stored under `key`.
    fn has(&self, key: &Key) -> BlockstoreResult<bool>;

    /// Remove a block, or [`BlockstoreError::NotFound`] if absent.
    fn delete(&self, key: &Key) -> BlockstoreResult<()>;

    /// All stored keys, in no particular order.
    fn keys(&self) -> BlockstoreResult<Vec<Key>>;
}

/// In-memory blockstore.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Key, Block>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.blocks.read() {
            Ok(blocks) => blocks.len(),
            Err(guard) => guard.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> BlockstoreError {
    BlockstoreError::Io {
        message: "blockstore lock poisoned".to_string(),
    }
}

impl Blockstore for MemoryBlockstore {
    fn put(&self, block: &Block) -> BlockstoreResult<()> {
        self.blocks
            .write()
            .map_err(poisoned)?
            .insert(block.key().clone(), block.clone());
        Ok(())
    }

    fn get(&self, key: &Key) -> BlockstoreResult<Block> {
        self.blocks
            .read()
            .map_err(poisoned)?
            .get(key)
            .cloned()
            .ok_or_else(|| BlockstoreError::NotFound { key: key.clone() })
    }

    fn has(&self, key: &Key) -> BlockstoreResult<bool> {
        Ok(self.blocks.read().map_err(poisoned)?.contains_key(key))
    }

    fn delete(&self, key: &Key) -> BlockstoreResult<()> {
        self.blocks
            .write()
            .map_err(poisoned)?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlockstoreError::NotFound { key: key.clone() })
    }

    fn keys(&self) -> BlockstoreResult<Vec<Key>> {
        Ok(self.blocks.read().map_err(poisoned)?.keys().cloned().collect())
    }
}

/// Blockstore keeping one file per block on local disk.
#[derive(Debug)]
pub struct FsBlockstore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsBlockstore {
    /// Open a store at the default location.
    ///
    /// Default: `{data_dir}/blockservice/blocks`
    pub fn new() -> BlockstoreResult<Self> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| BlockstoreError::Io {
                message: "could not determine data directory".to_string(),
            })?;

        Self::with_dir(base.join("blockservice").join("blocks"))
    }

    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn with_dir(root: impl Into<PathBuf>) -> BlockstoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BlockstoreError::Io {
            message: format!("failed to create blockstore dir {}: {}", root.display(), e),
        })?;

        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, key: &Key) -> PathBuf {
        let hex = key.digest_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> BlockstoreResult<()> {
        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), seq));

        fs::write(&temp_path, data).map_err(|e| BlockstoreError::Io {
            message: format!("failed to write temp file: {}", e),
        })?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            BlockstoreError::Io {
                message: format!("failed to rename temp file: {}", e),
            }
        })
    }
}

impl Blockstore for FsBlockstore {
    fn put(&self, block: &Block) -> BlockstoreResult<()> {
        let path = self.block_path(block.key());
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard).map_err(|e| BlockstoreError::Io {
                message: format!("failed to create shard dir: {}", e),
            })?;
        }

        self.write_atomic(&path, block.data())?;
        debug!(key = %block.key(), size = block.len(), "stored block on disk");
        Ok(())
    }

    fn get(&self, key: &Key) -> BlockstoreResult<Block> {
        match fs::read(self.block_path(key)) {
            Ok(data) => Ok(Block::with_key(data, key.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlockstoreError::NotFound { key: key.clone() })
            }
            Err(e) => Err(BlockstoreError::Io {
                message: format!("failed to read block {}: {}", key, e),
            }),
        }
    }

    fn has(&self, key: &Key) -> BlockstoreResult<bool> {
        Ok(self.block_path(key).is_file())
    }

    fn delete(&self, key: &Key) -> BlockstoreResult<()> {
        match fs::remove_file(self.block_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlockstoreError::NotFound { key: key.clone() })
            }
            Err(e) => Err(BlockstoreError::Io {
                message: format!("failed to delete block {}: {}", key, e),
            }),
        }
    }

    fn keys(&self) -> BlockstoreResult<Vec<Key>> {
        let io_err = |e: std::io::Error| BlockstoreError::Io {
            message: format!("failed to list blockstore: {}", e),
        };

        let mut keys = Vec::new();
        for shard in fs::read_dir(&self.root).map_err(io_err)? {
            let shard = shard.map_err(io_err)?;
            if !shard.file_type().map_err(io_err)?.is_dir() {
                continue;
            }

            for entry in fs::read_dir(shard.path()).map_err(io_err)? {
                let entry = entry.map_err(io_err)?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };

                match format!("sha256:{}", name).parse::<Key>() {
                    Ok(key) => keys.push(key),
                    // In-flight temp files and foreign entries
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping blockstore entry"),
                }
            }
        }

        Ok(keys)
    }
}
