//! Block service configuration.

use serde::{Deserialize, Serialize};

/// Block service configuration.
///
/// Channel sizes of `0` request the smallest possible handoff; Tokio channels
/// need at least one slot, so they are clamped to 1 (see
/// [`BlockServiceConfig::channel_capacity`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockServiceConfig {
    /// Number of tasks announcing new blocks to the exchange.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Capacity of the channel feeding the notifier.
    #[serde(default)]
    pub client_buffer_size: usize,

    /// Capacity of the channel between the notifier queue and its workers.
    #[serde(default)]
    pub worker_buffer_size: usize,

    /// Capacity of the handoff channel behind `get_blocks` streams.
    #[serde(default)]
    pub output_buffer_size: usize,
}

// More workers barely move throughput on multi-core hosts; fewer than ~25
// hurts badly on a single core.
fn default_num_workers() -> usize {
    25
}

impl Default for BlockServiceConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            client_buffer_size: 0,
            worker_buffer_size: 0,
            output_buffer_size: 0,
        }
    }
}

impl BlockServiceConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `BLOCKSERVICE_NUM_WORKERS` | Announcement worker count (default: 25) |
    /// | `BLOCKSERVICE_CLIENT_BUFFER` | Notifier input buffer (default: 0) |
    /// | `BLOCKSERVICE_WORKER_BUFFER` | Worker queue buffer (default: 0) |
    /// | `BLOCKSERVICE_OUTPUT_BUFFER` | `get_blocks` output buffer (default: 0) |
    ///
    /// Unset or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_workers: env_usize("BLOCKSERVICE_NUM_WORKERS").unwrap_or(defaults.num_workers),
            client_buffer_size: env_usize("BLOCKSERVICE_CLIENT_BUFFER")
                .unwrap_or(defaults.client_buffer_size),
            worker_buffer_size: env_usize("BLOCKSERVICE_WORKER_BUFFER")
                .unwrap_or(defaults.worker_buffer_size),
            output_buffer_size: env_usize("BLOCKSERVICE_OUTPUT_BUFFER")
                .unwrap_or(defaults.output_buffer_size),
        }
    }

    /// Set the number of announcement workers.
    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    /// Set the notifier input buffer.
    pub fn with_client_buffer_size(mut self, size: usize) -> Self {
        self.client_buffer_size = size;
        self
    }

    /// Set the worker queue buffer.
    pub fn with_worker_buffer_size(mut self, size: usize) -> Self {
        self.worker_buffer_size = size;
        self
    }

    /// Set the `get_blocks` output buffer.
    pub fn with_output_buffer_size(mut self, size: usize) -> Self {
        self.output_buffer_size = size;
        self
    }

    /// Usable channel capacity for a configured buffer size.
    pub fn channel_capacity(size: usize) -> usize {
        size.max(1)
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
