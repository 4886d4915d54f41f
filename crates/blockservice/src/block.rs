//! Content-addressed blocks and their keys.
//!
//! A [`Key`] is the canonical `sha256:<hex>` digest of a block's bytes. The
//! service never inspects keys beyond equality, ordering and hashing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "sha256:";
const DIGEST_HEX_LEN: usize = 64;

/// Error returned when parsing a malformed key string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block key {input:?}: {reason}")]
pub struct KeyParseError {
    pub input: String,
    pub reason: &'static str,
}

/// Content-derived identifier of a [`Block`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Derive the key for a byte payload.
    pub fn for_data(data: &[u8]) -> Self {
        Self(format!("{}{}", KEY_PREFIX, sha256_hex(data)))
    }

    /// Canonical string form (`sha256:<hex>`).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digest without the algorithm prefix.
    pub fn digest_hex(&self) -> &str {
        &self.0[KEY_PREFIX.len()..]
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| KeyParseError {
            input: s.to_string(),
            reason,
        };

        let hex_part = s
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| invalid("missing sha256: prefix"))?;

        if hex_part.len() != DIGEST_HEX_LEN {
            return Err(invalid("digest must be 64 hex characters"));
        }
        if !hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid("digest must be lowercase hex"));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Key {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

/// Immutable block payload together with its key.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    key: Key,
    data: Arc<[u8]>,
}

impl Block {
    /// Create a block, deriving its key from the data.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            key: Key::for_data(&data),
            data: data.into(),
        }
    }

    /// Create a block with a caller-supplied key.
    ///
    /// The key is trusted as-is; no digest is recomputed.
    pub fn with_key(data: impl Into<Vec<u8>>, key: Key) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            key,
            data: data.into(),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("len", &self.data.len())
            .finish()
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
