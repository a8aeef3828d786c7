//! Content hashing
//!
//! Digests identify a file's exact byte content and are stored in metadata as
//! `"<algorithm>:<hex>"`, for example `sha256:2cf24dba...`. They are only ever
//! compared for equality; nothing here is used for authentication.
//!
//! ```rust
//! use driftguard::hasher::{hash_bytes, ContentHash};
//!
//! let a = hash_bytes(b"hello");
//! let b: ContentHash = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
//!     .parse()
//!     .unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.algorithm(), "sha256");
//! ```

use crate::error::{DriftguardError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Algorithm tag written in front of every digest
pub const HASH_ALGORITHM: &str = "sha256";

/// A content digest in `"<algorithm>:<hex>"` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Algorithm part of the digest
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(algo, _)| algo).unwrap_or_default()
    }

    /// Hex part of the digest
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, hex)| hex).unwrap_or_default()
    }

    /// Short form for logs
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..8.min(hex.len())]
    }

    /// Full `"<algorithm>:<hex>"` string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DriftguardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((algo, hex))
                if !algo.is_empty()
                    && !hex.is_empty()
                    && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(ContentHash(format!("{}:{}", algo, hex.to_ascii_lowercase())))
            }
            _ => Err(DriftguardError::internal(format!("Malformed content hash: {:?}", s))),
        }
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DriftguardError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Hash in-memory content
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(format!("{}:{}", HASH_ALGORITHM, hex::encode(hasher.finalize())))
}

/// Hash a file's content using buffered reads
///
/// # Errors
///
/// Any read failure is returned; an unreadable file never yields a digest.
/// Permission failures surface as [`DriftguardError::InsufficientPermissions`].
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = File::open(path).map_err(|e| DriftguardError::from_io(e, path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| DriftguardError::from_io(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(ContentHash(format!("{}:{}", HASH_ALGORITHM, hex::encode(hasher.finalize()))))
}
