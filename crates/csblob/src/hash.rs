//! Digest algorithms used by code directories.
//!
//! [`HashType`] mirrors the `CS_HASHTYPE_*` byte stored in a CodeDirectory.
//! [`DynamicHash`] is the engine selected for a hash type: it consumes one
//! [`Reader`] in page-sized chunks and yields the digest, truncated where
//! the hash type calls for it.

use crate::codesign::constants::*;
use crate::reader::Reader;
use crate::{Error, Result};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384};
use std::io;

/// Hash algorithm of a CodeDirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    /// SHA-1, 20 bytes.
    Sha1,
    /// SHA-256, 32 bytes.
    Sha256,
    /// SHA-256 truncated to 20 bytes.
    Sha256Truncated,
    /// SHA-384, 48 bytes.
    Sha384,
    /// SHA-512, 64 bytes. Has a digest length but no engine.
    Sha512,
}

impl HashType {
    /// Parse the `hashType` byte of a CodeDirectory.
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            CS_HASHTYPE_SHA1 => Ok(HashType::Sha1),
            CS_HASHTYPE_SHA256 => Ok(HashType::Sha256),
            CS_HASHTYPE_SHA256_TRUNCATED => Ok(HashType::Sha256Truncated),
            CS_HASHTYPE_SHA384 => Ok(HashType::Sha384),
            CS_HASHTYPE_SHA512 => Ok(HashType::Sha512),
            other => Err(Error::UnsupportedHashType(other)),
        }
    }

    /// The `hashType` byte written into a CodeDirectory.
    pub fn raw(self) -> u8 {
        match self {
            HashType::Sha1 => CS_HASHTYPE_SHA1,
            HashType::Sha256 => CS_HASHTYPE_SHA256,
            HashType::Sha256Truncated => CS_HASHTYPE_SHA256_TRUNCATED,
            HashType::Sha384 => CS_HASHTYPE_SHA384,
            HashType::Sha512 => CS_HASHTYPE_SHA512,
        }
    }

    /// Digest length in bytes, as stored in the `hashSize` field.
    pub fn digest_length(self) -> usize {
        match self {
            HashType::Sha1 | HashType::Sha256Truncated => CS_SHA1_LEN,
            HashType::Sha256 => CS_SHA256_LEN,
            HashType::Sha384 => CS_SHA384_LEN,
            HashType::Sha512 => CS_SHA512_LEN,
        }
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
        }
    }
}

/// Hash engine for one digest computation.
///
/// Feed exactly one source with [`DynamicHash::update`], then call
/// [`DynamicHash::finish`]. Calling either out of order fails with
/// [`Error::HashState`].
pub struct DynamicHash {
    hasher: Hasher,
    truncate: usize,
    updated: bool,
}

impl std::fmt::Debug for DynamicHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicHash")
            .field("digest_length", &self.digest_length())
            .field("updated", &self.updated)
            .finish()
    }
}

impl DynamicHash {
    /// Engine for `hash_type`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedHashType`] for SHA-512, which has a slot size but
    /// no engine.
    pub fn new(hash_type: HashType) -> Result<Self> {
        let hasher = match hash_type {
            HashType::Sha1 => Hasher::Sha1(Sha1::new()),
            HashType::Sha256 | HashType::Sha256Truncated => Hasher::Sha256(Sha256::new()),
            HashType::Sha384 => Hasher::Sha384(Sha384::new()),
            HashType::Sha512 => return Err(Error::UnsupportedHashType(hash_type.raw())),
        };
        Ok(Self {
            hasher,
            truncate: hash_type.digest_length(),
            updated: false,
        })
    }

    /// Length of the digest [`DynamicHash::finish`] returns.
    pub fn digest_length(&self) -> usize {
        self.truncate
    }

    /// Consume the whole source, in page-sized reads.
    pub fn update<R: Reader + ?Sized>(&mut self, source: &R) -> Result<()> {
        if self.updated {
            return Err(Error::HashState("update called twice"));
        }
        self.updated = true;

        let size = source.size();
        let mut offset = 0u64;
        while offset < size {
            let end = (offset + PAGE_SIZE as u64).min(size);
            let chunk = source.read_range(offset, end)?;
            let expected = (end - offset) as usize;
            if chunk.len() != expected {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read {} of {} bytes at {}", chunk.len(), expected, offset),
                )));
            }
            self.hasher.update(&chunk);
            offset = end;
        }
        Ok(())
    }

    /// Produce the digest.
    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.updated {
            return Err(Error::HashState("finish called before update"));
        }
        let mut digest = self.hasher.finalize();
        digest.truncate(self.truncate);
        Ok(digest)
    }
}

/// Digest of an in-memory byte string.
pub fn digest(hash_type: HashType, data: &[u8]) -> Result<Vec<u8>> {
    let mut hash = DynamicHash::new(hash_type)?;
    hash.update(data)?;
    hash.finish()
}
