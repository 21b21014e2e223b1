//! CodeDirectory blob reader
//!
//! The CodeDirectory is the core data structure of a code signature. It
//! records hashes of the executable's pages and of auxiliary data (special
//! slots), plus the identifier, team ID and exec-segment metadata.
//!
//! The header grew append-only over time. A field exists only once the
//! directory's `version` reaches its threshold:
//!
//! | Field(s)                          | Threshold |
//! |-----------------------------------|-----------|
//! | base header (44 bytes)            | 0x20001   |
//! | scatterOffset                     | 0x20100   |
//! | teamIDOffset                      | 0x20200   |
//! | spare3, codeLimit64               | 0x20300   |
//! | execSegBase/Limit/Flags           | 0x20400   |
//! | runtime, preEncryptOffset         | 0x20500   |
//!
//! Special slots sit below `hashOffset` and are addressed by negative index;
//! code slots sit above it.

use super::blob::{Blob, TypedBlob};
use super::constants::*;
use crate::hash::{self, DynamicHash, HashType};
use crate::{Error, Result};
use std::ffi::CStr;

/// Byte offsets of the header fields.
pub(crate) mod field {
    pub const VERSION: usize = 8;
    pub const FLAGS: usize = 12;
    pub const HASH_OFFSET: usize = 16;
    pub const IDENT_OFFSET: usize = 20;
    pub const N_SPECIAL_SLOTS: usize = 24;
    pub const N_CODE_SLOTS: usize = 28;
    pub const CODE_LIMIT: usize = 32;
    pub const HASH_SIZE: usize = 36;
    pub const HASH_TYPE: usize = 37;
    pub const PLATFORM: usize = 38;
    pub const PAGE_SIZE: usize = 39;
    pub const SCATTER_OFFSET: usize = 44;
    pub const TEAM_ID_OFFSET: usize = 48;
    pub const CODE_LIMIT64: usize = 56;
    pub const EXEC_SEG_BASE: usize = 64;
    pub const EXEC_SEG_LIMIT: usize = 72;
    pub const EXEC_SEG_FLAGS: usize = 80;
    pub const RUNTIME: usize = 88;
    pub const PRE_ENCRYPT_OFFSET: usize = 92;
}

/// Header size of a CodeDirectory at `version`.
///
/// Starts from the full 96-byte header and drops each field group the
/// version predates.
pub const fn fixed_size(version: u32) -> usize {
    let mut size = CODEDIRECTORY_HEADER_SIZE;
    if version < CODEDIRECTORY_VERSION_PREENCRYPT {
        size -= 8;
    }
    if version < CODEDIRECTORY_VERSION_EXECSEG {
        size -= 24;
    }
    if version < CODEDIRECTORY_VERSION_CODELIMIT64 {
        size -= 12;
    }
    if version < CODEDIRECTORY_VERSION_TEAMID {
        size -= 4;
    }
    if version < CODEDIRECTORY_VERSION_SCATTER {
        size -= 4;
    }
    size
}

/// One scatter vector entry: a run of pages mapped to a target offset.
///
/// Vectors end with an all-zero sentinel entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scatter {
    /// Number of pages; zero marks the sentinel.
    pub count: u32,
    /// First page number.
    pub base: u32,
    /// Offset in the target address space.
    pub target_offset: u64,
    /// Reserved, zero.
    pub spare: u64,
}

impl Scatter {
    /// Serialized size.
    pub const SIZE: usize = 24;

    /// Parse one entry.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            count: super::blob::be_u32(bytes, 0),
            base: super::blob::be_u32(bytes, 4),
            target_offset: super::blob::be_u64(bytes, 8),
            spare: super::blob::be_u64(bytes, 16),
        })
    }

    /// Serialized entry.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.count.to_be_bytes());
        out[4..8].copy_from_slice(&self.base.to_be_bytes());
        out[8..16].copy_from_slice(&self.target_offset.to_be_bytes());
        out[16..24].copy_from_slice(&self.spare.to_be_bytes());
        out
    }
}

/// Engine for a raw `hashType` byte.
pub fn hash_for(hash_type: u8) -> Result<DynamicHash> {
    DynamicHash::new(HashType::from_raw(hash_type)?)
}

/// A CodeDirectory blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDirectory<'a> {
    blob: Blob<'a>,
}

impl<'a> TypedBlob<'a> for CodeDirectory<'a> {
    const TYPE_MAGIC: u32 = CSMAGIC_CODEDIRECTORY;
    const MIN_SIZE: usize = fixed_size(CODEDIRECTORY_VERSION_EARLIEST);

    fn wrap(blob: Blob<'a>) -> Self {
        Self { blob }
    }

    fn blob(&self) -> &Blob<'a> {
        &self.blob
    }

    fn into_blob(self) -> Blob<'a> {
        self.blob
    }

    fn check_body(blob: &Blob<'a>) -> Result<()> {
        let length = u64::from(blob.length());
        let version = blob.u32_at(field::VERSION);
        let fixed = fixed_size(version) as u64;
        if length < fixed {
            return Err(Error::InvalidMinSize(format!(
                "{length} bytes, version {version:#x} header needs {fixed}"
            )));
        }

        let hash_size = u64::from(blob.u8_at(field::HASH_SIZE));
        let hash_offset = u64::from(blob.u32_at(field::HASH_OFFSET));
        let special = u64::from(blob.u32_at(field::N_SPECIAL_SLOTS)) * hash_size;
        let code = u64::from(blob.u32_at(field::N_CODE_SLOTS)) * hash_size;
        if hash_offset < special || hash_offset + code > length {
            return Err(Error::InvalidMinSize(format!(
                "hash slots at {hash_offset} overrun {length} bytes"
            )));
        }
        if u64::from(blob.u32_at(field::IDENT_OFFSET)) >= length {
            return Err(Error::InvalidMinSize(format!(
                "identifier offset outside {length} bytes"
            )));
        }
        Ok(())
    }
}

impl<'a> CodeDirectory<'a> {
    /// Format version.
    pub fn version(&self) -> u32 {
        self.blob.u32_at(field::VERSION)
    }

    /// `CS_*` flags.
    pub fn flags(&self) -> u32 {
        self.blob.u32_at(field::FLAGS)
    }

    /// Offset of code slot zero.
    pub fn hash_offset(&self) -> u32 {
        self.blob.u32_at(field::HASH_OFFSET)
    }

    /// Offset of the identifier string.
    pub fn ident_offset(&self) -> u32 {
        self.blob.u32_at(field::IDENT_OFFSET)
    }

    /// Number of special slots.
    pub fn n_special_slots(&self) -> u32 {
        self.blob.u32_at(field::N_SPECIAL_SLOTS)
    }

    /// Number of code slots.
    pub fn n_code_slots(&self) -> u32 {
        self.blob.u32_at(field::N_CODE_SLOTS)
    }

    /// 32-bit code limit; `0xffffffff` when `codeLimit64` holds the value.
    pub fn code_limit(&self) -> u32 {
        self.blob.u32_at(field::CODE_LIMIT)
    }

    /// Digest length of every slot.
    pub fn hash_size(&self) -> u8 {
        self.blob.u8_at(field::HASH_SIZE)
    }

    /// Raw `CS_HASHTYPE_*` byte.
    pub fn hash_type_raw(&self) -> u8 {
        self.blob.u8_at(field::HASH_TYPE)
    }

    /// Parsed hash type.
    pub fn hash_type(&self) -> Result<HashType> {
        HashType::from_raw(self.hash_type_raw())
    }

    /// Platform identifier.
    pub fn platform(&self) -> u8 {
        self.blob.u8_at(field::PLATFORM)
    }

    /// log2 of the page size, zero for a single unbounded page.
    pub fn page_size_log2(&self) -> u8 {
        self.blob.u8_at(field::PAGE_SIZE)
    }

    /// Page size in bytes, zero for a single unbounded page.
    pub fn page_size(&self) -> u64 {
        match self.page_size_log2() {
            0 => 0,
            shift if shift < 64 => 1u64 << shift,
            _ => 0,
        }
    }

    fn supports(&self, threshold: u32) -> bool {
        self.version() >= threshold
    }

    /// Identifier string.
    pub fn identifier(&self) -> Option<&CStr> {
        self.blob.string_at(self.ident_offset() as usize)
    }

    /// Team identifier, if the version has the field and it is set.
    pub fn team_id(&self) -> Option<&CStr> {
        if !self.supports(CODEDIRECTORY_VERSION_TEAMID) {
            return None;
        }
        match self.blob.u32_at(field::TEAM_ID_OFFSET) {
            0 => None,
            offset => self.blob.string_at(offset as usize),
        }
    }

    /// Scatter entries before the sentinel, if a vector is present.
    pub fn scatter_vector(&self) -> Option<Vec<Scatter>> {
        if !self.supports(CODEDIRECTORY_VERSION_SCATTER) {
            return None;
        }
        let offset = self.blob.u32_at(field::SCATTER_OFFSET) as usize;
        if offset == 0 {
            return None;
        }
        let bytes = self.blob.as_bytes().get(offset..)?;
        Some(
            bytes
                .chunks_exact(Scatter::SIZE)
                .filter_map(Scatter::parse)
                .take_while(|s| s.count != 0)
                .collect(),
        )
    }

    /// 64-bit code limit, zero before version 0x20300.
    pub fn code_limit64(&self) -> u64 {
        if !self.supports(CODEDIRECTORY_VERSION_CODELIMIT64) {
            return 0;
        }
        self.blob.u64_at(field::CODE_LIMIT64)
    }

    /// Number of signed bytes.
    pub fn signing_limit(&self) -> u64 {
        if self.supports(CODEDIRECTORY_VERSION_CODELIMIT64) {
            let limit = self.blob.u64_at(field::CODE_LIMIT64);
            if limit != 0 {
                return limit;
            }
        }
        u64::from(self.code_limit())
    }

    /// Start of the exec segment, zero before version 0x20400.
    pub fn exec_segment_base(&self) -> u64 {
        if self.supports(CODEDIRECTORY_VERSION_EXECSEG) {
            self.blob.u64_at(field::EXEC_SEG_BASE)
        } else {
            0
        }
    }

    /// Length of the exec segment, zero before version 0x20400.
    pub fn exec_segment_limit(&self) -> u64 {
        if self.supports(CODEDIRECTORY_VERSION_EXECSEG) {
            self.blob.u64_at(field::EXEC_SEG_LIMIT)
        } else {
            0
        }
    }

    /// `CS_EXECSEG_*` flags, zero before version 0x20400.
    pub fn exec_segment_flags(&self) -> u64 {
        if self.supports(CODEDIRECTORY_VERSION_EXECSEG) {
            self.blob.u64_at(field::EXEC_SEG_FLAGS)
        } else {
            0
        }
    }

    /// Hardened runtime version, zero before version 0x20500.
    pub fn runtime_version(&self) -> u32 {
        if self.supports(CODEDIRECTORY_VERSION_PREENCRYPT) {
            self.blob.u32_at(field::RUNTIME)
        } else {
            0
        }
    }

    fn pre_encrypt_offset(&self) -> Option<u32> {
        if !self.supports(CODEDIRECTORY_VERSION_PREENCRYPT) {
            return None;
        }
        match self.blob.u32_at(field::PRE_ENCRYPT_OFFSET) {
            0 => None,
            offset => Some(offset),
        }
    }

    /// Digest stored in slot `index`.
    ///
    /// Negative indices address special slots, non-negative ones code slots.
    /// With `pre_encrypt` the pre-encrypt region is addressed instead, which
    /// only exists from version 0x20500 when the offset is set.
    pub fn slot(&self, index: i64, pre_encrypt: bool) -> Option<&[u8]> {
        let base = if pre_encrypt {
            self.pre_encrypt_offset()?
        } else {
            self.hash_offset()
        };
        let size = usize::from(self.hash_size());
        let start = i64::from(base).checked_add(index.checked_mul(size as i64)?)?;
        let start = usize::try_from(start).ok()?;
        self.blob.as_bytes().get(start..start.checked_add(size)?)
    }

    /// Special slot count, capped at the highest known slot.
    pub fn max_special_slot(&self) -> u32 {
        self.n_special_slots().min(CD_SLOT_MAX)
    }

    /// Whether slot `index` is in range and holds a non-zero digest.
    pub fn slot_is_present(&self, index: i64) -> bool {
        if index < -i64::from(self.max_special_slot()) || index >= i64::from(self.n_code_slots()) {
            return false;
        }
        self.slot(index, false)
            .is_some_and(|digest| digest.iter().any(|&b| b != 0))
    }

    /// The pre-encrypt digests, one per code slot.
    pub fn pre_encrypt_hashes(&self) -> Option<&[u8]> {
        let start = self.pre_encrypt_offset()? as usize;
        let len = self.n_code_slots() as usize * usize::from(self.hash_size());
        self.blob.as_bytes().get(start..start + len)
    }

    /// Engine matching this directory's hash type.
    pub fn hash(&self) -> Result<DynamicHash> {
        hash_for(self.hash_type_raw())
    }

    /// Digest of the whole directory with its own hash type.
    ///
    /// With `truncate` the digest is cut to the 20-byte CDHash length.
    pub fn cdhash(&self, truncate: bool) -> Result<Vec<u8>> {
        let mut digest = hash::digest(self.hash_type()?, self.blob.as_bytes())?;
        if truncate {
            digest.truncate(CS_CDHASH_LEN);
        }
        Ok(digest)
    }
}
