//! CodeDirectory builder
//!
//! Computes the exact layout of a CodeDirectory for the chosen version, then
//! fills it in one pass: header fields, scatter vector, identifier, team ID,
//! special-slot digests and the digest of every code page.
//!
//! The version defaults to the lowest one able to carry every configured
//! feature (see [`CodeDirectoryBuilder::min_version`]).

use super::blob::{Blob, TypedBlob};
use super::code_directory::{field, fixed_size, CodeDirectory, Scatter};
use super::constants::*;
use crate::hash::{DynamicHash, HashType};
use crate::reader::{Reader, ReaderSlice};
use crate::{Error, Result};
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Executable content to hash.
#[derive(Clone, Copy)]
struct Executable<'r> {
    source: &'r dyn Reader,
    offset: u64,
    length: u64,
}

/// Builder for CodeDirectory blobs.
///
/// # Example
///
/// ```
/// use csblob::{CodeDirectoryBuilder, HashType};
///
/// let code = vec![0u8; 8192];
/// let cd = CodeDirectoryBuilder::new(HashType::Sha256)
///     .executable(&code, 0, code.len() as u64)
///     .identifier("com.example.app")
///     .team_id("TEAMID1234")
///     .build(None)
///     .unwrap();
/// assert_eq!(cd.n_code_slots(), 2);
/// ```
pub struct CodeDirectoryBuilder<'r> {
    hash_type: HashType,
    executable: Option<Executable<'r>>,
    page_size: u32,
    code: BTreeMap<u32, Vec<u8>>,
    special: BTreeMap<u32, Vec<u8>>,
    special_slots: u32,
    identifier: Vec<u8>,
    team_id: Vec<u8>,
    scatter: Option<Vec<Scatter>>,
    exec_seg_base: u64,
    exec_seg_limit: u64,
    exec_seg_flags: u64,
    pre_encrypt_hashes: bool,
    runtime_version: u32,
    platform: u8,
    flags: u32,
}

impl std::fmt::Debug for CodeDirectoryBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeDirectoryBuilder")
            .field("hash_type", &self.hash_type)
            .field("exec_length", &self.exec_length())
            .field("page_size", &self.page_size)
            .field("preset_code_slots", &self.code.len())
            .field("special_slots", &self.special_slots)
            .field("identifier", &String::from_utf8_lossy(&self.identifier))
            .field("team_id", &String::from_utf8_lossy(&self.team_id))
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl<'r> CodeDirectoryBuilder<'r> {
    /// Create a builder for `hash_type` digests.
    pub fn new(hash_type: HashType) -> Self {
        Self {
            hash_type,
            executable: None,
            page_size: PAGE_SIZE as u32,
            code: BTreeMap::new(),
            special: BTreeMap::new(),
            special_slots: 0,
            identifier: Vec::new(),
            team_id: Vec::new(),
            scatter: None,
            exec_seg_base: 0,
            exec_seg_limit: 0,
            exec_seg_flags: 0,
            pre_encrypt_hashes: false,
            runtime_version: 0,
            platform: 0,
            flags: 0,
        }
    }

    /// Digest length of `hash_type`, as stored in `hashSize`.
    pub fn digest_length_for(hash_type: HashType) -> usize {
        hash_type.digest_length()
    }

    /// Configured hash type.
    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Digest length of the configured hash type.
    pub fn digest_length(&self) -> usize {
        self.hash_type.digest_length()
    }

    /// Hash `length` bytes of `source` starting at `offset`.
    ///
    /// # Arguments
    ///
    /// * `source` - Reader holding the executable, e.g. a whole Mach-O slice
    /// * `offset` - First signed byte within `source`
    /// * `length` - Number of signed bytes, recorded as the code limit
    pub fn executable(mut self, source: &'r dyn Reader, offset: u64, length: u64) -> Self {
        self.executable = Some(Executable {
            source,
            offset,
            length,
        });
        self
    }

    /// Page size in bytes; zero hashes the executable as one page.
    ///
    /// Defaults to 4096.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Identifier string, usually the bundle identifier.
    pub fn identifier(mut self, identifier: impl AsRef<[u8]>) -> Self {
        self.identifier = identifier.as_ref().to_vec();
        self
    }

    /// Team identifier. Empty means none.
    pub fn team_id(mut self, team_id: impl AsRef<[u8]>) -> Self {
        self.team_id = team_id.as_ref().to_vec();
        self
    }

    /// `CS_*` flags.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Platform identifier.
    pub fn platform(mut self, platform: u8) -> Self {
        self.platform = platform;
        self
    }

    /// Set exec segment base, limit and flags.
    ///
    /// # Arguments
    ///
    /// * `base` - File offset of the executable segment
    /// * `limit` - Its size; nonzero raises the minimum version to 0x20400
    /// * `flags` - `CS_EXECSEG_*` bits
    pub fn exec_seg(mut self, base: u64, limit: u64, flags: u64) -> Self {
        self.exec_seg_base = base;
        self.exec_seg_limit = limit;
        self.exec_seg_flags = flags;
        self
    }

    /// OR `flags` into the exec segment flags.
    pub fn add_exec_seg_flags(mut self, flags: u64) -> Self {
        self.exec_seg_flags |= flags;
        self
    }

    /// Also record every code digest in a pre-encrypt region.
    pub fn pre_encrypt_hashes(mut self, enabled: bool) -> Self {
        self.pre_encrypt_hashes = enabled;
        self
    }

    /// Hardened runtime version.
    pub fn runtime_version(mut self, version: u32) -> Self {
        self.runtime_version = version;
        self
    }

    /// Replace the scatter vector with `count` zeroed entries plus the zero
    /// sentinel, returning the entries for the caller to fill.
    pub fn create_scatter(&mut self, count: usize) -> &mut [Scatter] {
        let vector = self.scatter.insert(vec![Scatter::default(); count + 1]);
        &mut vector[..count]
    }

    /// Set the scatter vector. A zero sentinel is appended.
    pub fn scatter(mut self, entries: &[Scatter]) -> Self {
        let mut vector = entries.to_vec();
        vector.push(Scatter::default());
        self.scatter = Some(vector);
        self
    }

    fn exec_length(&self) -> u64 {
        self.executable.map_or(0, |e| e.length)
    }

    fn scatter_size(&self) -> usize {
        self.scatter.as_ref().map_or(0, |s| s.len() * Scatter::SIZE)
    }

    /// Number of code pages.
    pub fn code_slots(&self) -> u32 {
        let length = self.exec_length();
        if length == 0 {
            return 0;
        }
        if self.page_size == 0 {
            return 1;
        }
        length.div_ceil(u64::from(self.page_size)) as u32
    }

    /// Digest preset for code page `slot` (0-based).
    ///
    /// # Arguments
    ///
    /// * `slot` - Page index, below [`CodeDirectoryBuilder::code_slots`]
    ///
    /// # Returns
    ///
    /// The digest given to [`CodeDirectoryBuilder::set_code_slot`], or `None`
    /// when the page will be hashed from the executable.
    pub fn code_slot(&self, slot: u32) -> Result<Option<&[u8]>> {
        if slot >= self.code_slots() {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        Ok(self.code.get(&slot).map(Vec::as_slice))
    }

    /// Supply the digest of code page `slot` (0-based) instead of hashing it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlot`] if `slot` is not below
    /// [`CodeDirectoryBuilder::code_slots`], [`Error::InvalidHashSize`] if
    /// `digest` is not exactly [`CodeDirectoryBuilder::digest_length`] long.
    pub fn set_code_slot(&mut self, slot: u32, digest: &[u8]) -> Result<()> {
        if slot >= self.code_slots() {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        if digest.len() != self.digest_length() {
            return Err(Error::InvalidHashSize(digest.len()));
        }
        self.code.insert(slot, digest.to_vec());
        Ok(())
    }

    /// Number of special slots: the highest slot set.
    pub fn special_slots(&self) -> u32 {
        self.special_slots
    }

    /// Digest stored in special slot `slot` (1-based).
    pub fn special_slot(&self, slot: u32) -> Result<Option<&[u8]>> {
        if slot < 1 {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        Ok(self.special.get(&slot).map(Vec::as_slice))
    }

    /// Store a precomputed digest in special slot `slot` (1-based).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlot`] for slot zero, [`Error::InvalidHashSize`] if
    /// `digest` is not exactly [`CodeDirectoryBuilder::digest_length`] long.
    pub fn set_special_slot(&mut self, slot: u32, digest: &[u8]) -> Result<()> {
        if slot < 1 {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        if digest.len() != self.digest_length() {
            return Err(Error::InvalidHashSize(digest.len()));
        }
        self.special.insert(slot, digest.to_vec());
        self.special_slots = self.special_slots.max(slot);
        Ok(())
    }

    /// Hash each source and store the digests in their special slots.
    ///
    /// Sources are independent, so they are hashed concurrently with the
    /// `parallel` feature. Nothing is stored unless every source succeeds.
    ///
    /// # Arguments
    ///
    /// * `sources` - `(slot, data)` pairs, slots 1-based
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlot`] for slot zero, [`Error::UnsupportedHashType`]
    /// if the hash type has no engine.
    pub fn hash_special_slots(&mut self, sources: &[(u32, &[u8])]) -> Result<()> {
        if let Some(&(slot, _)) = sources.iter().find(|(slot, _)| *slot < 1) {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        let hash_type = self.hash_type;
        let hash_one = |&(slot, data): &(u32, &[u8])| -> Result<(u32, Vec<u8>)> {
            let mut hash = DynamicHash::new(hash_type)?;
            hash.update(data)?;
            Ok((slot, hash.finish()?))
        };

        #[cfg(feature = "parallel")]
        let digests: Result<Vec<_>> = sources.par_iter().map(hash_one).collect();
        #[cfg(not(feature = "parallel"))]
        let digests: Result<Vec<_>> = sources.iter().map(hash_one).collect();

        for (slot, digest) in digests? {
            self.set_special_slot(slot, &digest)?;
        }
        Ok(())
    }

    /// Lowest version that carries every configured feature.
    pub fn min_version(&self) -> u32 {
        if self.pre_encrypt_hashes || self.runtime_version != 0 {
            CODEDIRECTORY_VERSION_PREENCRYPT
        } else if self.exec_seg_limit > 0 {
            CODEDIRECTORY_VERSION_EXECSEG
        } else if self.exec_length() > u64::from(u32::MAX) {
            CODEDIRECTORY_VERSION_CODELIMIT64
        } else if !self.team_id.is_empty() {
            CODEDIRECTORY_VERSION_TEAMID
        } else if self.scatter_size() > 0 {
            CODEDIRECTORY_VERSION_SCATTER
        } else {
            CODEDIRECTORY_VERSION_EARLIEST
        }
    }

    /// Header size at `version`.
    pub fn fixed_size(version: u32) -> usize {
        fixed_size(version)
    }

    /// Exact byte length of the directory at `version` (default
    /// [`CodeDirectoryBuilder::min_version`]).
    pub fn size(&self, version: Option<u32>) -> usize {
        let version = version.unwrap_or_else(|| self.min_version());
        let digest_length = self.digest_length();
        let code_slots = self.code_slots() as usize;

        let mut size = fixed_size(version);
        if version >= CODEDIRECTORY_VERSION_SCATTER {
            size += self.scatter_size();
        }
        size += self.identifier.len() + 1;
        if version >= CODEDIRECTORY_VERSION_TEAMID && !self.team_id.is_empty() {
            size += self.team_id.len() + 1;
        }
        size += (code_slots + self.special_slots as usize) * digest_length;
        if version >= CODEDIRECTORY_VERSION_PREENCRYPT && self.pre_encrypt_hashes {
            size += code_slots * digest_length;
        }
        size
    }

    /// Build the directory at `version` (default
    /// [`CodeDirectoryBuilder::min_version`]).
    ///
    /// Pages with a digest from [`CodeDirectoryBuilder::set_code_slot`] are
    /// not read; every other page is hashed from the executable.
    ///
    /// # Arguments
    ///
    /// * `version` - Wire version, `None` for the lowest that fits
    ///
    /// # Returns
    ///
    /// An owned [`CodeDirectory`] of exactly [`CodeDirectoryBuilder::size`]
    /// bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::ExecutableNotOpen`] if no executable was configured
    /// - [`Error::InvalidPageSize`] if the page size is not a power of two
    /// - [`Error::InvalidMaxSize`] if the directory exceeds a 32-bit length
    /// - [`Error::UnsupportedHashType`] if the hash type has no engine
    /// - [`Error::Io`] if the executable cannot be read in full
    pub fn build(&self, version: Option<u32>) -> Result<CodeDirectory<'static>> {
        let executable = self.executable.ok_or(Error::ExecutableNotOpen)?;
        if self.page_size != 0 && !self.page_size.is_power_of_two() {
            return Err(Error::InvalidPageSize(self.page_size));
        }
        DynamicHash::new(self.hash_type)?;

        let version = version.unwrap_or_else(|| self.min_version());
        let size = self.size(Some(version));
        let length = u32::try_from(size).map_err(|_| {
            Error::InvalidMaxSize(format!("{size} bytes exceeds a 32-bit length"))
        })?;
        let digest_length = self.digest_length();
        let code_slots = self.code_slots();
        let exec_length = executable.length;

        let mut blob = Blob::alloc(size);
        CodeDirectory::initialize_for_size(&mut blob, length);
        blob.write_u32(field::VERSION, version);
        blob.write_u32(field::FLAGS, self.flags);
        blob.write_u32(field::N_SPECIAL_SLOTS, self.special_slots);
        blob.write_u32(field::N_CODE_SLOTS, code_slots);
        if exec_length > u64::from(u32::MAX) && version >= CODEDIRECTORY_VERSION_CODELIMIT64 {
            blob.write_u32(field::CODE_LIMIT, CODELIMIT_32_SENTINEL);
            blob.write_u64(field::CODE_LIMIT64, exec_length);
        } else {
            // Truncates when the version predates codeLimit64
            blob.write_u32(field::CODE_LIMIT, exec_length as u32);
        }
        blob.write_u8(field::HASH_SIZE, digest_length as u8);
        blob.write_u8(field::HASH_TYPE, self.hash_type.raw());
        blob.write_u8(field::PLATFORM, self.platform);
        let page_shift = if self.page_size == 0 {
            0
        } else {
            self.page_size.trailing_zeros() as u8
        };
        blob.write_u8(field::PAGE_SIZE, page_shift);
        if version >= CODEDIRECTORY_VERSION_EXECSEG {
            blob.write_u64(field::EXEC_SEG_BASE, self.exec_seg_base);
            blob.write_u64(field::EXEC_SEG_LIMIT, self.exec_seg_limit);
            blob.write_u64(field::EXEC_SEG_FLAGS, self.exec_seg_flags);
        }
        if version >= CODEDIRECTORY_VERSION_PREENCRYPT {
            blob.write_u32(field::RUNTIME, self.runtime_version);
        }

        let mut offset = fixed_size(version);
        if version >= CODEDIRECTORY_VERSION_SCATTER {
            if let Some(scatter) = &self.scatter {
                blob.write_u32(field::SCATTER_OFFSET, offset as u32);
                for entry in scatter {
                    blob.write_bytes(offset, &entry.to_bytes());
                    offset += Scatter::SIZE;
                }
            }
        }

        blob.write_u32(field::IDENT_OFFSET, offset as u32);
        blob.write_bytes(offset, &self.identifier);
        offset += self.identifier.len() + 1;

        if version >= CODEDIRECTORY_VERSION_TEAMID && !self.team_id.is_empty() {
            blob.write_u32(field::TEAM_ID_OFFSET, offset as u32);
            blob.write_bytes(offset, &self.team_id);
            offset += self.team_id.len() + 1;
        }

        let pre_encrypt = version >= CODEDIRECTORY_VERSION_PREENCRYPT && self.pre_encrypt_hashes;
        let pre_encrypt_offset = offset;
        if pre_encrypt {
            blob.write_u32(field::PRE_ENCRYPT_OFFSET, offset as u32);
            offset += code_slots as usize * digest_length;
        }

        let hash_offset = offset + self.special_slots as usize * digest_length;
        blob.write_u32(field::HASH_OFFSET, hash_offset as u32);

        for (&slot, digest) in &self.special {
            blob.write_bytes(hash_offset - slot as usize * digest_length, digest);
        }

        // Code pages in ascending order
        let page_size = if self.page_size == 0 {
            exec_length
        } else {
            u64::from(self.page_size)
        };
        let content = ReaderSlice::new(
            executable.source,
            executable.offset,
            executable.offset.saturating_add(exec_length),
        );
        for slot in 0..code_slots as usize {
            let digest = match self.code.get(&(slot as u32)) {
                Some(preset) => preset.clone(),
                None => {
                    let start = slot as u64 * page_size;
                    let end = (start + page_size).min(exec_length);
                    let page = content.slice(start, end);
                    if page.size() != end - start {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("executable ends before page {slot}"),
                        )));
                    }

                    let mut hash = DynamicHash::new(self.hash_type)?;
                    hash.update(&page)?;
                    tracing::trace!(slot, start, end, "hashed code page");
                    hash.finish()?
                }
            };

            blob.write_bytes(hash_offset + slot * digest_length, &digest);
            if pre_encrypt {
                blob.write_bytes(pre_encrypt_offset + slot * digest_length, &digest);
            }
        }

        tracing::debug!(
            version,
            length,
            code_slots,
            special_slots = self.special_slots,
            "built code directory"
        );
        Ok(CodeDirectory::wrap(blob))
    }
}
