//! SuperBlob container and maker
//!
//! A SuperBlob indexes a set of sub-blobs by integer type. The embedded
//! signature of a Mach-O binary is one, and so is the requirement set.
//!
//! ## Structure
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ SuperBlob Header (12 bytes)        │
//! │  - magic (4 bytes)                 │
//! │  - length: total size (4 bytes)    │
//! │  - count: number of blobs (4 bytes)│
//! ├────────────────────────────────────┤
//! │ Index Entry 0 (8 bytes)            │
//! │  - type (4 bytes)                  │
//! │  - offset (4 bytes)                │
//! ├────────────────────────────────────┤
//! │ ... more index entries             │
//! ├────────────────────────────────────┤
//! │ Blob 0 data                        │
//! ├────────────────────────────────────┤
//! │ ... more blob data                 │
//! └────────────────────────────────────┘
//! ```
//!
//! Index entries are sorted ascending by type. An offset of zero marks the
//! entry's blob as absent.
//!
//! ## Embedded Signature Slots
//!
//! - `CSSLOT_CODEDIRECTORY` (0x0000): primary CodeDirectory
//! - `CSSLOT_REQUIREMENTS` (0x0002): requirement set
//! - `CSSLOT_ENTITLEMENTS` (0x0005): XML entitlements
//! - `CSSLOT_DER_ENTITLEMENTS` (0x0007): DER entitlements
//! - `CSSLOT_ALTERNATE_CODEDIRECTORIES` (0x1000): alternate CodeDirectories
//! - `CSSLOT_SIGNATURESLOT` (0x10000): CMS signature wrapper

use super::blob::{Blob, TypedBlob};
use super::code_directory::CodeDirectory;
use super::constants::*;
use super::wrapper::{BlobWrapper, EntitlementBlob, EntitlementDerBlob, LaunchConstraintBlob};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Size of the SuperBlob header in bytes (magic + length + count)
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// Size of each index entry in bytes (type + offset)
pub const INDEX_ENTRY_SIZE: usize = 8;

/// Fixes the magic of a [`SuperBlob`] and its [`SuperBlobMaker`].
pub trait SuperBlobKind {
    /// Magic of the container. Zero accepts any magic on parse.
    const MAGIC: u32;
}

/// Untyped container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generic;

impl SuperBlobKind for Generic {
    const MAGIC: u32 = 0;
}

/// Embedded signature (`0xfade0cc0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedSignature;

impl SuperBlobKind for EmbeddedSignature {
    const MAGIC: u32 = CSMAGIC_EMBEDDED_SIGNATURE;
}

/// Detached signature (`0xfade0cc1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachedSignature;

impl SuperBlobKind for DetachedSignature {
    const MAGIC: u32 = CSMAGIC_DETACHED_SIGNATURE;
}

/// Requirement set keyed by requirement type (`0xfade0c01`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequirementSet;

impl SuperBlobKind for RequirementSet {
    const MAGIC: u32 = CSMAGIC_REQUIREMENTS;
}

/// Library dependency set (`0xfade0c05`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryDependency;

impl SuperBlobKind for LibraryDependency {
    const MAGIC: u32 = CSMAGIC_LIBRARY_DEPENDENCY;
}

/// Embedded signature of a Mach-O binary.
pub type EmbeddedSignatureBlob<'a> = SuperBlob<'a, EmbeddedSignature>;
/// Maker for [`EmbeddedSignatureBlob`].
pub type EmbeddedSignatureBlobMaker = SuperBlobMaker<EmbeddedSignature>;
/// Detached signature.
pub type DetachedSignatureBlob<'a> = SuperBlob<'a, DetachedSignature>;
/// Maker for [`DetachedSignatureBlob`].
pub type DetachedSignatureBlobMaker = SuperBlobMaker<DetachedSignature>;
/// Requirement set.
pub type Requirements<'a> = SuperBlob<'a, RequirementSet>;
/// Maker for [`Requirements`].
pub type RequirementsMaker = SuperBlobMaker<RequirementSet>;
/// Library dependency set.
pub type LibraryDependencyBlob<'a> = SuperBlob<'a, LibraryDependency>;
/// Maker for [`LibraryDependencyBlob`].
pub type LibraryDependencyBlobMaker = SuperBlobMaker<LibraryDependency>;

/// An indexed container of typed sub-blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlob<'a, K = Generic> {
    blob: Blob<'a>,
    kind: PhantomData<K>,
}

impl<'a, K: SuperBlobKind> TypedBlob<'a> for SuperBlob<'a, K> {
    const TYPE_MAGIC: u32 = K::MAGIC;
    const MIN_SIZE: usize = SUPERBLOB_HEADER_SIZE;

    fn wrap(blob: Blob<'a>) -> Self {
        Self {
            blob,
            kind: PhantomData,
        }
    }

    fn blob(&self) -> &Blob<'a> {
        &self.blob
    }

    fn into_blob(self) -> Blob<'a> {
        self.blob
    }

    fn check_body(blob: &Blob<'a>) -> Result<()> {
        let count = blob.u32_at(8) as usize;
        let index_end = count
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|n| n.checked_add(SUPERBLOB_HEADER_SIZE));
        match index_end {
            Some(end) if end <= blob.length() as usize => Ok(()),
            _ => Err(Error::InvalidMinSize(format!(
                "{} bytes cannot hold {count} index entries",
                blob.length()
            ))),
        }
    }

    fn is(blob: &Blob<'_>) -> bool {
        K::MAGIC == 0 || blob.magic() == K::MAGIC
    }
}

impl<'a, K: SuperBlobKind> SuperBlob<'a, K> {
    /// Set total length and element count.
    pub fn setup(&mut self, size: u32, count: u32) {
        self.blob.set_length(size);
        self.blob.write_u32(8, count);
    }

    /// Number of index entries.
    pub fn count(&self) -> u32 {
        self.blob.u32_at(8)
    }

    fn entry(&self, index: u32) -> Option<(u32, u32)> {
        if index >= self.count() {
            return None;
        }
        let at = SUPERBLOB_HEADER_SIZE + index as usize * INDEX_ENTRY_SIZE;
        Some((self.blob.u32_at(at), self.blob.u32_at(at + 4)))
    }

    fn index_end(&self) -> usize {
        SUPERBLOB_HEADER_SIZE + self.count() as usize * INDEX_ENTRY_SIZE
    }

    fn view_at(&self, offset: u32) -> Option<Blob<'_>> {
        if offset == 0 {
            return None;
        }
        // Sub-blobs live in [index_end, length)
        if (offset as usize) < self.index_end() {
            tracing::warn!(offset, index_end = self.index_end(), "superblob entry overlaps index");
            return None;
        }
        match Blob::view(self.blob.as_bytes(), offset as usize) {
            Ok(blob) => Some(blob),
            Err(e) => {
                tracing::warn!(offset, error = %e, "superblob entry out of bounds");
                None
            }
        }
    }

    /// Type of the `index`-th entry.
    pub fn type_at(&self, index: u32) -> Option<u32> {
        self.entry(index).map(|(ty, _)| ty)
    }

    /// View of the `index`-th entry's blob.
    ///
    /// `None` when the index is out of range, the entry is absent (zero
    /// offset), or the recorded blob overruns the container.
    pub fn blob_at(&self, index: u32) -> Option<Blob<'_>> {
        let (_, offset) = self.entry(index)?;
        self.view_at(offset)
    }

    /// View of the first entry with type `ty`.
    pub fn find(&self, ty: u32) -> Option<Blob<'_>> {
        (0..self.count())
            .filter_map(|i| self.entry(i))
            .find(|&(entry_type, _)| entry_type == ty)
            .and_then(|(_, offset)| self.view_at(offset))
    }

    /// Iterate over `(type, blob)` pairs in stored order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, Option<Blob<'_>>)> + '_ {
        (0..self.count())
            .filter_map(move |i| self.entry(i))
            .map(move |(ty, offset)| (ty, self.view_at(offset)))
    }
}

/// Collects sub-blobs and assembles them into a [`SuperBlob`].
///
/// Pieces are keyed by type; adding a type twice keeps the last piece.
#[derive(Debug, Clone)]
pub struct SuperBlobMaker<K = Generic> {
    pieces: BTreeMap<u32, Blob<'static>>,
    kind: PhantomData<K>,
}

impl<K: SuperBlobKind> Default for SuperBlobMaker<K> {
    fn default() -> Self {
        Self {
            pieces: BTreeMap::new(),
            kind: PhantomData,
        }
    }
}

impl<K: SuperBlobKind> SuperBlobMaker<K> {
    /// Create an empty maker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `blob` under `ty`, replacing any earlier piece.
    ///
    /// # Arguments
    ///
    /// * `ty` - Index type (e.g., `CSSLOT_CODEDIRECTORY`)
    /// * `blob` - Piece to copy; later changes to it are not seen
    pub fn add(&mut self, ty: u32, blob: &Blob<'_>) {
        self.pieces.insert(ty, blob.clone_blob());
    }

    /// Copy every present entry of `superblob` into this maker.
    pub fn add_superblob<K2: SuperBlobKind>(&mut self, superblob: &SuperBlob<'_, K2>) {
        for (ty, blob) in superblob.entries() {
            if let Some(blob) = blob {
                self.add(ty, &blob);
            }
        }
    }

    /// Copy every piece of another maker into this one.
    pub fn merge<K2: SuperBlobKind>(&mut self, other: &SuperBlobMaker<K2>) {
        for (&ty, blob) in &other.pieces {
            self.add(ty, blob);
        }
    }

    /// Whether a piece of type `ty` has been added.
    pub fn contains(&self, ty: u32) -> bool {
        self.pieces.contains_key(&ty)
    }

    /// The piece stored under `ty`.
    pub fn get(&self, ty: u32) -> Option<&Blob<'static>> {
        self.pieces.get(&ty)
    }

    /// Number of stored pieces.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Whether no pieces are stored.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Exact byte length [`SuperBlobMaker::make`] would produce.
    ///
    /// Each entry of `extra` reserves one more index entry plus that many
    /// payload bytes for a piece not added yet.
    pub fn size(&self, extra: &[usize]) -> usize {
        let count = self.pieces.len() + extra.len();
        let total: usize = self.pieces.values().map(|b| b.as_bytes().len()).sum::<usize>()
            + extra.iter().sum::<usize>();
        SUPERBLOB_HEADER_SIZE + count * INDEX_ENTRY_SIZE + total
    }

    /// Assemble the container, index sorted ascending by type.
    ///
    /// # Returns
    ///
    /// An owned container of exactly `self.size(&[])` bytes whose pieces
    /// follow the index in the same order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMaxSize`] if the result would not fit a 32-bit length.
    pub fn make(&self) -> Result<SuperBlob<'static, K>> {
        let size = self.size(&[]);
        let length = u32::try_from(size).map_err(|_| {
            Error::InvalidMaxSize(format!("{size} bytes exceeds a 32-bit length"))
        })?;
        let count = self.pieces.len() as u32;

        let mut blob = Blob::alloc(size);
        blob.initialize(K::MAGIC, length);
        blob.write_u32(8, count);

        let mut index = SUPERBLOB_HEADER_SIZE;
        let mut offset = SUPERBLOB_HEADER_SIZE + count as usize * INDEX_ENTRY_SIZE;
        for (&ty, piece) in &self.pieces {
            let bytes = piece.as_bytes();
            blob.write_u32(index, ty);
            blob.write_u32(index + 4, offset as u32);
            blob.write_bytes(offset, bytes);
            index += INDEX_ENTRY_SIZE;
            offset += bytes.len();
        }

        tracing::debug!(magic = K::MAGIC, count, length, "assembled superblob");
        Ok(SuperBlob::wrap(blob))
    }
}

/// An empty requirement set.
pub fn empty_requirements() -> Requirements<'static> {
    let mut blob = Blob::alloc(SUPERBLOB_HEADER_SIZE);
    blob.initialize(CSMAGIC_REQUIREMENTS, SUPERBLOB_HEADER_SIZE as u32);
    Requirements::wrap(blob)
}

/// Assembles an embedded signature from its typed components.
///
/// Pieces land in ascending slot order regardless of call order. When no
/// requirement set is given an empty one is added.
///
/// # Example
///
/// ```ignore
/// let signature = EmbeddedSignatureBuilder::new()
///     .code_directory(&cd_sha1)
///     .alternate_code_directory(0, &cd_sha256)?
///     .entitlements(&entitlements)
///     .signature(&BlobWrapper::empty())
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct EmbeddedSignatureBuilder {
    maker: EmbeddedSignatureBlobMaker,
}

impl EmbeddedSignatureBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary CodeDirectory, slot `CSSLOT_CODEDIRECTORY`.
    pub fn code_directory(mut self, cd: &CodeDirectory<'_>) -> Self {
        self.maker.add(CSSLOT_CODEDIRECTORY, cd.blob());
        self
    }

    /// Alternate CodeDirectory number `index`, slot
    /// `CSSLOT_ALTERNATE_CODEDIRECTORIES + index`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlot`] past the last alternate slot.
    pub fn alternate_code_directory(mut self, index: u32, cd: &CodeDirectory<'_>) -> Result<Self> {
        if index >= CSSLOT_ALTERNATE_CODEDIRECTORY_MAX {
            return Err(Error::InvalidSlot(i64::from(index)));
        }
        self.maker
            .add(CSSLOT_ALTERNATE_CODEDIRECTORIES + index, cd.blob());
        Ok(self)
    }

    /// Requirement set, slot `CSSLOT_REQUIREMENTS`.
    pub fn requirements(mut self, requirements: &Requirements<'_>) -> Self {
        self.maker.add(CSSLOT_REQUIREMENTS, requirements.blob());
        self
    }

    /// XML entitlements, slot `CSSLOT_ENTITLEMENTS`.
    pub fn entitlements(mut self, entitlements: &EntitlementBlob<'_>) -> Self {
        self.maker.add(CSSLOT_ENTITLEMENTS, entitlements.blob());
        self
    }

    /// DER entitlements, slot `CSSLOT_DER_ENTITLEMENTS`.
    pub fn der_entitlements(mut self, entitlements: &EntitlementDerBlob<'_>) -> Self {
        self.maker.add(CSSLOT_DER_ENTITLEMENTS, entitlements.blob());
        self
    }

    /// Launch constraint for one of the `CSSLOT_LAUNCH_CONSTRAINT_*` slots.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSlot`] for any other slot.
    pub fn launch_constraint(mut self, slot: u32, constraint: &LaunchConstraintBlob<'_>) -> Result<Self> {
        if !(CSSLOT_LAUNCH_CONSTRAINT_SELF..=CSSLOT_LIBRARY_CONSTRAINT).contains(&slot) {
            return Err(Error::InvalidSlot(i64::from(slot)));
        }
        self.maker.add(slot, constraint.blob());
        Ok(self)
    }

    /// CMS signature wrapper, slot `CSSLOT_SIGNATURESLOT`.
    pub fn signature(mut self, signature: &BlobWrapper<'_>) -> Self {
        self.maker.add(CSSLOT_SIGNATURESLOT, signature.blob());
        self
    }

    /// Assemble the signature.
    ///
    /// # Returns
    ///
    /// The embedded signature SuperBlob. An empty requirement set fills
    /// `CSSLOT_REQUIREMENTS` when none was given.
    pub fn build(mut self) -> Result<EmbeddedSignatureBlob<'static>> {
        if !self.maker.contains(CSSLOT_REQUIREMENTS) {
            self.maker
                .add(CSSLOT_REQUIREMENTS, empty_requirements().blob());
        }
        self.maker.make()
    }
}
