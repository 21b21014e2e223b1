//! Blob envelope shared by every code signature structure
//!
//! Every structure starts with the same 8-byte big-endian header:
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ magic: type tag (4 bytes)          │
//! │ length: total size (4 bytes)       │
//! ├────────────────────────────────────┤
//! │ payload (length - 8 bytes)         │
//! └────────────────────────────────────┘
//! ```
//!
//! A [`Blob`] is either a *view* borrowing a region of an existing buffer or
//! an owned *clone*. Typed blobs ([`TypedBlob`] implementors) wrap a `Blob`
//! and fix its magic.

use super::constants::*;
use crate::error::Context;
use crate::reader::{Reader, ReaderSlice};
use crate::{Error, Result};
use std::borrow::Cow;
use std::ffi::CStr;

/// Read a big-endian u32, zero if out of range.
pub(crate) fn be_u32(buf: &[u8], offset: usize) -> u32 {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0)
}

/// Read a big-endian u64, zero if out of range.
pub(crate) fn be_u64(buf: &[u8], offset: usize) -> u64 {
    buf.get(offset..offset + 8)
        .map(|b| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            u64::from_be_bytes(bytes)
        })
        .unwrap_or(0)
}

/// The magic and length fields of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Type tag.
    pub magic: u32,
    /// Total length including the header.
    pub length: u32,
}

impl BlobHeader {
    /// Parse the first 8 bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLOB_HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: be_u32(bytes, 0),
            length: be_u32(bytes, 4),
        })
    }

    /// Serialized header bytes.
    pub fn to_bytes(&self) -> [u8; BLOB_HEADER_SIZE] {
        let mut out = [0u8; BLOB_HEADER_SIZE];
        out[..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Check magic and size bounds, raising on the first violated rule.
    ///
    /// A zero `magic` accepts any type tag. `min_size` is raised to the
    /// header size. A zero `max_size` means no ceiling.
    pub fn check(&self, magic: u32, min_size: usize, max_size: usize) -> Result<()> {
        if magic != 0 && magic != self.magic {
            return Err(Error::InvalidMagic {
                expected: magic,
                found: self.magic,
            });
        }
        let length = self.length as usize;
        let min_size = min_size.max(BLOB_HEADER_SIZE);
        if length < min_size {
            return Err(Error::InvalidMinSize(format!(
                "{length} bytes, need at least {min_size}"
            )));
        }
        if max_size != 0 && length > max_size {
            return Err(Error::InvalidMaxSize(format!(
                "{length} bytes, allowed at most {max_size}"
            )));
        }
        Ok(())
    }

    /// Probe form of [`BlobHeader::check`]: returns `false` instead of
    /// raising and records the reason into `context`.
    pub fn validate(
        &self,
        magic: u32,
        min_size: usize,
        max_size: usize,
        context: Option<&mut Context>,
    ) -> bool {
        match self.check(magic, min_size, max_size) {
            Ok(()) => true,
            Err(e) => {
                if let Some(code) = e.code() {
                    Context::record(context, code);
                }
                false
            }
        }
    }
}

/// A magic-tagged, length-prefixed region of a byte buffer.
///
/// The blob occupies `[offset, offset + length)` of its backing buffer.
/// Views borrow the buffer; clones own a buffer holding exactly the blob's
/// bytes. Writing through a view first copies the backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob<'a> {
    buf: Cow<'a, [u8]>,
    offset: usize,
}

impl<'a> Blob<'a> {
    /// View the blob starting at `offset` of `buf`, without copying.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMinSize`] if the header or the declared length does not
    /// fit in `buf`.
    pub fn view(buf: &'a [u8], offset: usize) -> Result<Self> {
        let rest = buf.get(offset..).unwrap_or_default();
        let header = BlobHeader::parse(rest).ok_or_else(|| {
            Error::InvalidMinSize(format!("{} bytes at offset {offset}, need a header", rest.len()))
        })?;
        if header.length as usize > rest.len() {
            return Err(Error::InvalidMinSize(format!(
                "declares {} bytes, {} available",
                header.length,
                rest.len()
            )));
        }
        Ok(Self {
            buf: Cow::Borrowed(buf),
            offset,
        })
    }

    /// View the blob at the start of `buf`.
    pub fn from_bytes(buf: &'a [u8]) -> Result<Self> {
        Self::view(buf, 0)
    }

    /// Take ownership of a buffer holding a blob at offset zero.
    pub fn from_vec(buf: Vec<u8>) -> Result<Blob<'static>> {
        Blob::view(&buf, 0)?;
        Ok(Blob {
            buf: Cow::Owned(buf),
            offset: 0,
        })
    }

    /// Allocate a zeroed owned buffer of `size` bytes (at least a header).
    ///
    /// The header is left zero; call [`Blob::initialize`] to set it.
    pub fn alloc(size: usize) -> Blob<'static> {
        Blob {
            buf: Cow::Owned(vec![0u8; size.max(BLOB_HEADER_SIZE)]),
            offset: 0,
        }
    }

    /// Wrap `payload` in a new owned blob tagged `magic`.
    pub fn blobify(magic: u32, payload: &[u8]) -> Blob<'static> {
        let size = BLOB_HEADER_SIZE + payload.len();
        let mut blob = Blob::alloc(size);
        blob.initialize(magic, size as u32);
        blob.bytes_mut()[BLOB_HEADER_SIZE..size].copy_from_slice(payload);
        blob
    }

    /// Read a blob from `reader` at `offset`, returning an owned copy.
    ///
    /// Returns `Ok(None)` when fewer than 8 bytes remain (end of stream) and
    /// when the header fails probe validation; the reason for the latter is
    /// recorded into `context`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMinSize`] if the header is valid but the reader holds
    /// fewer bytes than it declares. Reader failures surface as
    /// [`Error::Io`].
    pub fn read<R: Reader + ?Sized>(
        reader: &R,
        offset: u64,
        magic: u32,
        min_size: usize,
        max_size: usize,
        context: Option<&mut Context>,
    ) -> Result<Option<Blob<'static>>> {
        let reader = ReaderSlice::new(reader, offset, reader.size());
        if reader.size() < BLOB_HEADER_SIZE as u64 {
            return Ok(None);
        }

        let mut data = reader.read_range(0, BLOB_HEADER_SIZE as u64)?;
        let header = BlobHeader::parse(&data).ok_or_else(|| {
            Error::InvalidMinSize(format!("read {} header bytes", data.len()))
        })?;
        if !header.validate(magic, min_size, max_size, context) {
            tracing::warn!(
                offset,
                magic = header.magic,
                length = header.length,
                "blob header rejected"
            );
            return Ok(None);
        }

        let length = u64::from(header.length);
        if reader.size() < length {
            return Err(Error::InvalidMinSize(format!(
                "declares {length} bytes, {} available",
                reader.size()
            )));
        }
        let body = reader.read_range(BLOB_HEADER_SIZE as u64, length)?;
        data.extend_from_slice(&body);
        if data.len() as u64 != length {
            return Err(Error::InvalidMinSize(format!(
                "read {} of {length} bytes",
                data.len()
            )));
        }
        Ok(Some(Blob {
            buf: Cow::Owned(data),
            offset: 0,
        }))
    }

    /// Set magic and length. No validation.
    pub fn initialize(&mut self, magic: u32, length: u32) {
        let header = BlobHeader { magic, length }.to_bytes();
        self.bytes_mut()[..BLOB_HEADER_SIZE].copy_from_slice(&header);
    }

    /// Type tag.
    pub fn magic(&self) -> u32 {
        be_u32(&self.buf, self.offset)
    }

    /// Declared length including the header.
    pub fn length(&self) -> u32 {
        be_u32(&self.buf, self.offset + 4)
    }

    /// Overwrite the declared length.
    pub fn set_length(&mut self, length: u32) {
        self.write_u32(4, length);
    }

    /// Header fields.
    pub fn header(&self) -> BlobHeader {
        BlobHeader {
            magic: self.magic(),
            length: self.length(),
        }
    }

    /// Offset of this blob in its backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes of the backing buffer from this blob's offset onward.
    pub fn capacity(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Whether this blob borrows its buffer.
    pub fn is_view(&self) -> bool {
        matches!(self.buf, Cow::Borrowed(_))
    }

    /// The blob's bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        let end = (self.length() as usize).min(self.capacity());
        &self.buf[self.offset..self.offset + end]
    }

    /// The bytes after the header.
    pub fn payload(&self) -> &[u8] {
        self.as_bytes().get(BLOB_HEADER_SIZE..).unwrap_or_default()
    }

    /// Whether `[offset, offset + size)` lies inside the blob's payload.
    ///
    /// The header is never addressable.
    pub fn contains(&self, offset: usize, size: usize) -> bool {
        offset >= BLOB_HEADER_SIZE
            && offset
                .checked_add(size)
                .is_some_and(|end| end <= self.length() as usize)
    }

    /// NUL-terminated string at `offset`, if the terminator lies inside the
    /// blob.
    pub fn string_at(&self, offset: usize) -> Option<&CStr> {
        let bytes = self.as_bytes();
        if offset >= bytes.len() {
            return None;
        }
        CStr::from_bytes_until_nul(&bytes[offset..]).ok()
    }

    /// Probe validation. Returns `false` and records the reason into
    /// `context` instead of raising.
    pub fn validate_blob(
        &self,
        magic: u32,
        min_size: usize,
        max_size: usize,
        context: Option<&mut Context>,
    ) -> bool {
        self.header().validate(magic, min_size, max_size, context)
    }

    /// Assert validation.
    ///
    /// Same magic and minimum-size rules as [`Blob::validate_blob`], raising
    /// instead. When `length` is given the declared length must equal it.
    pub fn assert_valid(&self, magic: u32, min_size: usize, length: Option<usize>) -> Result<()> {
        self.header().check(magic, min_size, 0)?;
        if let Some(expected) = length {
            let declared = self.length() as usize;
            if declared != expected {
                return Err(Error::InvalidMinSize(format!(
                    "declares {declared} bytes, expected exactly {expected}"
                )));
            }
        }
        Ok(())
    }

    /// Independent owned copy of exactly `length` bytes.
    pub fn clone_blob(&self) -> Blob<'static> {
        Blob {
            buf: Cow::Owned(self.as_bytes().to_vec()),
            offset: 0,
        }
    }

    /// Consume the blob, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        let start = self.offset;
        let end = start + (self.length() as usize).min(self.capacity());
        match self.buf {
            Cow::Owned(mut buf) => {
                buf.truncate(end);
                buf.drain(..start);
                buf
            }
            Cow::Borrowed(buf) => buf[start..end].to_vec(),
        }
    }

    /// Mutable bytes from this blob's offset to the end of the buffer.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let offset = self.offset;
        &mut self.buf.to_mut()[offset..]
    }

    pub(crate) fn write_u8(&mut self, offset: usize, value: u8) {
        self.bytes_mut()[offset] = value;
    }

    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_u64(&mut self, offset: usize, value: u64) {
        self.bytes_mut()[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn write_bytes(&mut self, offset: usize, data: &[u8]) {
        self.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    pub(crate) fn u8_at(&self, offset: usize) -> u8 {
        self.as_bytes().get(offset).copied().unwrap_or(0)
    }

    pub(crate) fn u32_at(&self, offset: usize) -> u32 {
        be_u32(self.as_bytes(), offset)
    }

    pub(crate) fn u64_at(&self, offset: usize) -> u64 {
        be_u64(self.as_bytes(), offset)
    }
}

/// A blob whose magic is fixed by its type.
///
/// Implementors are thin wrappers over [`Blob`]; [`TypedBlob::from_blob`]
/// is the checked entry point and the only one callers need.
pub trait TypedBlob<'a>: Sized {
    /// Magic every instance carries.
    const TYPE_MAGIC: u32;

    /// Smallest valid length, fixed fields included.
    const MIN_SIZE: usize = BLOB_HEADER_SIZE;

    /// Wrap without checking.
    fn wrap(blob: Blob<'a>) -> Self;

    /// The underlying blob.
    fn blob(&self) -> &Blob<'a>;

    /// Unwrap into the underlying blob.
    fn into_blob(self) -> Blob<'a>;

    /// Type-specific structural checks run by [`TypedBlob::from_blob`].
    fn check_body(_blob: &Blob<'a>) -> Result<()> {
        Ok(())
    }

    /// Checked conversion from an untyped blob.
    fn from_blob(blob: Blob<'a>) -> Result<Self> {
        blob.assert_valid(Self::TYPE_MAGIC, Self::MIN_SIZE, None)?;
        Self::check_body(&blob)?;
        Ok(Self::wrap(blob))
    }

    /// Checked view of the blob at the start of `buf`.
    fn parse(buf: &'a [u8]) -> Result<Self> {
        Self::from_blob(Blob::from_bytes(buf)?)
    }

    /// Whether `blob` carries this type's magic.
    fn is(blob: &Blob<'_>) -> bool {
        blob.magic() == Self::TYPE_MAGIC
    }

    /// Set the header to this type's magic and `size`.
    fn initialize_for_size(blob: &mut Blob<'_>, size: u32) {
        blob.initialize(Self::TYPE_MAGIC, size);
    }

    /// Assert this type's magic and minimum size, and an exact length if
    /// given.
    fn assert_valid(&self, length: Option<usize>) -> Result<()> {
        self.blob()
            .assert_valid(Self::TYPE_MAGIC, Self::MIN_SIZE, length)
    }

    /// Serialized bytes.
    fn as_bytes<'s>(&'s self) -> &'s [u8]
    where
        'a: 's,
    {
        self.blob().as_bytes()
    }
}
