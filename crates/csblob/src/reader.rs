//! Byte sources for streamed blob reads and content hashing.
//!
//! A [`Reader`] is a sized, randomly addressable byte source. Slicing never
//! copies: a [`ReaderSlice`] records a window over its parent and only reads
//! when asked for bytes.

use std::io;

/// Sized, randomly addressable byte source.
///
/// Ranges passed to [`Reader::read_range`] are clamped to the source size,
/// so reading past the end yields fewer bytes rather than an error. Callers
/// that need an exact count compare the returned length.
pub trait Reader {
    /// Total number of bytes available.
    fn size(&self) -> u64;

    /// Copy out the bytes in `[start, end)`, clamped to [`Reader::size`].
    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;

    /// Copy out every byte of the source.
    fn read_all(&self) -> io::Result<Vec<u8>> {
        self.read_range(0, self.size())
    }

    /// Window over `[start, end)` of this source, clamped to its size.
    fn slice(&self, start: u64, end: u64) -> ReaderSlice<'_, Self>
    where
        Self: Sized,
    {
        ReaderSlice::new(self, start, end)
    }
}

/// Clamp a requested range the way every reader in this crate does.
fn clamp(size: u64, start: u64, end: u64) -> (u64, u64) {
    let start = start.min(size);
    let end = end.clamp(start, size);
    (start, end)
}

impl Reader for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let (start, end) = clamp(self.size(), start, end);
        Ok(self[start as usize..end as usize].to_vec())
    }
}

impl Reader for Vec<u8> {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        self.as_slice().read_range(start, end)
    }
}

impl<R: Reader + ?Sized> Reader for &R {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        (**self).read_range(start, end)
    }
}

/// A window over part of another reader.
#[derive(Debug)]
pub struct ReaderSlice<'a, R: ?Sized> {
    inner: &'a R,
    start: u64,
    end: u64,
}

impl<R: ?Sized> Clone for ReaderSlice<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: ?Sized> Copy for ReaderSlice<'_, R> {}

impl<'a, R: Reader + ?Sized> ReaderSlice<'a, R> {
    /// Window over `[start, end)` of `inner`, clamped to its size.
    pub fn new(inner: &'a R, start: u64, end: u64) -> Self {
        let (start, end) = clamp(inner.size(), start, end);
        Self { inner, start, end }
    }

    /// Offset of this window in the parent reader.
    pub fn offset(&self) -> u64 {
        self.start
    }
}

impl<R: Reader + ?Sized> Reader for ReaderSlice<'_, R> {
    fn size(&self) -> u64 {
        self.end - self.start
    }

    fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let (start, end) = clamp(self.size(), start, end);
        self.inner.read_range(self.start + start, self.start + end)
    }
}
