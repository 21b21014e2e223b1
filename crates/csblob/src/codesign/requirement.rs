//! Code requirements and the expression encoder
//!
//! A requirement is a blob holding a boolean expression over code identity
//! predicates, serialized in prefix form as a stream of big-endian u32
//! opcodes and operands:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic 0xfade0c00             │
//! │ length                       │
//! │ kind (1 = expression)        │
//! ├──────────────────────────────┤
//! │ opcode, operands, opcode ... │
//! └──────────────────────────────┘
//! ```
//!
//! Byte-string operands are a u32 length, the bytes, then zero padding to
//! a 4-byte boundary.
//!
//! [`RequirementMaker`] emits the stream left to right. AND/OR trees are
//! built with [`RequirementMakerChain`], which splices the joiner opcode in
//! front of its operands once the second one has been emitted.

use super::blob::{Blob, TypedBlob};
use super::constants::*;
use crate::{Error, Result};

/// Header size: blob header plus the kind field.
pub const REQUIREMENT_HEADER_SIZE: usize = BLOB_HEADER_SIZE + 4;

const KIND_OFFSET: usize = BLOB_HEADER_SIZE;

/// Initial capacity of a maker's buffer.
const INITIAL_CAPACITY: usize = 1024;

/// Encoding of a requirement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    /// Opcode expression.
    Expr,
    /// DER-encoded lightweight code requirement.
    Lwcr,
}

impl RequirementKind {
    /// Parse a raw kind field.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            CSREQ_EXPR_FORM => Some(Self::Expr),
            CSREQ_LWCR_FORM => Some(Self::Lwcr),
            _ => None,
        }
    }

    /// Raw kind field.
    pub fn raw(self) -> u32 {
        match self {
            Self::Expr => CSREQ_EXPR_FORM,
            Self::Lwcr => CSREQ_LWCR_FORM,
        }
    }
}

/// A single requirement blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement<'a> {
    blob: Blob<'a>,
}

impl<'a> TypedBlob<'a> for Requirement<'a> {
    const TYPE_MAGIC: u32 = CSMAGIC_REQUIREMENT;
    const MIN_SIZE: usize = REQUIREMENT_HEADER_SIZE;

    fn wrap(blob: Blob<'a>) -> Self {
        Self { blob }
    }

    fn blob(&self) -> &Blob<'a> {
        &self.blob
    }

    fn into_blob(self) -> Blob<'a> {
        self.blob
    }
}

impl<'a> Requirement<'a> {
    /// Operand alignment inside the expression stream.
    pub const BASE_ALIGNMENT: usize = CSREQ_BASE_ALIGNMENT;

    /// Raw kind field.
    pub fn kind_raw(&self) -> u32 {
        self.blob.u32_at(KIND_OFFSET)
    }

    /// Body encoding, `None` for an unknown kind.
    pub fn kind(&self) -> Option<RequirementKind> {
        RequirementKind::from_raw(self.kind_raw())
    }

    /// Overwrite the kind field.
    pub fn set_kind(&mut self, kind: u32) {
        self.blob.write_u32(KIND_OFFSET, kind);
    }

    /// Bytes after the kind field.
    pub fn expression(&self) -> &[u8] {
        self.blob
            .as_bytes()
            .get(REQUIREMENT_HEADER_SIZE..)
            .unwrap_or_default()
    }
}

/// Round `size` up to the operand alignment.
fn align_up(size: usize) -> usize {
    size.next_multiple_of(CSREQ_BASE_ALIGNMENT)
}

/// Streaming encoder for requirement expressions.
///
/// # Example
///
/// ```
/// use csblob::{RequirementKind, RequirementMaker, RequirementMakerChain};
/// use csblob::codesign::constants::OP_AND;
///
/// let mut maker = RequirementMaker::new(RequirementKind::Expr);
/// let mut and = RequirementMakerChain::new(&maker, OP_AND);
/// maker.anchor();
/// and.add(&mut maker);
/// maker.identifier(b"com.example.app");
/// and.add(&mut maker);
/// let requirement = maker.make().unwrap();
/// assert_eq!(&requirement.expression()[..4], &[0, 0, 0, 6]);
/// ```
#[derive(Debug, Clone)]
pub struct RequirementMaker {
    buf: Vec<u8>,
    pc: usize,
}

impl RequirementMaker {
    /// Start a requirement of `kind` with an empty expression.
    pub fn new(kind: RequirementKind) -> Self {
        let mut maker = Self {
            buf: vec![0u8; INITIAL_CAPACITY.max(REQUIREMENT_HEADER_SIZE)],
            pc: REQUIREMENT_HEADER_SIZE,
        };
        maker.buf[..4].copy_from_slice(&CSMAGIC_REQUIREMENT.to_be_bytes());
        maker.set_kind(kind.raw());
        maker
    }

    /// Write cursor, which is also the length [`Self::make`] will declare.
    pub fn length(&self) -> usize {
        self.pc
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Grow so that `size` more bytes fit past the cursor.
    ///
    /// Capacity doubles, or jumps straight to the exact size when doubling
    /// is not enough.
    fn require(&mut self, size: usize) {
        let needed = self.pc + size;
        let mut total = self.buf.len();
        if needed > total {
            total *= 2;
            if needed > total {
                total = needed;
            }
            self.buf.resize(total, 0);
        }
    }

    /// Reserve `size` bytes at the cursor and return them.
    ///
    /// The cursor advances by `size` rounded up to 4; the padding stays
    /// zero.
    pub fn alloc(&mut self, size: usize) -> &mut [u8] {
        let used = align_up(size);
        self.require(used);
        let start = self.pc;
        self.pc += used;
        &mut self.buf[start..start + size]
    }

    /// Emit a raw u32 operand.
    pub fn put(&mut self, value: u32) {
        self.alloc(4).copy_from_slice(&value.to_be_bytes());
    }

    /// Emit raw bytes with no length prefix, padded to 4.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.alloc(data.len()).copy_from_slice(data);
    }

    /// Emit a length-prefixed byte string, padded to 4.
    pub fn put_data(&mut self, data: &[u8]) {
        self.put(data.len() as u32);
        self.put_bytes(data);
    }

    /// `anchor apple`
    pub fn anchor(&mut self) {
        self.put(OP_APPLE_ANCHOR);
    }

    /// `anchor apple generic`
    pub fn anchor_generic(&mut self) {
        self.put(OP_APPLE_GENERIC_ANCHOR);
    }

    /// `certificate <slot> = H"<digest>"`
    ///
    /// The digest operand is SHA-1 sized; longer digests are cut to 20
    /// bytes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHashSize`] if `digest` is shorter than 20 bytes.
    pub fn anchor_digest(&mut self, slot: u32, digest: &[u8]) -> Result<()> {
        let digest = digest
            .get(..CSREQ_ANCHOR_DIGEST_LEN)
            .ok_or(Error::InvalidHashSize(digest.len()))?;
        self.put(OP_ANCHOR_HASH);
        self.put(slot);
        self.put_data(digest);
        Ok(())
    }

    /// `anchor trusted`, or `certificate <slot> trusted` with a slot.
    pub fn trusted_anchor(&mut self, slot: Option<u32>) {
        match slot {
            None => self.put(OP_TRUSTED_CERTS),
            Some(slot) => {
                self.put(OP_TRUSTED_CERT);
                self.put(slot);
            }
        }
    }

    /// `info[<key>] = <value>`
    ///
    /// # Arguments
    ///
    /// * `key` - Info.plist key, e.g. `CFBundleIdentifier`
    /// * `value` - Expected string value
    pub fn info_key_value(&mut self, key: &[u8], value: &[u8]) {
        self.put(OP_INFO_KEY_VALUE);
        self.put_data(key);
        self.put_data(value);
    }

    /// `identifier <identifier>`
    pub fn identifier(&mut self, identifier: &[u8]) {
        self.put(OP_IDENT);
        self.put_data(identifier);
    }

    /// `cdhash H"<digest>"`
    pub fn cdhash(&mut self, digest: &[u8]) {
        self.put(OP_CDHASH);
        self.put_data(digest);
    }

    /// `platform <id>`
    pub fn platform(&mut self, platform: u32) {
        self.put(OP_PLATFORM);
        self.put(platform);
    }

    /// Append pre-encoded expression bytes verbatim.
    pub fn copy(&mut self, data: &[u8]) {
        self.put_bytes(data);
    }

    /// Append the expression of another requirement.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedRequirementForm`] unless `requirement` is in
    /// expression form.
    pub fn copy_requirement(&mut self, requirement: &Requirement<'_>) -> Result<()> {
        let kind = requirement.kind_raw();
        if kind != CSREQ_EXPR_FORM {
            return Err(Error::UnsupportedRequirementForm(kind));
        }
        self.copy(requirement.expression());
        Ok(())
    }

    /// Open `length` bytes at `label`, shifting everything emitted after it
    /// forward.
    ///
    /// # Arguments
    ///
    /// * `label` - Position taken earlier with [`RequirementMakerLabel::new`]
    /// * `length` - Bytes to open, normally one opcode
    ///
    /// # Returns
    ///
    /// The opened bytes, for the caller to fill.
    pub fn insert(&mut self, label: &RequirementMakerLabel, length: usize) -> &mut [u8] {
        let pos = label.pos.min(self.pc);
        self.require(length);
        self.buf.copy_within(pos..self.pc, pos + length);
        self.pc += length;
        &mut self.buf[pos..pos + length]
    }

    /// Overwrite the kind field.
    pub fn set_kind(&mut self, kind: u32) {
        self.buf[KIND_OFFSET..KIND_OFFSET + 4].copy_from_slice(&kind.to_be_bytes());
    }

    /// Finish the requirement, declaring a length equal to the cursor.
    ///
    /// The maker stays usable; later emits extend the same expression.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMaxSize`] if the expression exceeds a 32-bit length.
    pub fn make(&mut self) -> Result<Requirement<'static>> {
        let length = u32::try_from(self.pc).map_err(|_| {
            Error::InvalidMaxSize(format!("{} bytes exceeds a 32-bit length", self.pc))
        })?;
        self.buf[4..8].copy_from_slice(&length.to_be_bytes());

        let mut blob = Blob::alloc(self.pc);
        blob.write_bytes(0, &self.buf[..self.pc]);
        tracing::debug!(length, "made requirement");
        Ok(Requirement::wrap(blob))
    }
}

/// A remembered cursor position in a [`RequirementMaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequirementMakerLabel {
    /// Byte offset in the maker's buffer.
    pub pos: usize,
}

impl RequirementMakerLabel {
    /// Label the maker's current cursor.
    pub fn new(maker: &RequirementMaker) -> Self {
        Self { pos: maker.length() }
    }
}

/// Left-leaning chain of operands joined by one opcode.
///
/// Call [`RequirementMakerChain::add`] after emitting each operand. The
/// first call does nothing; every later call splices the joiner in front of
/// everything emitted since the chain was created, so `a, b, c` becomes
/// `JOIN(JOIN(a, b), c)`. Chains nest: a finished inner chain is one operand
/// of an outer chain.
#[derive(Debug, Clone)]
pub struct RequirementMakerChain {
    label: RequirementMakerLabel,
    joiner: u32,
    count: usize,
}

impl RequirementMakerChain {
    /// Start a chain at the maker's cursor.
    ///
    /// # Arguments
    ///
    /// * `maker` - Maker the operands will be emitted into
    /// * `joiner` - `OP_AND` or `OP_OR`
    pub fn new(maker: &RequirementMaker, joiner: u32) -> Self {
        Self {
            label: RequirementMakerLabel::new(maker),
            joiner,
            count: 0,
        }
    }

    /// Record that one more operand was emitted.
    pub fn add(&mut self, maker: &mut RequirementMaker) {
        if self.count > 0 {
            let joiner = self.joiner;
            maker
                .insert(&self.label, 4)
                .copy_from_slice(&joiner.to_be_bytes());
        }
        self.count += 1;
    }

    /// Whether no operand was added yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Where the chain starts.
    pub fn label(&self) -> &RequirementMakerLabel {
        &self.label
    }
}
