//! Error types for blob encoding and decoding.
//!
//! This module defines the [`enum@Error`] enum covering every failure a
//! builder, maker or assert-style validation can raise, plus the lighter
//! [`ErrorCode`] / [`Context`] pair used by probe-style validation, which
//! never raises and only records why a candidate was rejected.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for blob operations.
///
/// All fallible functions in this crate return [`crate::Result<T>`], which
/// uses this error type. Match on variants to handle specific failure cases.
///
/// # Examples
///
/// ```
/// use csblob::{Blob, Error};
///
/// let blob = Blob::blobify(0xfade0b01, b"payload");
/// match blob.assert_valid(0xfade0c02, 8, None) {
///     Ok(()) => println!("valid"),
///     Err(Error::InvalidMagic { found, .. }) => eprintln!("not a directory: {found:#x}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// The stored magic does not match the expected type tag.
    #[error("Invalid magic: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// Magic the caller asked for.
        expected: u32,
        /// Magic found in the header.
        found: u32,
    },

    /// Declared length is too small for the claimed type, or the data ends
    /// before the declared length.
    #[error("Invalid length: {0}")]
    InvalidMinSize(String),

    /// Declared length exceeds a caller-imposed ceiling.
    ///
    /// Kept apart from [`Error::InvalidMinSize`] so callers can treat it as a
    /// resource limit rather than corruption.
    #[error("Invalid length: {0}")]
    InvalidMaxSize(String),

    /// Requested digest algorithm has no hash engine.
    #[error("Unsupported hash type: {0}")]
    UnsupportedHashType(u8),

    /// Attempted to embed a requirement that is not in expression form.
    #[error("Unsupported requirement kind: {0}")]
    UnsupportedRequirementForm(u32),

    /// A CodeDirectory was built before an executable source was configured.
    #[error("Executable not open")]
    ExecutableNotOpen,

    /// Special slot indices are 1-based.
    #[error("Invalid slot index: {0}")]
    InvalidSlot(i64),

    /// A digest handed to a builder has the wrong length for its hash type.
    #[error("Invalid hash size: {0}")]
    InvalidHashSize(usize),

    /// Page size must be zero (infinite) or a power of two.
    #[error("Invalid page size: {0}")]
    InvalidPageSize(u32),

    /// A hash engine was driven out of order.
    #[error("Hash engine misuse: {0}")]
    HashState(&'static str),

    /// An entitlement value has no DER encoding.
    #[error("Unsupported entitlement value: {0}")]
    UnsupportedEntitlementValue(&'static str),

    /// Reading from a byte source failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entitlement property list could not be encoded or decoded.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl Error {
    /// Classification of a validation error, if this is one.
    ///
    /// Lets assert-style callers report the same code a probe would have
    /// written into its [`Context`].
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::InvalidMagic { .. } => Some(ErrorCode::InvalidMagic),
            Error::InvalidMinSize(_) => Some(ErrorCode::InvalidMinSize),
            Error::InvalidMaxSize(_) => Some(ErrorCode::InvalidMaxSize),
            _ => None,
        }
    }
}

/// Why a probe validation rejected a blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Type tag mismatch.
    InvalidMagic,
    /// Declared length below the minimum, or data truncated.
    InvalidMinSize,
    /// Declared length above the caller's ceiling.
    InvalidMaxSize,
}

/// Mutable context receiving the classification of a failed probe.
///
/// Probe validation returns `false` instead of raising; passing a context
/// lets a stream-scanning caller find out which rule failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    /// Last recorded error, `None` while every probe has passed.
    pub error_code: Option<ErrorCode>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(context: Option<&mut Context>, code: ErrorCode) {
        if let Some(context) = context {
            context.error_code = Some(code);
        }
    }
}
