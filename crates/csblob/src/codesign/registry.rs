//! Magic-keyed dispatch over the known blob kinds
//!
//! The set of blob types is closed and fixed by the format, so decoding is a
//! match on the magic rather than open-ended dispatch.

use super::blob::{Blob, TypedBlob};
use super::code_directory::CodeDirectory;
use super::constants::*;
use super::requirement::Requirement;
use super::superblob::{
    DetachedSignatureBlob, EmbeddedSignatureBlob, LibraryDependencyBlob, Requirements,
};
use super::wrapper::{BlobWrapper, EntitlementBlob, EntitlementDerBlob, LaunchConstraintBlob};
use crate::Result;

/// A known blob type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Single requirement expression (`0xfade0c00`)
    Requirement,
    /// Requirement set indexed by requirement type (`0xfade0c01`)
    Requirements,
    /// Page hashes and signing metadata (`0xfade0c02`)
    CodeDirectory,
    /// Signature stored in the binary (`0xfade0cc0`)
    EmbeddedSignature,
    /// Signature stored beside the binary (`0xfade0cc1`)
    DetachedSignature,
    /// Library dependency records (`0xfade0c05`)
    LibraryDependency,
    /// Opaque payload, usually CMS (`0xfade0b01`)
    BlobWrapper,
    /// XML plist entitlements (`0xfade7171`)
    Entitlement,
    /// DER entitlements (`0xfade7172`)
    EntitlementDer,
    /// DER launch constraint (`0xfade8181`)
    LaunchConstraint,
}

impl BlobKind {
    /// Every known kind.
    pub const ALL: [BlobKind; 10] = [
        BlobKind::Requirement,
        BlobKind::Requirements,
        BlobKind::CodeDirectory,
        BlobKind::EmbeddedSignature,
        BlobKind::DetachedSignature,
        BlobKind::LibraryDependency,
        BlobKind::BlobWrapper,
        BlobKind::Entitlement,
        BlobKind::EntitlementDer,
        BlobKind::LaunchConstraint,
    ];

    /// Kind carrying `magic`, if known.
    pub fn from_magic(magic: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.magic() == magic)
    }

    /// Magic of this kind.
    pub fn magic(self) -> u32 {
        match self {
            BlobKind::Requirement => CSMAGIC_REQUIREMENT,
            BlobKind::Requirements => CSMAGIC_REQUIREMENTS,
            BlobKind::CodeDirectory => CSMAGIC_CODEDIRECTORY,
            BlobKind::EmbeddedSignature => CSMAGIC_EMBEDDED_SIGNATURE,
            BlobKind::DetachedSignature => CSMAGIC_DETACHED_SIGNATURE,
            BlobKind::LibraryDependency => CSMAGIC_LIBRARY_DEPENDENCY,
            BlobKind::BlobWrapper => CSMAGIC_BLOBWRAPPER,
            BlobKind::Entitlement => CSMAGIC_EMBEDDED_ENTITLEMENTS,
            BlobKind::EntitlementDer => CSMAGIC_EMBEDDED_DER_ENTITLEMENTS,
            BlobKind::LaunchConstraint => CSMAGIC_LAUNCH_CONSTRAINT,
        }
    }
}

/// A blob decoded into its typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBlob<'a> {
    /// Decoded [`Requirement`]
    Requirement(Requirement<'a>),
    /// Decoded [`Requirements`] set
    Requirements(Requirements<'a>),
    /// Decoded [`CodeDirectory`]
    CodeDirectory(CodeDirectory<'a>),
    /// Decoded embedded signature container
    EmbeddedSignature(EmbeddedSignatureBlob<'a>),
    /// Decoded detached signature container
    DetachedSignature(DetachedSignatureBlob<'a>),
    /// Decoded library dependency container
    LibraryDependency(LibraryDependencyBlob<'a>),
    /// Decoded [`BlobWrapper`]
    BlobWrapper(BlobWrapper<'a>),
    /// Decoded XML entitlements
    Entitlement(EntitlementBlob<'a>),
    /// Decoded DER entitlements
    EntitlementDer(EntitlementDerBlob<'a>),
    /// Decoded launch constraint
    LaunchConstraint(LaunchConstraintBlob<'a>),
    /// Magic outside the known set; the blob is passed through untouched.
    Unknown(Blob<'a>),
}

impl<'a> ParsedBlob<'a> {
    /// Kind of the decoded blob, `None` for [`ParsedBlob::Unknown`].
    pub fn kind(&self) -> Option<BlobKind> {
        match self {
            ParsedBlob::Requirement(_) => Some(BlobKind::Requirement),
            ParsedBlob::Requirements(_) => Some(BlobKind::Requirements),
            ParsedBlob::CodeDirectory(_) => Some(BlobKind::CodeDirectory),
            ParsedBlob::EmbeddedSignature(_) => Some(BlobKind::EmbeddedSignature),
            ParsedBlob::DetachedSignature(_) => Some(BlobKind::DetachedSignature),
            ParsedBlob::LibraryDependency(_) => Some(BlobKind::LibraryDependency),
            ParsedBlob::BlobWrapper(_) => Some(BlobKind::BlobWrapper),
            ParsedBlob::Entitlement(_) => Some(BlobKind::Entitlement),
            ParsedBlob::EntitlementDer(_) => Some(BlobKind::EntitlementDer),
            ParsedBlob::LaunchConstraint(_) => Some(BlobKind::LaunchConstraint),
            ParsedBlob::Unknown(_) => None,
        }
    }

    /// The underlying blob.
    pub fn blob(&self) -> &Blob<'a> {
        match self {
            ParsedBlob::Requirement(b) => b.blob(),
            ParsedBlob::Requirements(b) => b.blob(),
            ParsedBlob::CodeDirectory(b) => b.blob(),
            ParsedBlob::EmbeddedSignature(b) => b.blob(),
            ParsedBlob::DetachedSignature(b) => b.blob(),
            ParsedBlob::LibraryDependency(b) => b.blob(),
            ParsedBlob::BlobWrapper(b) => b.blob(),
            ParsedBlob::Entitlement(b) => b.blob(),
            ParsedBlob::EntitlementDer(b) => b.blob(),
            ParsedBlob::LaunchConstraint(b) => b.blob(),
            ParsedBlob::Unknown(b) => b,
        }
    }
}

/// Decode `blob` by its magic.
///
/// # Errors
///
/// Known kinds run their typed checks, so a CodeDirectory with overrunning
/// slots or a SuperBlob whose index does not fit is rejected.
pub fn parse_blob(blob: Blob<'_>) -> Result<ParsedBlob<'_>> {
    let Some(kind) = BlobKind::from_magic(blob.magic()) else {
        return Ok(ParsedBlob::Unknown(blob));
    };
    Ok(match kind {
        BlobKind::Requirement => ParsedBlob::Requirement(Requirement::from_blob(blob)?),
        BlobKind::Requirements => ParsedBlob::Requirements(Requirements::from_blob(blob)?),
        BlobKind::CodeDirectory => ParsedBlob::CodeDirectory(CodeDirectory::from_blob(blob)?),
        BlobKind::EmbeddedSignature => {
            ParsedBlob::EmbeddedSignature(EmbeddedSignatureBlob::from_blob(blob)?)
        }
        BlobKind::DetachedSignature => {
            ParsedBlob::DetachedSignature(DetachedSignatureBlob::from_blob(blob)?)
        }
        BlobKind::LibraryDependency => {
            ParsedBlob::LibraryDependency(LibraryDependencyBlob::from_blob(blob)?)
        }
        BlobKind::BlobWrapper => ParsedBlob::BlobWrapper(BlobWrapper::from_blob(blob)?),
        BlobKind::Entitlement => ParsedBlob::Entitlement(EntitlementBlob::from_blob(blob)?),
        BlobKind::EntitlementDer => {
            ParsedBlob::EntitlementDer(EntitlementDerBlob::from_blob(blob)?)
        }
        BlobKind::LaunchConstraint => {
            ParsedBlob::LaunchConstraint(LaunchConstraintBlob::from_blob(blob)?)
        }
    })
}
