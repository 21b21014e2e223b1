//! Encoder and decoder for Apple code signature blobs.
//!
//! Covers the blob envelope, SuperBlob containers, CodeDirectories and
//! requirement expressions. Everything is read and written as big-endian
//! bytes exactly as it appears in a Mach-O `LC_CODE_SIGNATURE` payload.
//!
//! ```
//! use csblob::{CodeDirectoryBuilder, EmbeddedSignatureBuilder, HashType, TypedBlob};
//! use csblob::codesign::constants::CSSLOT_CODEDIRECTORY;
//!
//! let code = vec![0u8; 4096];
//! let cd = CodeDirectoryBuilder::new(HashType::Sha256)
//!     .executable(&code, 0, code.len() as u64)
//!     .identifier("com.example.app")
//!     .build(None)?;
//! let signature = EmbeddedSignatureBuilder::new().code_directory(&cd).build()?;
//! assert_eq!(signature.find(CSSLOT_CODEDIRECTORY).unwrap().as_bytes(), cd.as_bytes());
//! # Ok::<(), csblob::Error>(())
//! ```

pub mod codesign;
pub mod error;
pub mod hash;
pub mod reader;

pub use codesign::{
    empty_requirements, parse_blob, Blob, BlobHeader, BlobKind, BlobWrapper, CodeDirectory,
    CodeDirectoryBuilder, DetachedSignatureBlob, DetachedSignatureBlobMaker,
    EmbeddedSignatureBlob, EmbeddedSignatureBlobMaker, EmbeddedSignatureBuilder, EntitlementBlob,
    EntitlementDerBlob, LaunchConstraintBlob, LibraryDependencyBlob, LibraryDependencyBlobMaker,
    ParsedBlob, Requirement, RequirementKind, RequirementMaker, RequirementMakerChain,
    RequirementMakerLabel, Requirements, RequirementsMaker, Scatter, SuperBlob, SuperBlobKind,
    SuperBlobMaker, TypedBlob,
};
pub use error::{Context, Error, ErrorCode};
pub use hash::{DynamicHash, HashType};
pub use reader::{Reader, ReaderSlice};

pub type Result<T> = std::result::Result<T, Error>;
