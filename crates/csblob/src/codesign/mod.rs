//! Code signing blob structures for Mach-O binaries

pub mod blob;
pub mod code_directory;
pub mod code_directory_builder;
pub mod constants;
pub mod der;
pub mod registry;
pub mod requirement;
pub mod superblob;
pub mod wrapper;

pub use blob::{Blob, BlobHeader, TypedBlob};
pub use code_directory::{CodeDirectory, Scatter};
pub use code_directory_builder::CodeDirectoryBuilder;
pub use registry::{parse_blob, BlobKind, ParsedBlob};
pub use requirement::{
    Requirement, RequirementKind, RequirementMaker, RequirementMakerChain, RequirementMakerLabel,
};
pub use superblob::{
    empty_requirements, DetachedSignatureBlob, DetachedSignatureBlobMaker, EmbeddedSignatureBlob,
    EmbeddedSignatureBlobMaker, EmbeddedSignatureBuilder, LibraryDependencyBlob,
    LibraryDependencyBlobMaker, Requirements, RequirementsMaker, SuperBlob, SuperBlobKind,
    SuperBlobMaker,
};
pub use wrapper::{BlobWrapper, EntitlementBlob, EntitlementDerBlob, LaunchConstraintBlob};
