//! Payload-only blobs: the signature wrapper and entitlement blobs
//!
//! Each of these is an 8-byte header followed by opaque bytes. They differ
//! only in magic and in how the payload is produced or interpreted.

use super::blob::{Blob, TypedBlob};
use super::constants::*;
use super::der;
use crate::Result;
use plist::Value;

macro_rules! payload_blob {
    ($(#[$meta:meta])* $name:ident, $magic:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name<'a> {
            blob: Blob<'a>,
        }

        impl<'a> TypedBlob<'a> for $name<'a> {
            const TYPE_MAGIC: u32 = $magic;

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

        impl<'a> $name<'a> {
            /// Wrap `content` in a new owned blob.
            pub fn alloc(content: &[u8]) -> $name<'static> {
                $name::wrap(Blob::blobify($magic, content))
            }

            /// Bytes after the header.
            pub fn data(&self) -> &[u8] {
                self.blob.payload()
            }

            /// Length of [`Self::data`].
            pub fn data_length(&self) -> usize {
                self.data().len()
            }
        }
    };
}

payload_blob!(
    /// Opaque wrapper, used for the CMS signature slot.
    ///
    /// An ad-hoc signature carries an empty wrapper.
    BlobWrapper,
    CSMAGIC_BLOBWRAPPER
);

payload_blob!(
    /// XML entitlements property list.
    EntitlementBlob,
    CSMAGIC_EMBEDDED_ENTITLEMENTS
);

payload_blob!(
    /// DER-encoded entitlements.
    EntitlementDerBlob,
    CSMAGIC_EMBEDDED_DER_ENTITLEMENTS
);

payload_blob!(
    /// DER-encoded launch constraint.
    LaunchConstraintBlob,
    CSMAGIC_LAUNCH_CONSTRAINT
);

impl BlobWrapper<'_> {
    /// Wrap `content` under an arbitrary magic.
    pub fn alloc_with_magic(content: &[u8], magic: u32) -> BlobWrapper<'static> {
        BlobWrapper::wrap(Blob::blobify(magic, content))
    }

    /// Empty wrapper for ad-hoc signatures.
    pub fn empty() -> BlobWrapper<'static> {
        BlobWrapper::alloc(&[])
    }
}

impl EntitlementBlob<'_> {
    /// Serialize `entitlements` as an XML plist and wrap it.
    pub fn from_plist(entitlements: &Value) -> Result<EntitlementBlob<'static>> {
        let mut xml = Vec::new();
        entitlements.to_writer_xml(&mut xml)?;
        Ok(EntitlementBlob::alloc(&xml))
    }

    /// Parse the payload as a property list.
    pub fn entitlements(&self) -> Result<Value> {
        Ok(plist::from_bytes(self.data())?)
    }
}

impl EntitlementDerBlob<'_> {
    /// DER-encode `entitlements` and wrap it.
    pub fn from_plist(entitlements: &Value) -> Result<EntitlementDerBlob<'static>> {
        let encoded = der::encode_entitlements(entitlements)?;
        Ok(EntitlementDerBlob::alloc(&encoded))
    }
}
