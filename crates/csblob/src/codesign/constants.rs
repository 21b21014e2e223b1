//! Wire constants for code signature blobs
//!
//! Blob magics, SuperBlob index types, CodeDirectory version thresholds,
//! hash type codes and the requirement opcodes the encoder emits.

// =============================================================================
// Blob magics
// =============================================================================

/// Embedded signature container, stored in `LC_CODE_SIGNATURE`
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;

/// Detached signature container
pub const CSMAGIC_DETACHED_SIGNATURE: u32 = 0xfade0cc1;

pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;

/// Set of requirements indexed by requirement type
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;

/// One compiled requirement expression
pub const CSMAGIC_REQUIREMENT: u32 = 0xfade0c00;

/// Library dependency records
pub const CSMAGIC_LIBRARY_DEPENDENCY: u32 = 0xfade0c05;

/// Opaque payload wrapper, normally a CMS signature
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade0b01;

/// Entitlements as an XML property list
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;

/// Entitlements as DER
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;

/// Launch constraint, DER payload
pub const CSMAGIC_LAUNCH_CONSTRAINT: u32 = 0xfade8181;

/// `{magic, length}`, both big-endian u32
pub const BLOB_HEADER_SIZE: usize = 8;

// =============================================================================
// SuperBlob index types
// =============================================================================

pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;
pub const CSSLOT_INFOSLOT: u32 = 0x0001;
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;
pub const CSSLOT_RESOURCEDIR: u32 = 0x0003;
pub const CSSLOT_APPLICATION: u32 = 0x0004;
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;
pub const CSSLOT_REP_SPECIFIC: u32 = 0x0006;
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 0x0007;
pub const CSSLOT_LAUNCH_CONSTRAINT_SELF: u32 = 0x0008;
pub const CSSLOT_LAUNCH_CONSTRAINT_PARENT: u32 = 0x0009;
pub const CSSLOT_LAUNCH_CONSTRAINT_RESPONSIBLE: u32 = 0x000a;
pub const CSSLOT_LIBRARY_CONSTRAINT: u32 = 0x000b;

/// Highest special slot a CodeDirectory hashes
pub const CD_SLOT_MAX: u32 = CSSLOT_LIBRARY_CONSTRAINT;

/// First alternate CodeDirectory index type
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;

/// Alternate CodeDirectories occupy `0x1000..0x1005`
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_MAX: u32 = 5;

/// CMS signature wrapper
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;

/// Notarization ticket
pub const CSSLOT_TICKETSLOT: u32 = 0x10001;

// =============================================================================
// Hash types
// =============================================================================

pub const CS_HASHTYPE_SHA1: u8 = 1;
pub const CS_HASHTYPE_SHA256: u8 = 2;

/// SHA-256 computed in full, first 20 bytes kept
pub const CS_HASHTYPE_SHA256_TRUNCATED: u8 = 3;

pub const CS_HASHTYPE_SHA384: u8 = 4;

/// Has a digest length but no hashing engine
pub const CS_HASHTYPE_SHA512: u8 = 5;

pub const CS_SHA1_LEN: usize = 20;
pub const CS_SHA256_LEN: usize = 32;
pub const CS_SHA384_LEN: usize = 48;
pub const CS_SHA512_LEN: usize = 64;

/// CDHash length, whatever the directory's hash type
pub const CS_CDHASH_LEN: usize = 20;

// =============================================================================
// CodeDirectory flags
// =============================================================================

/// Ad-hoc signature, no signing identity
pub const CS_ADHOC: u32 = 0x0000_0002;
pub const CS_HARD: u32 = 0x0000_0100;
pub const CS_KILL: u32 = 0x0000_0200;
pub const CS_RESTRICT: u32 = 0x0000_0800;

/// Require library validation
pub const CS_REQUIRE_LV: u32 = 0x0000_2000;

/// Hardened runtime
pub const CS_RUNTIME: u32 = 0x0001_0000;

// Exec segment flags

pub const CS_EXECSEG_MAIN_BINARY: u64 = 0x0001;
pub const CS_EXECSEG_ALLOW_UNSIGNED: u64 = 0x0010;
pub const CS_EXECSEG_DEBUGGER: u64 = 0x0020;
pub const CS_EXECSEG_JIT: u64 = 0x0040;
pub const CS_EXECSEG_SKIP_LV: u64 = 0x0080;

// =============================================================================
// CodeDirectory versions
// =============================================================================

/// Oldest layout: fixed header up to `spare2`
pub const CODEDIRECTORY_VERSION_EARLIEST: u32 = 0x20001;

/// Adds `scatterOffset`
pub const CODEDIRECTORY_VERSION_SCATTER: u32 = 0x20100;

/// Adds `teamOffset`
pub const CODEDIRECTORY_VERSION_TEAMID: u32 = 0x20200;

/// Adds `spare3` and `codeLimit64`
pub const CODEDIRECTORY_VERSION_CODELIMIT64: u32 = 0x20300;

/// Adds exec segment base, limit and flags
pub const CODEDIRECTORY_VERSION_EXECSEG: u32 = 0x20400;

/// Adds `runtime` and `preEncryptOffset`
pub const CODEDIRECTORY_VERSION_PREENCRYPT: u32 = 0x20500;

/// Fixed header size at [`CODEDIRECTORY_VERSION_PREENCRYPT`]
pub const CODEDIRECTORY_HEADER_SIZE: usize = 96;

/// Stored in the 32-bit code limit when `codeLimit64` carries the value
pub const CODELIMIT_32_SENTINEL: u32 = u32::MAX;

/// Default code page size
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SIZE_LOG2: u8 = 12;

// =============================================================================
// Requirements
// =============================================================================

/// Prefix opcode stream
pub const CSREQ_EXPR_FORM: u32 = 1;

/// DER lightweight code requirement
pub const CSREQ_LWCR_FORM: u32 = 2;

/// Operand alignment inside an expression
pub const CSREQ_BASE_ALIGNMENT: usize = 4;

/// Anchor hash operands are SHA-1 sized
pub const CSREQ_ANCHOR_DIGEST_LEN: usize = 20;

pub const OP_IDENT: u32 = 2;
pub const OP_APPLE_ANCHOR: u32 = 3;
pub const OP_ANCHOR_HASH: u32 = 4;
pub const OP_INFO_KEY_VALUE: u32 = 5;
pub const OP_AND: u32 = 6;
pub const OP_OR: u32 = 7;
pub const OP_CDHASH: u32 = 8;
pub const OP_TRUSTED_CERT: u32 = 12;
pub const OP_TRUSTED_CERTS: u32 = 13;
pub const OP_APPLE_GENERIC_ANCHOR: u32 = 15;
pub const OP_PLATFORM: u32 = 20;

// Requirement set index types

pub const CSREQ_HOST: u32 = 0x0001;
pub const CSREQ_GUEST: u32 = 0x0002;
pub const CSREQ_DESIGNATED: u32 = 0x0003;
pub const CSREQ_LIBRARY: u32 = 0x0004;
pub const CSREQ_PLUGIN: u32 = 0x0005;
