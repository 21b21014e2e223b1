//! Integration tests that assemble complete embedded signatures and check
//! the produced bytes with small independent parsers.
//!
//! The parsers below only know the wire format: they read raw big-endian
//! fields at fixed offsets and never go through the crate's own accessors,
//! so a layout bug cannot cancel itself out.

use csblob::codesign::constants::*;
use csblob::{
    parse_blob, Blob, BlobKind, BlobWrapper, CodeDirectoryBuilder, Context, EmbeddedSignatureBuilder,
    EntitlementBlob, EntitlementDerBlob, Error, ErrorCode, HashType, ParsedBlob, RequirementKind,
    RequirementMaker, RequirementMakerChain, RequirementsMaker, TypedBlob,
};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// CodeDirectory header fields parsed from raw bytes
#[derive(Debug, Clone)]
struct CodeDirectoryInfo {
    magic: u32,
    length: u32,
    version: u32,
    hash_offset: u32,
    ident_offset: u32,
    n_special_slots: u32,
    n_code_slots: u32,
    code_limit: u32,
    hash_size: u8,
    hash_type: u8,
    page_size_log2: u8,
    team_offset: u32,
    exec_seg_limit: u64,
    identifier: String,
}

/// SuperBlob index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlobIndexEntry {
    slot_type: u32,
    offset: u32,
}

/// Parse a u32 from big-endian bytes
fn read_be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Parse a u64 from big-endian bytes
fn read_be_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

fn c_string(data: &[u8], offset: usize) -> String {
    let end = data[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|pos| offset + pos)
        .unwrap_or(data.len());
    String::from_utf8_lossy(&data[offset..end]).to_string()
}

/// Parse a CodeDirectory blob
fn parse_code_directory(data: &[u8]) -> Option<CodeDirectoryInfo> {
    if data.len() < 44 || read_be_u32(data, 0) != CSMAGIC_CODEDIRECTORY {
        return None;
    }
    let version = read_be_u32(data, 8);
    let ident_offset = read_be_u32(data, 20);
    let team_offset = if version >= 0x20200 {
        read_be_u32(data, 48)
    } else {
        0
    };
    let exec_seg_limit = if version >= 0x20400 {
        read_be_u64(data, 72)
    } else {
        0
    };

    Some(CodeDirectoryInfo {
        magic: read_be_u32(data, 0),
        length: read_be_u32(data, 4),
        version,
        hash_offset: read_be_u32(data, 16),
        ident_offset,
        n_special_slots: read_be_u32(data, 24),
        n_code_slots: read_be_u32(data, 28),
        code_limit: read_be_u32(data, 32),
        hash_size: data[36],
        hash_type: data[37],
        page_size_log2: data[39],
        team_offset,
        exec_seg_limit,
        identifier: c_string(data, ident_offset as usize),
    })
}

/// Parse a SuperBlob index
fn parse_superblob(data: &[u8]) -> (u32, u32, Vec<BlobIndexEntry>) {
    let magic = read_be_u32(data, 0);
    let length = read_be_u32(data, 4);
    let count = read_be_u32(data, 8);
    let entries = (0..count as usize)
        .map(|i| BlobIndexEntry {
            slot_type: read_be_u32(data, 12 + i * 8),
            offset: read_be_u32(data, 12 + i * 8 + 4),
        })
        .collect();
    (magic, length, entries)
}

/// Bytes of the blob starting at `offset`
fn blob_bytes(data: &[u8], offset: u32) -> &[u8] {
    let start = offset as usize;
    let length = read_be_u32(data, start + 4) as usize;
    &data[start..start + length]
}

/// SHA-1 special slot `slot` of a CodeDirectory
fn special_slot(cd: &[u8], hash_offset: usize, slot: usize) -> &[u8] {
    let at = hash_offset - slot * 20;
    &cd[at..at + 20]
}

fn entitlements() -> plist::Value {
    let mut dict = plist::Dictionary::new();
    dict.insert(
        "application-identifier".into(),
        plist::Value::String("TEAM123456.com.example.app".into()),
    );
    dict.insert("get-task-allow".into(), plist::Value::Boolean(true));
    plist::Value::Dictionary(dict)
}

fn designated_requirement() -> Vec<u8> {
    let mut maker = RequirementMaker::new(RequirementKind::Expr);
    let mut and = RequirementMakerChain::new(&maker, OP_AND);
    maker.identifier(b"com.example.app");
    and.add(&mut maker);
    maker.anchor_generic();
    and.add(&mut maker);
    let requirement = maker.make().unwrap();

    let mut set = RequirementsMaker::new();
    set.add(CSREQ_DESIGNATED, requirement.blob());
    set.make().unwrap().into_blob().into_vec()
}

/// Sign `code` the way a signer lays out a typical app binary
fn sign(code: &[u8]) -> Vec<u8> {
    let requirements = designated_requirement();
    let entitlements_blob = EntitlementBlob::from_plist(&entitlements()).unwrap();
    let der_blob = EntitlementDerBlob::from_plist(&entitlements()).unwrap();

    let special: [(u32, &[u8]); 3] = [
        (CSSLOT_REQUIREMENTS, &requirements),
        (CSSLOT_ENTITLEMENTS, entitlements_blob.as_bytes()),
        (CSSLOT_DER_ENTITLEMENTS, der_blob.as_bytes()),
    ];

    let mut sha1_builder = CodeDirectoryBuilder::new(HashType::Sha1)
        .executable(&code, 0, code.len() as u64)
        .identifier("com.example.app")
        .team_id("TEAM123456")
        .exec_seg(0, 0x4000, CS_EXECSEG_MAIN_BINARY);
    sha1_builder.hash_special_slots(&special).unwrap();
    let cd_sha1 = sha1_builder.build(None).unwrap();

    let mut sha256_builder = CodeDirectoryBuilder::new(HashType::Sha256)
        .executable(&code, 0, code.len() as u64)
        .identifier("com.example.app")
        .team_id("TEAM123456")
        .exec_seg(0, 0x4000, CS_EXECSEG_MAIN_BINARY);
    sha256_builder.hash_special_slots(&special).unwrap();
    let cd_sha256 = sha256_builder.build(None).unwrap();

    let requirements = Blob::from_vec(requirements).unwrap();
    EmbeddedSignatureBuilder::new()
        .code_directory(&cd_sha1)
        .alternate_code_directory(0, &cd_sha256)
        .unwrap()
        .requirements(&csblob::Requirements::from_blob(requirements).unwrap())
        .entitlements(&entitlements_blob)
        .der_entitlements(&der_blob)
        .signature(&BlobWrapper::empty())
        .build()
        .unwrap()
        .into_blob()
        .into_vec()
}

#[test]
fn test_signature_index_order_and_bounds() {
    let code = vec![0x5au8; 3 * 4096 + 100];
    let signature = sign(&code);
    let (magic, length, entries) = parse_superblob(&signature);

    assert_eq!(magic, CSMAGIC_EMBEDDED_SIGNATURE);
    assert_eq!(length as usize, signature.len());

    let slots: Vec<u32> = entries.iter().map(|e| e.slot_type).collect();
    assert_eq!(
        slots,
        vec![
            CSSLOT_CODEDIRECTORY,
            CSSLOT_REQUIREMENTS,
            CSSLOT_ENTITLEMENTS,
            CSSLOT_DER_ENTITLEMENTS,
            CSSLOT_ALTERNATE_CODEDIRECTORIES,
            CSSLOT_SIGNATURESLOT,
        ]
    );

    // Blobs are packed back to back right after the index
    let mut expected_offset = 12 + entries.len() as u32 * 8;
    for entry in &entries {
        assert_eq!(entry.offset, expected_offset);
        expected_offset += blob_bytes(&signature, entry.offset).len() as u32;
    }
    assert_eq!(expected_offset, length);
}

#[test]
fn test_code_directory_fields() {
    let code: Vec<u8> = (0..3 * 4096 + 100).map(|i| (i % 251) as u8).collect();
    let signature = sign(&code);
    let (_, _, entries) = parse_superblob(&signature);

    let cd1 = blob_bytes(&signature, entries[0].offset);
    let info = parse_code_directory(cd1).unwrap();
    assert_eq!(info.magic, CSMAGIC_CODEDIRECTORY);
    assert_eq!(info.length as usize, cd1.len());
    assert_eq!(info.version, CODEDIRECTORY_VERSION_EXECSEG);
    assert_eq!(info.hash_type, CS_HASHTYPE_SHA1);
    assert_eq!(info.hash_size, 20);
    assert_eq!(info.page_size_log2, 12);
    assert_eq!(info.n_code_slots, 4);
    assert_eq!(info.n_special_slots, CSSLOT_DER_ENTITLEMENTS);
    assert_eq!(info.code_limit as usize, code.len());
    assert_eq!(info.exec_seg_limit, 0x4000);
    assert_eq!(info.identifier, "com.example.app");
    assert_eq!(info.ident_offset, 88);
    assert_eq!(c_string(cd1, info.team_offset as usize), "TEAM123456");

    // Code slots hold the SHA-1 of each page
    for (slot, page) in code.chunks(4096).enumerate() {
        let at = info.hash_offset as usize + slot * 20;
        assert_eq!(&cd1[at..at + 20], Sha1::digest(page).as_slice());
    }

    let cd256 = blob_bytes(&signature, entries[4].offset);
    let info256 = parse_code_directory(cd256).unwrap();
    assert_eq!(info256.hash_type, CS_HASHTYPE_SHA256);
    assert_eq!(info256.hash_size, 32);
    let last = info256.hash_offset as usize + 3 * 32;
    assert_eq!(&cd256[last..last + 32], Sha256::digest(&code[3 * 4096..]).as_slice());
}

#[test]
fn test_special_slots_cover_signed_blobs() {
    let code = vec![0u8; 4096];
    let signature = sign(&code);
    let (_, _, entries) = parse_superblob(&signature);
    let cd = blob_bytes(&signature, entries[0].offset);
    let info = parse_code_directory(cd).unwrap();

    let hash_offset = info.hash_offset as usize;
    let special = |slot: usize| special_slot(cd, hash_offset, slot);

    let requirements = blob_bytes(&signature, entries[1].offset);
    let entitlements = blob_bytes(&signature, entries[2].offset);
    let der = blob_bytes(&signature, entries[3].offset);
    assert_eq!(special(2), Sha1::digest(requirements).as_slice());
    assert_eq!(special(5), Sha1::digest(entitlements).as_slice());
    assert_eq!(special(7), Sha1::digest(der).as_slice());

    // Slots nobody filled stay zero
    for slot in [1, 3, 4, 6] {
        assert!(special(slot).iter().all(|&b| b == 0), "slot {slot}");
    }
}

#[test]
fn test_registry_decodes_every_entry() {
    let code = vec![1u8; 100];
    let signature = sign(&code);

    let parsed = parse_blob(Blob::from_bytes(&signature).unwrap()).unwrap();
    let ParsedBlob::EmbeddedSignature(superblob) = parsed else {
        panic!("expected an embedded signature");
    };

    let kinds: Vec<Option<BlobKind>> = superblob
        .entries()
        .map(|(_, blob)| parse_blob(blob.unwrap()).unwrap().kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(BlobKind::CodeDirectory),
            Some(BlobKind::Requirements),
            Some(BlobKind::Entitlement),
            Some(BlobKind::EntitlementDer),
            Some(BlobKind::CodeDirectory),
            Some(BlobKind::BlobWrapper),
        ]
    );

    let requirements = superblob.find(CSSLOT_REQUIREMENTS).unwrap();
    let ParsedBlob::Requirements(set) = parse_blob(requirements).unwrap() else {
        panic!("expected a requirement set");
    };
    assert_eq!(set.type_at(0), Some(CSREQ_DESIGNATED));
    let designated = set.blob_at(0).unwrap();
    assert_eq!(
        &designated.as_bytes()[12..16],
        &OP_AND.to_be_bytes(),
        "designated requirement starts with the AND joiner"
    );
}

#[test]
fn test_stream_scan_of_concatenated_blobs() {
    let mut stream = Vec::new();
    stream.extend(BlobWrapper::alloc(b"first").as_bytes());
    stream.extend(EntitlementDerBlob::alloc(&[0x31, 0x00]).as_bytes());
    stream.extend(csblob::empty_requirements().as_bytes());

    let mut offset = 0u64;
    let mut magics = Vec::new();
    while let Some(blob) = Blob::read(&stream, offset, 0, 0, 0, None).unwrap() {
        magics.push(blob.magic());
        offset += u64::from(blob.length());
    }
    assert_eq!(
        magics,
        vec![
            CSMAGIC_BLOBWRAPPER,
            CSMAGIC_EMBEDDED_DER_ENTITLEMENTS,
            CSMAGIC_REQUIREMENTS
        ]
    );
    assert_eq!(offset as usize, stream.len());
}

#[test]
fn test_stream_read_truncated_signature() {
    let code = vec![0u8; 4096];
    let mut signature = sign(&code);
    signature.truncate(signature.len() - 1);

    let err = Blob::read(&signature, 0, CSMAGIC_EMBEDDED_SIGNATURE, 0, 0, None).unwrap_err();
    assert!(matches!(err, Error::InvalidMinSize(_)));
    assert_eq!(err.code(), Some(ErrorCode::InvalidMinSize));

    // A probe for the wrong magic is a clean miss, not an error
    let mut context = Context::new();
    let miss = Blob::read(&signature, 0, CSMAGIC_CODEDIRECTORY, 0, 0, Some(&mut context)).unwrap();
    assert!(miss.is_none());
    assert_eq!(context.error_code, Some(ErrorCode::InvalidMagic));
}

#[test]
fn test_signature_is_reproducible() {
    let code: Vec<u8> = (0..10_000u32).map(|i| (i * 31) as u8).collect();
    assert_eq!(sign(&code), sign(&code));
}
