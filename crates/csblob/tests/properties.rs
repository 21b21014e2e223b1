//! Property tests over arbitrary blobs, containers and code directories.
//!
//! Each property holds for every input proptest generates:
//! - blob validation and clone independence
//! - SuperBlob maker lookup
//! - CodeDirectory build determinism, sizing and minimum version
//! - requirement chain and operand layout

use csblob::codesign::constants::*;
use csblob::{
    Blob, CodeDirectory, CodeDirectoryBuilder, Context, Error, ErrorCode, HashType,
    RequirementKind, RequirementMaker, RequirementMakerChain, SuperBlobMaker, TypedBlob,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

// Strategies

fn arb_hash_type() -> impl Strategy<Value = HashType> {
    prop_oneof![
        Just(HashType::Sha1),
        Just(HashType::Sha256),
        Just(HashType::Sha256Truncated),
        Just(HashType::Sha384),
    ]
}

fn arb_version() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(CODEDIRECTORY_VERSION_EARLIEST),
        Just(CODEDIRECTORY_VERSION_SCATTER),
        Just(CODEDIRECTORY_VERSION_TEAMID),
        Just(CODEDIRECTORY_VERSION_CODELIMIT64),
        Just(CODEDIRECTORY_VERSION_EXECSEG),
        Just(CODEDIRECTORY_VERSION_PREENCRYPT),
    ]
}

const VERSIONS: [u32; 6] = [
    CODEDIRECTORY_VERSION_EARLIEST,
    CODEDIRECTORY_VERSION_SCATTER,
    CODEDIRECTORY_VERSION_TEAMID,
    CODEDIRECTORY_VERSION_CODELIMIT64,
    CODEDIRECTORY_VERSION_EXECSEG,
    CODEDIRECTORY_VERSION_PREENCRYPT,
];

/// Optional builder features, applied on top of a base builder
#[derive(Debug, Clone)]
struct Features {
    identifier: String,
    team_id: String,
    page_size: u32,
    exec_seg_limit: u64,
    pre_encrypt: bool,
    runtime: u32,
    scatter: usize,
}

fn arb_features() -> impl Strategy<Value = Features> {
    (
        "[a-z.]{0,24}",
        "[A-Z0-9]{0,10}",
        prop_oneof![Just(0u32), Just(512), Just(4096), Just(16384)],
        prop_oneof![Just(0u64), 1u64..0x10000],
        any::<bool>(),
        prop_oneof![Just(0u32), 1u32..0x000f_0000],
        0usize..3,
    )
        .prop_map(
            |(identifier, team_id, page_size, exec_seg_limit, pre_encrypt, runtime, scatter)| {
                Features {
                    identifier,
                    team_id,
                    page_size,
                    exec_seg_limit,
                    pre_encrypt,
                    runtime,
                    scatter,
                }
            },
        )
}

fn configure<'r>(
    hash_type: HashType,
    code: &'r Vec<u8>,
    features: &Features,
) -> CodeDirectoryBuilder<'r> {
    let mut builder = CodeDirectoryBuilder::new(hash_type)
        .executable(code, 0, code.len() as u64)
        .page_size(features.page_size)
        .identifier(&features.identifier)
        .team_id(&features.team_id)
        .exec_seg(0, features.exec_seg_limit, 0)
        .pre_encrypt_hashes(features.pre_encrypt)
        .runtime_version(features.runtime);
    if features.scatter > 0 {
        builder.create_scatter(features.scatter)[0].count = 1;
    }
    builder
}

// Blob envelope

proptest! {
    #[test]
    fn prop_initialized_blob_validates(magic in any::<u32>(), other in any::<u32>(), length in 8u32..256) {
        let mut blob = Blob::alloc(length as usize);
        blob.initialize(magic, length);
        prop_assert!(blob.assert_valid(magic, 8, None).is_ok());
        prop_assert!(blob.validate_blob(magic, 0, 0, None));

        prop_assume!(other != magic && other != 0);
        let mut context = Context::new();
        prop_assert!(!blob.validate_blob(other, 0, 0, Some(&mut context)));
        prop_assert_eq!(context.error_code, Some(ErrorCode::InvalidMagic));
        let is_invalid_magic = matches!(
            blob.assert_valid(other, 8, None),
            Err(Error::InvalidMagic { .. })
        );
        prop_assert!(is_invalid_magic);
    }

    #[test]
    fn prop_clone_preserves_payload(magic in any::<u32>(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let original = Blob::blobify(magic, &payload);
        let mut clone = original.clone_blob();
        prop_assert_eq!(clone.payload(), &payload[..]);

        if !payload.is_empty() {
            clone.bytes_mut()[8] ^= 0xff;
            prop_assert_eq!(original.payload(), &payload[..]);
        }
    }

    #[test]
    fn prop_view_inside_larger_buffer(prefix in 0usize..32, payload in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut backing = vec![0xee; prefix];
        backing.extend(Blob::blobify(7, &payload).as_bytes());
        backing.extend([0xdd; 16]);

        let view = Blob::view(&backing, prefix).unwrap();
        prop_assert!(view.is_view());
        prop_assert_eq!(view.payload(), &payload[..]);
        let cloned = view.clone_blob();
        prop_assert_eq!(cloned.as_bytes(), view.as_bytes());
    }
}

// SuperBlob

proptest! {
    #[test]
    fn prop_maker_find_returns_each_piece(
        pieces in prop::collection::btree_map(any::<u32>(), prop::collection::vec(any::<u8>(), 0..64), 0..8),
        absent in any::<u32>(),
    ) {
        let blobs: BTreeMap<u32, Blob<'static>> = pieces
            .iter()
            .map(|(&ty, payload)| (ty, Blob::blobify(0xfade_0000 | (ty & 0xffff), payload)))
            .collect();

        let mut maker = SuperBlobMaker::<csblob::codesign::superblob::Generic>::new();
        for (&ty, blob) in &blobs {
            maker.add(ty, blob);
        }
        let superblob = maker.make().unwrap();
        prop_assert_eq!(superblob.as_bytes().len(), maker.size(&[]));
        prop_assert_eq!(superblob.count() as usize, blobs.len());

        for (index, (&ty, blob)) in blobs.iter().enumerate() {
            prop_assert_eq!(superblob.type_at(index as u32), Some(ty));
            let found = superblob.find(ty).unwrap();
            prop_assert_eq!(found.as_bytes(), blob.as_bytes());
        }
        if !blobs.contains_key(&absent) {
            prop_assert!(superblob.find(absent).is_none());
        }
    }
}

// CodeDirectory

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_build_is_idempotent(
        hash_type in arb_hash_type(),
        code in prop::collection::vec(any::<u8>(), 0..20_000),
        features in arb_features(),
        version in arb_version(),
    ) {
        let builder = configure(hash_type, &code, &features);
        let first = builder.build(Some(version)).unwrap();
        let second = builder.build(Some(version)).unwrap();
        prop_assert_eq!(first.as_bytes(), second.as_bytes());
        prop_assert_eq!(first.as_bytes().len(), builder.size(Some(version)));
    }

    #[test]
    fn prop_preset_code_slots_match_hashed(
        hash_type in arb_hash_type(),
        code in prop::collection::vec(any::<u8>(), 1..20_000),
        features in arb_features(),
    ) {
        let hashed = configure(hash_type, &code, &features).build(None).unwrap();

        let mut preset = configure(hash_type, &code, &features);
        for slot in 0..preset.code_slots() {
            let digest = hashed.slot(i64::from(slot), false).unwrap().to_vec();
            preset.set_code_slot(slot, &digest).unwrap();
            prop_assert_eq!(preset.code_slot(slot).unwrap(), Some(&digest[..]));
        }
        let rebuilt = preset.build(None).unwrap();
        prop_assert_eq!(rebuilt.as_bytes(), hashed.as_bytes());
    }

    #[test]
    fn prop_min_version_size_is_smallest(
        hash_type in arb_hash_type(),
        code in prop::collection::vec(any::<u8>(), 0..5_000),
        features in arb_features(),
    ) {
        let builder = configure(hash_type, &code, &features);
        let min = builder.min_version();
        let base = builder.size(None);
        prop_assert_eq!(base, builder.size(Some(min)));
        for version in VERSIONS.into_iter().filter(|&v| v > min) {
            prop_assert!(base <= builder.size(Some(version)));
        }

        if !features.team_id.is_empty() {
            prop_assert!(min >= CODEDIRECTORY_VERSION_TEAMID);
        }
        if features.exec_seg_limit > 0 {
            prop_assert!(min >= CODEDIRECTORY_VERSION_EXECSEG);
        }
        if features.pre_encrypt || features.runtime != 0 {
            prop_assert_eq!(min, CODEDIRECTORY_VERSION_PREENCRYPT);
        }
        if features.scatter > 0 {
            prop_assert!(min >= CODEDIRECTORY_VERSION_SCATTER);
        }
    }

    #[test]
    fn prop_built_directory_reparses(
        hash_type in arb_hash_type(),
        code in prop::collection::vec(any::<u8>(), 1..10_000),
        features in arb_features(),
    ) {
        let bytes = configure(hash_type, &code, &features)
            .build(None)
            .unwrap()
            .into_blob()
            .into_vec();
        let cd = CodeDirectory::parse(&bytes).unwrap();
        prop_assert_eq!(cd.hash_type().unwrap(), hash_type);
        prop_assert_eq!(cd.signing_limit(), code.len() as u64);
        prop_assert_eq!(cd.identifier().unwrap().to_bytes(), features.identifier.as_bytes());
        for slot in 0..cd.n_code_slots() as i64 {
            prop_assert!(cd.slot(slot, false).is_some());
        }
    }
}

// Requirements

proptest! {
    #[test]
    fn prop_chain_inserts_one_joiner_per_extra_operand(count in 1usize..12, use_or in any::<bool>()) {
        let joiner = if use_or { OP_OR } else { OP_AND };
        let mut maker = RequirementMaker::new(RequirementKind::Expr);
        let mut chain = RequirementMakerChain::new(&maker, joiner);
        for _ in 0..count {
            maker.anchor();
            chain.add(&mut maker);
        }
        let requirement = maker.make().unwrap();
        let ops: Vec<u32> = requirement
            .expression()
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let mut expected = vec![joiner; count - 1];
        expected.extend(std::iter::repeat(OP_APPLE_ANCHOR).take(count));
        prop_assert_eq!(ops, expected);
    }

    #[test]
    fn prop_put_data_keeps_alignment(data in prop::collection::vec(any::<u8>(), 0..100)) {
        let mut maker = RequirementMaker::new(RequirementKind::Expr);
        maker.identifier(&data);
        prop_assert_eq!(maker.length() % 4, 0);
        let requirement = maker.make().unwrap();
        let body = requirement.expression();
        prop_assert_eq!(&body[4..8], &(data.len() as u32).to_be_bytes()[..]);
        prop_assert_eq!(&body[8..8 + data.len()], &data[..]);
        prop_assert!(body[8 + data.len()..].iter().all(|&b| b == 0));
    }
}
