use std::io::{Cursor, Read, Seek, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use packmix::coder::CopyCoder;
use packmix::crypto::{derive_key, encrypt_payload, SALT_LEN};
use packmix::{
    CoderInfo, CoderRegistry, DataError, DecodeRequest, Error, ExecStrategy, FolderDecoder,
    FolderDescriptor, MethodId, ProgressRecord, SecretBytes, UnsupportedError,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn decoder(strategy: ExecStrategy) -> FolderDecoder {
    FolderDecoder::new(CoderRegistry::new(), strategy)
}

fn password(pw: &'static str) -> Box<dyn packmix::PasswordProvider> {
    Box::new(move || -> std::io::Result<SecretBytes> { Ok(SecretBytes::from_str(pw)) })
}

fn decode_all(
    dec: &mut FolderDecoder,
    container: &[u8],
    req: DecodeRequest<'_>,
) -> Result<Vec<u8>, Error> {
    let mut input = Cursor::new(container.to_vec());
    let mut out = Vec::new();
    dec.decode_to(&mut input, req, &mut out, None)?;
    Ok(out)
}

fn zstd_pack(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).unwrap()
}

/// LZMA-compress `data` and split the result into the 5-byte properties blob
/// and the raw stream (dropping the 8 size bytes of the alone header).
fn lzma_pack(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut packed = Vec::new();
    lzma_rs::lzma_compress(&mut Cursor::new(data), &mut packed).unwrap();
    (packed[..5].to_vec(), packed[13..].to_vec())
}

fn aes_pack(plaintext: &[u8], password: &str, salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let key = derive_key(password.as_bytes(), salt).unwrap();
    encrypt_payload(&key, plaintext).unwrap()
}

fn crc32(data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(data);
    h.finalize()
}

// ── Single-coder folders ─────────────────────────────────────────────────────

#[test]
fn copy_folder_roundtrip() {
    let data = b"HELLO";
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 5, 5);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(data.to_vec());
    let mut out = Vec::new();
    let outcome = dec
        .decode_to(&mut input, DecodeRequest::new(&folder), &mut out, None)
        .unwrap();
    assert_eq!(out, data);
    assert_eq!(outcome.produced, 5);
    assert!(!outcome.data_after_end);
}

#[test]
fn identity_chains_of_any_length_round_trip() {
    let data = b"chained identity stages must be transparent";
    for n in [1usize, 2, 3, 5] {
        let folder = FolderDescriptor::chain(
            vec![CoderInfo::simple(MethodId::COPY); n],
            data.len() as u64,
            vec![data.len() as u64; n],
        );
        let mut dec = decoder(ExecStrategy::SingleThread);
        let out = decode_all(&mut dec, data, DecodeRequest::new(&folder)).unwrap();
        assert_eq!(out, data, "chain of {n} copy coders");
    }
}

#[test]
fn two_hop_bonded_chain() {
    let folder = FolderDescriptor::chain(
        vec![CoderInfo::simple(MethodId::COPY); 2],
        2,
        vec![2, 2],
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let out = decode_all(&mut dec, b"AB", DecodeRequest::new(&folder)).unwrap();
    assert_eq!(out, b"AB");
}

#[test]
fn zstd_folder_roundtrip_with_crc() {
    let data = b"the quick brown fox jumps over the lazy dog ".repeat(100);
    let packed = zstd_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::ZSTD),
        packed.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let req = DecodeRequest::new(&folder).verify_crc(crc32(&data));
    let out = decode_all(&mut dec, &packed, req).unwrap();
    assert_eq!(out, data);
}

#[test]
fn memory_limit_hint_still_decodes_ordinary_frames() {
    let data = b"window-limited zstd frame ".repeat(200);
    let packed = zstd_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::ZSTD),
        packed.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    dec.set_memory_limit(8 * 1024 * 1024);
    let out = decode_all(&mut dec, &packed, DecodeRequest::new(&folder)).unwrap();
    assert_eq!(out, data);
}

#[test]
fn crc_mismatch_is_reported() {
    let data = b"checksummed payload";
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 19, 19);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let req = DecodeRequest::new(&folder).verify_crc(crc32(data) ^ 1);
    assert!(matches!(
        decode_all(&mut dec, data, req),
        Err(Error::Data(DataError::CrcMismatch { .. }))
    ));
}

#[test]
fn folder_at_nonzero_base_offset() {
    let data = b"payload after junk";
    let mut container = b"JUNKJUN".to_vec();
    container.extend_from_slice(data);
    let folder =
        FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), data.len() as u64, data.len() as u64);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let req = DecodeRequest::new(&folder).at_offset(7);
    assert_eq!(decode_all(&mut dec, &container, req).unwrap(), data);
}

#[test]
fn lzma_folder_with_descriptor_properties() {
    let data = b"lzma folder payload ".repeat(64);
    let (props, raw) = lzma_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::with_props(MethodId::LZMA, props),
        raw.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let out = decode_all(&mut dec, &raw, DecodeRequest::new(&folder)).unwrap();
    assert_eq!(out, data);
}

// ── Chained folders ──────────────────────────────────────────────────────────

#[test]
fn aes_then_zstd_chain() {
    let data = b"solid folder member contents ".repeat(50);
    let compressed = zstd_pack(&data);
    let salt = [0x5a; SALT_LEN];
    let packed = aes_pack(&compressed, "hunter2", &salt);

    // Decode order: stage 0 decrypts the pack stream, stage 1 decompresses.
    let folder = FolderDescriptor::chain(
        vec![
            CoderInfo::with_props(MethodId::AES, salt.to_vec()),
            CoderInfo::simple(MethodId::ZSTD),
        ],
        packed.len() as u64,
        vec![compressed.len() as u64, data.len() as u64],
    );

    let mut dec = decoder(ExecStrategy::SingleThread);
    dec.set_password_provider(password("hunter2"));
    let out = decode_all(&mut dec, &packed, DecodeRequest::new(&folder)).unwrap();
    assert_eq!(out, data);
}

#[test]
fn password_source_missing() {
    let salt = [1u8; SALT_LEN];
    let packed = aes_pack(b"secret", "pw", &salt);
    let folder = FolderDescriptor::single(
        CoderInfo::with_props(MethodId::AES, salt.to_vec()),
        packed.len() as u64,
        6,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, &packed, DecodeRequest::new(&folder)),
        Err(Error::Unsupported(UnsupportedError::PasswordSourceMissing { coder: 0 }))
    ));
}

#[test]
fn wrong_password_surfaces_as_data_error() {
    let salt = [2u8; SALT_LEN];
    let packed = aes_pack(b"secret", "right", &salt);
    let folder = FolderDescriptor::single(
        CoderInfo::with_props(MethodId::AES, salt.to_vec()),
        packed.len() as u64,
        6,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    dec.set_password_provider(password("wrong"));
    assert!(matches!(
        decode_all(&mut dec, &packed, DecodeRequest::new(&folder)),
        Err(Error::Data(DataError::CoderFailed { coder: 0, .. }))
    ));
}

// ── Unsupported configurations ───────────────────────────────────────────────

#[test]
fn unknown_method_is_rejected_up_front() {
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId([0xEE; 16])), 4, 4);
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, b"data", DecodeRequest::new(&folder)),
        Err(Error::Unsupported(UnsupportedError::UnknownMethod(_)))
    ));
}

#[test]
fn properties_on_hookless_coder_are_rejected() {
    // Copy has no properties hook; a non-empty blob must fail loudly rather
    // than be silently ignored.
    let folder =
        FolderDescriptor::single(CoderInfo::with_props(MethodId::COPY, vec![1, 2, 3]), 4, 4);
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, b"data", DecodeRequest::new(&folder)),
        Err(Error::Unsupported(UnsupportedError::PropertiesNotSupported { coder: 0, len: 3, .. }))
    ));
}

#[test]
fn declared_arity_must_match_implementation() {
    let mut info = CoderInfo::simple(MethodId::COPY);
    info.num_in_streams = 2;
    let folder = FolderDescriptor {
        coders:         vec![info],
        bonds:          Vec::new(),
        pack_streams:   vec![0, 1],
        pack_positions: vec![0, 2, 4],
        unpack_sizes:   vec![4],
        main_coder:     0,
    };
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, b"data", DecodeRequest::new(&folder)),
        Err(Error::Unsupported(UnsupportedError::ArityMismatch { coder: 0, .. }))
    ));
}

// ── Truncation, trailing data, prefix decodes ────────────────────────────────

#[test]
fn truncated_container_is_a_data_error() {
    // Descriptor claims 10 packed bytes, the container only has 5.
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 10, 10);
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, b"short", DecodeRequest::new(&folder)),
        Err(Error::Data(_))
    ));
}

#[test]
fn unconsumed_pack_bytes_set_data_after_end() {
    // 10 packed bytes but the folder only unpacks 5: the decode succeeds and
    // flags the 5 trailing bytes nobody asked for.
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 10, 5);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(b"0123456789".to_vec());
    let mut out = Vec::new();
    let outcome = dec
        .decode_to(&mut input, DecodeRequest::new(&folder), &mut out, None)
        .unwrap();
    assert_eq!(out, b"01234");
    assert!(outcome.data_after_end);
}

#[test]
fn prefix_decode_stops_early() {
    let data = b"prefix decode exercises best-effort mode".repeat(10);
    let (props, raw) = lzma_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::with_props(MethodId::LZMA, props),
        raw.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let out = decode_all(&mut dec, &raw, DecodeRequest::new(&folder).prefix(17)).unwrap();
    assert_eq!(out, &data[..17]);
}

#[test]
fn prefix_over_a_chain_skips_the_missing_tail() {
    // The descriptor declares 10 packed bytes but the container holds only
    // 5; a 3-byte prefix must still come back clean in either strategy,
    // because nothing past the prefix is decoded or verified.
    let folder = FolderDescriptor::chain(
        vec![CoderInfo::simple(MethodId::COPY); 2],
        10,
        vec![10, 10],
    );
    for strategy in [ExecStrategy::SingleThread, ExecStrategy::MultiThread] {
        let mut dec = decoder(strategy);
        let out = decode_all(&mut dec, b"HELLO", DecodeRequest::new(&folder).prefix(3)).unwrap();
        assert_eq!(out, b"HEL", "{strategy:?}");
    }
}

#[test]
fn prefix_reads_only_the_packed_bytes_it_needs() {
    let folder = FolderDescriptor::chain(
        vec![CoderInfo::simple(MethodId::COPY); 2],
        10,
        vec![10, 10],
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(b"0123456789".to_vec());
    let mut out = Vec::new();
    dec.decode_to(&mut input, DecodeRequest::new(&folder).prefix(3), &mut out, None)
        .unwrap();
    assert_eq!(out, b"012");
    assert!(
        input.position() <= 3,
        "read {} container bytes for a 3-byte prefix",
        input.position()
    );
}

#[test]
fn prefix_larger_than_folder_is_a_validation_error() {
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 5, 5);
    let mut dec = decoder(ExecStrategy::SingleThread);
    assert!(matches!(
        decode_all(&mut dec, b"HELLO", DecodeRequest::new(&folder).prefix(6)),
        Err(Error::Validation(_))
    ));
}

// ── Progress & cancellation ──────────────────────────────────────────────────

#[test]
fn progress_updates_are_monotonic() {
    let data = vec![0x42u8; 300_000];
    let packed = zstd_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::ZSTD),
        packed.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut rec = ProgressRecord::default();
    let mut input = Cursor::new(packed);
    let mut out = Vec::new();
    dec.decode_to(&mut input, DecodeRequest::new(&folder), &mut out, Some(&mut rec))
        .unwrap();

    assert!(!rec.updates.is_empty());
    for pair in rec.updates.windows(2) {
        assert!(pair[1].0 >= pair[0].0);
        assert!(pair[1].1 >= pair[0].1);
    }
    assert_eq!(rec.updates.last().unwrap().1, data.len() as u64);
}

#[test]
fn final_progress_reports_only_delivered_container_bytes() {
    // 10 packed bytes but only 5 unpacked: the trailing bytes nobody read
    // must not count as consumed in the closing progress update.
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 10, 5);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut rec = ProgressRecord::default();
    let mut input = Cursor::new(b"0123456789".to_vec());
    let mut out = Vec::new();
    let outcome = dec
        .decode_to(&mut input, DecodeRequest::new(&folder), &mut out, Some(&mut rec))
        .unwrap();
    assert!(outcome.data_after_end);
    assert_eq!(rec.updates.last().unwrap(), &(5, 5));
}

#[test]
fn progress_abort_cancels_the_decode() {
    let data = vec![7u8; 500_000];
    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::COPY),
        data.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut rec = ProgressRecord { abort_after: Some(1), ..Default::default() };
    let mut input = Cursor::new(data);
    let mut out = Vec::new();
    assert!(matches!(
        dec.decode_to(&mut input, DecodeRequest::new(&folder), &mut out, Some(&mut rec)),
        Err(Error::Cancelled)
    ));
}

// ── Execution strategies ─────────────────────────────────────────────────────

#[test]
fn multi_thread_matches_single_thread() {
    let data = b"every strategy must produce the same bytes ".repeat(2000);
    let compressed = zstd_pack(&data);
    let salt = [0x33; SALT_LEN];
    let packed = aes_pack(&compressed, "pw", &salt);
    let folder = FolderDescriptor::chain(
        vec![
            CoderInfo::with_props(MethodId::AES, salt.to_vec()),
            CoderInfo::simple(MethodId::ZSTD),
        ],
        packed.len() as u64,
        vec![compressed.len() as u64, data.len() as u64],
    );

    let mut outputs = Vec::new();
    for strategy in [ExecStrategy::SingleThread, ExecStrategy::MultiThread] {
        let mut dec = decoder(strategy);
        dec.set_password_provider(password("pw"));
        outputs.push(decode_all(&mut dec, &packed, DecodeRequest::new(&folder)).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], data);
}

#[test]
fn multi_thread_reports_upstream_truncation() {
    // The descriptor claims 10 packed bytes; the container holds 5.  The
    // upstream worker and the main coder both fail, and the reported error
    // must be the root cause, not a broken-pipe cascade.
    let folder = FolderDescriptor::chain(
        vec![CoderInfo::simple(MethodId::COPY); 2],
        10,
        vec![10, 10],
    );
    let mut dec = decoder(ExecStrategy::MultiThread);
    assert!(matches!(
        decode_all(&mut dec, b"short", DecodeRequest::new(&folder)),
        Err(Error::Data(DataError::CoderFailed { .. }))
    ));
}

// ── Mixer reuse across calls ─────────────────────────────────────────────────

#[test]
fn same_folder_shape_reuses_coder_instances() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut registry = CoderRegistry::new();
    let counter = Arc::clone(&built);
    registry.register(
        MethodId::COPY,
        Arc::new(move || -> Box<dyn packmix::Coder> {
            counter.fetch_add(1, Ordering::Relaxed);
            Box::new(CopyCoder::new())
        }),
    );

    let mut dec = FolderDecoder::new(registry, ExecStrategy::SingleThread);

    // Two distinct descriptors with the same shape: sizes differ, the coder
    // and bond layout do not, so the mixer must be reused.
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 4, 4);
    let sibling = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 6, 6);
    decode_all(&mut dec, b"aaaa", DecodeRequest::new(&folder)).unwrap();
    decode_all(&mut dec, b"bbbbbb", DecodeRequest::new(&sibling)).unwrap();
    assert_eq!(dec.rebuild_count(), 1);
    assert_eq!(built.load(Ordering::Relaxed), 1);

    // A different graph shape forces a rebuild.
    let chain = FolderDescriptor::chain(
        vec![CoderInfo::simple(MethodId::COPY); 2],
        4,
        vec![4, 4],
    );
    decode_all(&mut dec, b"cccc", DecodeRequest::new(&chain)).unwrap();
    assert_eq!(dec.rebuild_count(), 2);
    assert_eq!(built.load(Ordering::Relaxed), 3);
}

#[test]
fn reused_coders_are_reinitialized_between_members() {
    // Two members of one solid folder shape decoded back to back; a stale
    // finish mode or budget from call 1 would corrupt call 2.
    let folder_a = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 8, 8);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let out = decode_all(&mut dec, b"memberAA", DecodeRequest::new(&folder_a).prefix(3)).unwrap();
    assert_eq!(out, b"mem");
    let out = decode_all(&mut dec, b"memberBB", DecodeRequest::new(&folder_a)).unwrap();
    assert_eq!(out, b"memberBB");
    assert_eq!(dec.rebuild_count(), 1);
}

// ── Pull mode ────────────────────────────────────────────────────────────────

#[test]
fn decode_reader_streams_the_main_output() {
    let data = b"pull-mode payload ".repeat(300);
    let packed = zstd_pack(&data);
    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::ZSTD),
        packed.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(packed);
    let mut reader = dec.decode_reader(&mut input, DecodeRequest::new(&folder)).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn decode_reader_honors_a_prefix_limit() {
    let data = b"0123456789ABCDEF";
    let folder = FolderDescriptor::single(CoderInfo::simple(MethodId::COPY), 16, 16);
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(data.to_vec());
    let mut reader = dec
        .decode_reader(&mut input, DecodeRequest::new(&folder).prefix(4))
        .unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"0123");
}

#[test]
fn decode_reader_materializes_non_pull_stages() {
    // LZMA has no pull support, so this chain mixes a materialized stage
    // with a lazily composed one.
    let data = b"mixed pull and materialized stages".repeat(20);
    let (props, raw) = lzma_pack(&data);
    let folder = FolderDescriptor::chain(
        vec![
            CoderInfo::with_props(MethodId::LZMA, props),
            CoderInfo::simple(MethodId::COPY),
        ],
        raw.len() as u64,
        vec![data.len() as u64, data.len() as u64],
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut input = Cursor::new(raw);
    let mut reader = dec.decode_reader(&mut input, DecodeRequest::new(&folder)).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

// ── File-backed containers ───────────────────────────────────────────────────

#[test]
fn decodes_from_a_real_file() {
    let data = b"file-backed container bytes ".repeat(500);
    let packed = zstd_pack(&data);
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&packed).unwrap();
    file.rewind().unwrap();

    let folder = FolderDescriptor::single(
        CoderInfo::simple(MethodId::ZSTD),
        packed.len() as u64,
        data.len() as u64,
    );
    let mut dec = decoder(ExecStrategy::SingleThread);
    let mut out = Vec::new();
    dec.decode_to(&mut file, DecodeRequest::new(&folder), &mut out, None)
        .unwrap();
    assert_eq!(out, data);
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn copy_prefix_always_matches_the_slice(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        split in any::<usize>(),
    ) {
        let prefix = (split % (data.len() + 1)) as u64;
        let folder = FolderDescriptor::single(
            CoderInfo::simple(MethodId::COPY),
            data.len() as u64,
            data.len() as u64,
        );
        let mut dec = decoder(ExecStrategy::SingleThread);
        let req = DecodeRequest::new(&folder).prefix(prefix);
        let out = decode_all(&mut dec, &data, req).unwrap();
        prop_assert_eq!(&out[..], &data[..prefix as usize]);
    }

    #[test]
    fn bounded_view_never_exceeds_its_range(
        data in proptest::collection::vec(any::<u8>(), 0..512),
        range in 0u64..600,
        chunk in 1usize..64,
    ) {
        let mut view = packmix::stream::BoundedStream::new(Cursor::new(data.clone()), range);
        let mut total = 0u64;
        let mut buf = vec![0u8; chunk];
        loop {
            let n = view.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n as u64;
            prop_assert!(total <= range);
        }
        prop_assert_eq!(total, range.min(data.len() as u64));
    }

    #[test]
    fn zstd_roundtrip_for_arbitrary_payloads(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let packed = zstd_pack(&data);
        let folder = FolderDescriptor::single(
            CoderInfo::simple(MethodId::ZSTD),
            packed.len() as u64,
            data.len() as u64,
        );
        let mut dec = decoder(ExecStrategy::SingleThread);
        let out = decode_all(&mut dec, &packed, DecodeRequest::new(&folder)).unwrap();
        prop_assert_eq!(out, data);
    }
}
