// Path: crates/screening/tests/fingerprint_index.rs
//! Screening behaviour of the fingerprint index on its own, with separate
//! handles standing in for separate processes.

use molsift_screening::block::BlockMeta;
use molsift_screening::{CancelToken, FingerprintIndex, NeverCancel};
use molsift_storage::{LobStore, MemLobStore};
use molsift_test_utils::fixtures::{brute_force_matches, fp_from_bits, unique_mirror_config};
use molsift_test_utils::{assert_err, assert_ok, assert_strictly_ascending, TestRng};
use molsift_types::config::{EngineConfig, FingerprintConfig, MirrorRole};
use molsift_types::error::ScreeningError;
use std::cell::Cell;
use std::sync::Arc;

fn engine_config(context_id: u32, fp_bytes: usize, capacity: usize) -> EngineConfig {
    let mut config = EngineConfig::new(context_id);
    config.fingerprint = FingerprintConfig::new(fp_bytes, capacity);
    config.mirror = unique_mirror_config(MirrorRole::Loader);
    config
}

fn open_writer(lob: &Arc<dyn LobStore>, config: &EngineConfig) -> FingerprintIndex {
    let mut index = assert_ok!(FingerprintIndex::init(Arc::clone(lob), config));
    assert_ok!(index.create());
    assert_ok!(index.validate_for_update());
    index
}

fn open_reader(lob: &Arc<dyn LobStore>, config: &EngineConfig) -> FingerprintIndex {
    let mut index = assert_ok!(FingerprintIndex::init(Arc::clone(lob), config));
    assert_ok!(index.validate());
    index
}

#[test]
fn screening_matches_brute_force() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(20, 8, 16);
    let mut writer = open_writer(&lob, &config);

    let mut rng = TestRng::new(2024);
    let stored: Vec<Vec<u8>> = (0..100).map(|_| rng.fingerprint(8, 0.3)).collect();
    for (i, fp) in stored.iter().enumerate() {
        assert_eq!(assert_ok!(writer.add_fingerprint(fp)), i as u64);
        // An explicit flush leaves a partially filled partition behind.
        if i == 40 {
            assert_ok!(writer.flush());
        }
    }

    let queries: Vec<Vec<u8>> = (0..30)
        .map(|_| {
            let source = &stored[rng.below(stored.len())];
            rng.sub_fingerprint(source)
        })
        .collect();

    // The writer screens persisted partitions and its pending block.
    for query in &queries {
        let passed = assert_ok!(writer.screen(query, &NeverCancel));
        assert_strictly_ascending!(passed);
        assert_eq!(passed, brute_force_matches(&stored, query));
    }

    assert_ok!(writer.flush());
    let mut reader = open_reader(&lob, &config);
    for query in &queries {
        let passed = assert_ok!(reader.screen(query, &NeverCancel));
        assert_eq!(passed, brute_force_matches(&stored, query));
    }
    assert_eq!(assert_ok!(reader.get_total_count()), 100);
    writer.drop_table().unwrap();
}

#[test]
fn persisted_partitions_keep_their_content() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(21, 4, 64);
    let mut writer = open_writer(&lob, &config);

    let mut rng = TestRng::new(5);
    let stored: Vec<Vec<u8>> = (0..50).map(|_| rng.fingerprint(4, 0.2)).collect();
    for fp in &stored {
        assert_ok!(writer.add_fingerprint(fp));
    }
    assert_ok!(writer.flush());

    let meta = assert_ok!(BlockMeta::read_row(lob.as_ref(), writer.table(), 0, 32, 64));
    let planes = assert_ok!(BlockMeta::read_planes(lob.as_ref(), writer.table(), 0, 32, 64));
    assert_eq!(meta.used, 50);

    let mut mapping = meta.mapping.clone();
    mapping.sort_unstable();
    assert_eq!(mapping, (0..50).collect::<Vec<u32>>());

    for bit in 0..32 {
        let expected = stored
            .iter()
            .filter(|fp| fp[bit / 8] & (1 << (bit % 8)) != 0)
            .count() as u32;
        assert_eq!(assert_ok!(planes.popcount(bit)), expected, "bit {}", bit);
        assert_eq!(meta.counters[bit], expected);
        for (slot, &order) in meta.mapping.iter().enumerate() {
            let fp = &stored[order as usize];
            assert_eq!(
                assert_ok!(planes.get(bit, slot)),
                fp[bit / 8] & (1 << (bit % 8)) != 0
            );
        }
    }
}

#[test]
fn flush_is_idempotent_and_every_mutation_bumps_age() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(22, 2, 8);
    let mut writer = open_writer(&lob, &config);

    let a0 = writer.age();
    assert_ok!(writer.add_fingerprint(&fp_from_bits(2, &[1, 2])));
    let a1 = writer.age();
    assert!(a1 > a0);

    assert_ok!(writer.flush());
    let a2 = writer.age();
    assert!(a2 > a1);
    assert_eq!(writer.partition_count(), 1);
    let bytes = assert_ok!(writer.persisted_plane_bytes());
    assert_eq!(bytes, 16);

    assert_ok!(writer.flush());
    assert_eq!(writer.age(), a2);
    assert_eq!(writer.partition_count(), 1);
    assert_eq!(assert_ok!(writer.persisted_plane_bytes()), bytes);
}

#[test]
fn query_shape_is_checked_before_any_io() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(23, 2, 8);
    let mut writer = open_writer(&lob, &config);

    assert!(matches!(
        assert_err!(writer.screen_init(&[0, 0])),
        ScreeningError::EmptyQuery
    ));
    assert!(matches!(
        assert_err!(writer.screen_init(&[1, 0, 0])),
        ScreeningError::InvalidFingerprintWidth { expected: 2, got: 3 }
    ));
    assert!(matches!(
        assert_err!(writer.add_fingerprint(&[1])),
        ScreeningError::InvalidFingerprintWidth { expected: 2, got: 1 }
    ));

    let session = assert_ok!(writer.screen_init(&fp_from_bits(2, &[0, 4, 8, 15])));
    assert!(writer.able_to_screen(&session));
    assert_eq!(assert_ok!(writer.query_ones_ratio(&session)), 0.25);

    let zero = engine_config(24, 0, 8);
    assert!(matches!(
        assert_err!(FingerprintIndex::init(Arc::clone(&lob), &zero)),
        ScreeningError::ZeroWidth
    ));
}

#[test]
fn cancellation_is_checked_between_partitions() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(25, 1, 2);
    let mut writer = open_writer(&lob, &config);
    for _ in 0..5 {
        assert_ok!(writer.add_fingerprint(&[0b11]));
    }
    assert_eq!(writer.partition_count(), 3);

    let token = CancelToken::new();
    token.cancel("stop requested");
    match assert_err!(writer.screen(&[0b01], &token)) {
        ScreeningError::Cancelled(reason) => assert_eq!(reason, "stop requested"),
        other => panic!("unexpected error {:?}", other),
    }

    // Allow exactly one partition, then cancel.
    let opened = Cell::new(0);
    let budget = || {
        opened.set(opened.get() + 1);
        (opened.get() > 1).then(|| "budget exhausted".to_string())
    };
    let mut session = assert_ok!(writer.screen_init(&[0b01]));
    assert!(assert_ok!(writer.screen_part_init(&mut session, &budget)));
    while assert_ok!(writer.screen_part_next(&mut session)) {}
    assert_ok!(writer.screen_part_end(&mut session));
    assert!(matches!(
        assert_err!(writer.screen_part_init(&mut session, &budget)),
        ScreeningError::Cancelled(_)
    ));
    assert_eq!(session.passed(), &[0, 1]);
}

#[test]
fn session_goes_stale_when_the_handle_mutates() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(26, 1, 4);
    let mut writer = open_writer(&lob, &config);
    assert_ok!(writer.add_fingerprint(&[0b1]));

    let mut session = assert_ok!(writer.screen_init(&[0b1]));
    assert_ok!(writer.add_fingerprint(&[0b1]));
    assert!(matches!(
        assert_err!(writer.screen_part_init(&mut session, &NeverCancel)),
        ScreeningError::StaleSession
    ));
    assert!(matches!(
        assert_err!(writer.screen_part_next(&mut session)),
        ScreeningError::StaleSession
    ));
}

#[test]
fn readers_follow_the_writer() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(27, 2, 4);
    let reader_config = EngineConfig {
        mirror: config.mirror.with_role(MirrorRole::Reader),
        ..config.clone()
    };
    let mut writer = open_writer(&lob, &config);
    for bits in [[0, 1], [1, 2], [2, 3]] {
        assert_ok!(writer.add_fingerprint(&fp_from_bits(2, &bits)));
    }
    assert_ok!(writer.flush());

    // Nothing is published yet: the reader falls back to the backing table.
    let mut reader = open_reader(&lob, &reader_config);
    let query = fp_from_bits(2, &[1]);
    assert_eq!(assert_ok!(reader.screen(&query, &NeverCancel)), vec![0, 1]);

    // A loader publishes the mirror and the reader maps it.
    let mut loader = open_reader(&lob, &config);
    assert_eq!(assert_ok!(loader.screen(&query, &NeverCancel)), vec![0, 1]);
    assert_ok!(reader.validate());
    assert_eq!(assert_ok!(reader.screen(&query, &NeverCancel)), vec![0, 1]);

    // New partitions become visible after the next refresh.
    for bits in [[1, 9], [1, 15]] {
        assert_ok!(writer.add_fingerprint(&fp_from_bits(2, &bits)));
    }
    assert_ok!(writer.flush());
    assert_eq!(
        assert_ok!(loader.screen(&query, &NeverCancel)),
        vec![0, 1, 3, 4]
    );
    assert_eq!(
        assert_ok!(reader.screen(&query, &NeverCancel)),
        vec![0, 1, 3, 4]
    );
    assert_eq!(assert_ok!(reader.get_total_count()), 5);
}

#[test]
fn count_ones_tallies_query_bits() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(28, 2, 2);
    let mut writer = open_writer(&lob, &config);
    let stored = [
        fp_from_bits(2, &[3, 9]),
        fp_from_bits(2, &[3]),
        fp_from_bits(2, &[9, 12]),
        fp_from_bits(2, &[3, 9, 12]),
        fp_from_bits(2, &[0]),
    ];
    for fp in &stored {
        assert_ok!(writer.add_fingerprint(fp));
    }

    let mut session = assert_ok!(writer.count_ones_session(&fp_from_bits(2, &[3, 9])));
    while assert_ok!(writer.count_ones_init(&mut session, &NeverCancel)) {
        while assert_ok!(writer.count_ones_next(&mut session)) {}
        assert_ok!(writer.count_ones_end(&mut session));
    }
    assert_eq!(session.one_counters(), &[2, 1, 1, 2, 0]);
    assert_eq!(session.bit_totals().collect::<Vec<_>>(), vec![(3, 3), (9, 3)]);
    writer.refresh_popularity(&session);

    assert!(matches!(
        assert_err!(writer.count_ones_end(&mut session)),
        ScreeningError::NoActivePartition
    ));
}

#[test]
fn refreshed_popularity_orders_queries_until_revalidation() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(31, 1, 2);
    let mut writer = open_writer(&lob, &config);
    for bits in [&[1][..], &[1], &[0, 1], &[0], &[0], &[0]] {
        assert_ok!(writer.add_fingerprint(&fp_from_bits(1, bits)));
    }
    assert_ok!(writer.flush());

    let mut reader = open_reader(&lob, &config);
    let query = fp_from_bits(1, &[0, 1]);
    // Bit 0 is set four times and bit 1 three times.
    assert_eq!(assert_ok!(reader.screen_init(&query)).query_ones(), &[1, 0]);

    // Counting only the first partition sees bit 0 nowhere.
    let mut session = assert_ok!(reader.count_ones_session(&query));
    assert!(assert_ok!(reader.count_ones_init(&mut session, &NeverCancel)));
    while assert_ok!(reader.count_ones_next(&mut session)) {}
    assert_ok!(reader.count_ones_end(&mut session));
    assert_eq!(session.bit_totals().collect::<Vec<_>>(), vec![(0, 0), (1, 2)]);
    reader.refresh_popularity(&session);
    assert_eq!(assert_ok!(reader.screen_init(&query)).query_ones(), &[0, 1]);

    // The next revalidation recounts every partition.
    assert_ok!(writer.add_fingerprint(&fp_from_bits(1, &[0])));
    assert_ok!(writer.flush());
    assert_eq!(assert_ok!(reader.screen_init(&query)).query_ones(), &[1, 0]);
    assert_eq!(assert_ok!(reader.screen(&query, &NeverCancel)), vec![2]);
}

#[test]
fn direct_screen_survives_a_resumed_partition_rewrite() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let mut config = engine_config(32, 1, 4);
    // Nothing is ever published, so every handle reads the backing table.
    config.mirror = unique_mirror_config(MirrorRole::Reader);
    {
        let mut writer = open_writer(&lob, &config);
        assert_ok!(writer.add_fingerprint(&fp_from_bits(1, &[0])));
        assert_ok!(writer.add_fingerprint(&fp_from_bits(1, &[1, 4])));
        assert_ok!(writer.flush());
    }
    let mut writer = open_writer(&lob, &config);
    let mut reader = open_reader(&lob, &config);

    let query = fp_from_bits(1, &[0]);
    let mut session = assert_ok!(reader.screen_init(&query));
    assert!(assert_ok!(reader.screen_part_init(&mut session, &NeverCancel)));

    // The writer appends to the partition the reader is screening.
    assert_eq!(assert_ok!(writer.add_fingerprint(&fp_from_bits(1, &[0, 2]))), 2);
    assert_ok!(writer.flush());

    while assert_ok!(reader.screen_part_next(&mut session)) {}
    assert_ok!(reader.screen_part_end(&mut session));
    assert!(!assert_ok!(reader.screen_part_init(&mut session, &NeverCancel)));
    assert_eq!(session.passed(), &[0]);

    assert_eq!(assert_ok!(reader.screen(&query, &NeverCancel)), vec![0, 2]);
    assert_eq!(assert_ok!(reader.screen(&fp_from_bits(1, &[4]), &NeverCancel)), vec![1]);
}

#[test]
fn truncate_resets_everything() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(29, 1, 2);
    let mut writer = open_writer(&lob, &config);
    for _ in 0..3 {
        assert_ok!(writer.add_fingerprint(&[0b10]));
    }
    assert_ok!(writer.flush());
    assert_eq!(assert_ok!(writer.get_total_count()), 3);

    assert_ok!(writer.truncate());
    assert_eq!(writer.partition_count(), 0);
    assert_eq!(assert_ok!(writer.get_total_count()), 0);
    assert_eq!(assert_ok!(writer.next_id()), 0);
    assert!(assert_ok!(writer.screen(&[0b10], &NeverCancel)).is_empty());

    assert_eq!(assert_ok!(writer.add_fingerprint(&[0b10])), 0);
    assert_eq!(assert_ok!(writer.screen(&[0b10], &NeverCancel)), vec![0]);
}

#[test]
fn only_the_writer_mutates() {
    let lob: Arc<dyn LobStore> = Arc::new(MemLobStore::new());
    let config = engine_config(30, 1, 2);
    let _writer = open_writer(&lob, &config);
    let mut reader = open_reader(&lob, &config);
    assert!(!reader.is_writable());
    assert!(matches!(
        assert_err!(reader.add_fingerprint(&[1])),
        ScreeningError::NotWritable
    ));
    assert!(matches!(assert_err!(reader.flush()), ScreeningError::NotWritable));
}
