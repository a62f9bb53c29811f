//! Tests for the Store
//!
//! These tests verify:
//! - Basic get/put/delete semantics
//! - Argument and capacity limits
//! - Key enumeration and introspection
//! - Space accounting stays consistent with the directory
//! - State survives detaching and re-opening the partition
//! - Formatting and configuration validation

use sectorkv::flash::{FileFlash, FlashPartition, Geometry, MemoryFlash};
use sectorkv::{ChecksumAlgorithm, KvError, Store, StoreConfig};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// 4 sectors of 4 KiB, 16 byte program granularity
fn flash_4k() -> MemoryFlash {
    MemoryFlash::with_sectors(4096, 4, 16)
}

/// 4 sectors of 512 bytes: fills up quickly
fn flash_small() -> MemoryFlash {
    MemoryFlash::with_sectors(512, 4, 16)
}

fn open(flash: MemoryFlash) -> Store<MemoryFlash> {
    Store::open(flash, StoreConfig::default()).unwrap()
}

/// Detach and attach again, like a device reset
fn reopen(store: Store<MemoryFlash>) -> Store<MemoryFlash> {
    let config = store.config().clone();
    Store::open(store.into_flash(), config).unwrap()
}

fn sorted_keys(store: &Store<MemoryFlash>) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = store.keys().map(|k| k.to_vec()).collect();
    keys.sort();
    keys
}

/// Sum of entry sizes for every copy of every live key
fn expected_live_bytes(store: &Store<MemoryFlash>) -> u64 {
    store
        .keys()
        .filter_map(|k| store.descriptor(k))
        .map(|d| d.size as u64 * d.addresses.len() as u64)
        .sum()
}

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_open_empty_partition() {
    let store = open(flash_4k());

    assert!(store.is_empty());
    assert_eq!(store.len(), 0);
    assert_eq!(store.transaction_id(), 0);
    assert_eq!(store.keys().count(), 0);
    assert_eq!(store.last_recovery().entries_recovered, 0);
}

#[test]
fn test_put_then_get() {
    let mut store = open(flash_4k());

    store.put(b"a", b"1").unwrap();

    assert_eq!(store.get(b"a").unwrap(), b"1");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_get_is_idempotent() {
    let mut store = open(flash_4k());
    store.put(b"config", b"{\"rate\":115200}").unwrap();

    let first = store.get(b"config").unwrap();
    let second = store.get(b"config").unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_put_overwrites() {
    let mut store = open(flash_4k());

    store.put(b"key", b"old").unwrap();
    store.put(b"key", b"new").unwrap();

    assert_eq!(store.get(b"key").unwrap(), b"new");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_put_empty_value() {
    let mut store = open(flash_4k());

    store.put(b"empty", b"").unwrap();

    assert_eq!(store.get(b"empty").unwrap(), Vec::<u8>::new());
    assert!(store.contains(b"empty"));
}

#[test]
fn test_get_missing_key() {
    let mut store = open(flash_4k());

    assert!(matches!(store.get(b"nothing"), Err(KvError::NotFound)));
}

#[test]
fn test_delete() {
    let mut store = open(flash_4k());
    store.put(b"a", b"1").unwrap();

    store.delete(b"a").unwrap();

    assert!(matches!(store.get(b"a"), Err(KvError::NotFound)));
    assert!(!store.contains(b"a"));
    assert_eq!(store.len(), 0);
    assert_eq!(store.stats().deleted_count, 1);
}

#[test]
fn test_delete_missing_key() {
    let mut store = open(flash_4k());

    assert!(matches!(store.delete(b"missing"), Err(KvError::NotFound)));
}

#[test]
fn test_delete_twice() {
    let mut store = open(flash_4k());
    store.put(b"a", b"1").unwrap();
    store.delete(b"a").unwrap();

    assert!(matches!(store.delete(b"a"), Err(KvError::NotFound)));
}

#[test]
fn test_put_after_delete() {
    let mut store = open(flash_4k());
    store.put(b"a", b"1").unwrap();
    store.delete(b"a").unwrap();

    store.put(b"a", b"2").unwrap();

    assert_eq!(store.get(b"a").unwrap(), b"2");
    assert_eq!(store.stats().deleted_count, 0);
}

#[test]
fn test_transaction_ids_increase() {
    let mut store = open(flash_4k());

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.delete(b"a").unwrap();

    assert_eq!(store.transaction_id(), 3);
    assert_eq!(store.descriptor(b"b").unwrap().transaction_id, 2);
    assert_eq!(store.descriptor(b"a").unwrap().transaction_id, 3);
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_empty_key_rejected() {
    let mut store = open(flash_4k());

    assert!(matches!(store.put(b"", b"v"), Err(KvError::InvalidArgument(_))));
    assert!(matches!(store.delete(b""), Err(KvError::InvalidArgument(_))));
}

#[test]
fn test_long_key_rejected() {
    let config = StoreConfig::builder().max_key_len(8).build();
    let mut store = Store::open(flash_4k(), config).unwrap();

    store.put(b"12345678", b"ok").unwrap();
    assert!(matches!(
        store.put(b"123456789", b"too long"),
        Err(KvError::InvalidArgument(_))
    ));
}

#[test]
fn test_long_value_rejected() {
    let config = StoreConfig::builder().max_value_len(100).build();
    let mut store = Store::open(flash_4k(), config).unwrap();

    store.put(b"k", &[1u8; 100]).unwrap();
    assert!(matches!(
        store.put(b"k", &[1u8; 101]),
        Err(KvError::InvalidArgument(_))
    ));
    assert_eq!(store.get(b"k").unwrap().len(), 100);
}

#[test]
fn test_entry_larger_than_sector_rejected() {
    let mut store = open(flash_small());

    assert!(matches!(
        store.put(b"big", &[0u8; 600]),
        Err(KvError::InvalidArgument(_))
    ));
    assert_eq!(store.transaction_id(), 0);
}

#[test]
fn test_key_limit() {
    let config = StoreConfig::builder().max_entries(2).build();
    let mut store = Store::open(flash_4k(), config).unwrap();

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    assert!(matches!(
        store.put(b"c", b"3"),
        Err(KvError::ResourceExhausted(_))
    ));

    // Updates of existing keys are still allowed
    store.put(b"a", b"11").unwrap();

    // A deleted key frees its slot
    store.delete(b"b").unwrap();
    store.put(b"c", b"3").unwrap();
    assert_eq!(sorted_keys(&store), vec![b"a".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_hash_collision_rejected() {
    // Distinct keys with identical CRC-32
    let mut store = open(flash_4k());
    store.put(b"plumless", b"1").unwrap();

    assert!(matches!(
        store.put(b"buckeroo", b"2"),
        Err(KvError::InvalidArgument(_))
    ));
    assert!(matches!(store.get(b"buckeroo"), Err(KvError::NotFound)));
    assert_eq!(store.get(b"plumless").unwrap(), b"1");
}

#[test]
fn test_partition_full() {
    // Three usable sectors of 15 entries, one kept in reserve
    let mut store = open(flash_small());

    let mut written = 0;
    let err = loop {
        match store.put(format!("k{:03}", written).as_bytes(), b"v") {
            Ok(()) => written += 1,
            Err(e) => break e,
        }
        assert!(written < 1000, "partition never filled up");
    };

    assert!(matches!(err, KvError::ResourceExhausted(_)));
    assert_eq!(written, 45);
    for i in 0..written {
        assert_eq!(store.get(format!("k{:03}", i).as_bytes()).unwrap(), b"v");
    }
}

// =============================================================================
// Enumeration and Introspection Tests
// =============================================================================

#[test]
fn test_keys_skips_deleted() {
    let mut store = open(flash_4k());
    store.put(b"c", b"3").unwrap();
    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.delete(b"b").unwrap();

    assert_eq!(sorted_keys(&store), vec![b"a".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_keys_order_is_stable() {
    let mut store = open(flash_4k());
    for i in 0..20 {
        store.put(format!("key{}", i).as_bytes(), b"v").unwrap();
    }

    let first: Vec<Vec<u8>> = store.keys().map(|k| k.to_vec()).collect();
    let second: Vec<Vec<u8>> = store.keys().map(|k| k.to_vec()).collect();

    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
}

#[test]
fn test_live_bytes_match_directory() {
    let mut store = open(flash_small());
    for round in 0..5 {
        for i in 0..6 {
            let value = format!("value-{}-{}", round, i);
            store.put(format!("k{}", i).as_bytes(), value.as_bytes()).unwrap();
        }
        store.delete(format!("k{}", round).as_bytes()).unwrap();

        assert_eq!(store.stats().live_bytes, expected_live_bytes(&store));
    }
}

#[test]
fn test_stats_after_writes() {
    let mut store = open(flash_small());
    store.put(b"a", b"1").unwrap(); // 32 bytes
    store.put(b"a", b"2").unwrap(); // supersedes the first
    store.put(b"b", b"3").unwrap();

    let stats = store.stats();

    assert_eq!(stats.key_count, 2);
    assert_eq!(stats.sector_count, 4);
    assert_eq!(stats.empty_sectors, 3);
    assert_eq!(stats.live_bytes, 64);
    assert_eq!(stats.stale_bytes, 32);
    // Every sector carries its header from the first open
    assert_eq!(stats.used_bytes, 4 * 16 + 96);
    assert_eq!(stats.free_bytes, 3 * 496 + (512 - 112));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_preserves_data() {
    let mut store = open(flash_4k());
    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.put(b"a", b"3").unwrap();
    store.delete(b"b").unwrap();

    let mut store = reopen(store);

    assert_eq!(store.get(b"a").unwrap(), b"3");
    assert!(matches!(store.get(b"b"), Err(KvError::NotFound)));
    assert_eq!(store.transaction_id(), 4);
    assert_eq!(store.last_recovery().entries_recovered, 4);
    assert_eq!(store.last_recovery().entries_corrupted, 0);
}

#[test]
fn test_reopen_continues_transaction_ids() {
    let mut store = open(flash_4k());
    store.put(b"a", b"1").unwrap();
    store.put(b"a", b"2").unwrap();

    let mut store = reopen(store);
    store.put(b"a", b"3").unwrap();

    assert_eq!(store.descriptor(b"a").unwrap().transaction_id, 3);

    let mut store = reopen(store);
    assert_eq!(store.get(b"a").unwrap(), b"3");
}

#[test]
fn test_reopen_continues_appending() {
    let mut store = open(flash_small());
    store.put(b"a", b"1").unwrap();
    let head = store.sector(0).unwrap().write_head;

    let mut store = reopen(store);
    assert_eq!(store.sector(0).unwrap().write_head, head);

    // Appends land after existing entries; a re-program would be rejected
    store.put(b"b", b"2").unwrap();
    assert_eq!(store.descriptor(b"b").unwrap().addresses, vec![head]);
}

#[test]
fn test_file_backed_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("kv.img");

    {
        let flash = FileFlash::create(&path, Geometry::new(1024, 4, 16)).unwrap();
        let mut store = Store::format(flash, StoreConfig::default()).unwrap();
        store.put(b"wifi/ssid", b"home").unwrap();
        store.put(b"wifi/pass", b"secret").unwrap();
        store.delete(b"wifi/pass").unwrap();
    }

    let flash = FileFlash::open(&path).unwrap();
    let mut store = Store::open(flash, StoreConfig::default()).unwrap();

    assert_eq!(store.get(b"wifi/ssid").unwrap(), b"home");
    assert!(!store.contains(b"wifi/pass"));
}

// =============================================================================
// Format and Configuration Tests
// =============================================================================

#[test]
fn test_format_erases_and_counts() {
    let mut store = Store::format(flash_small(), StoreConfig::default()).unwrap();
    for sector in store.sectors() {
        assert_eq!(sector.erase_count, 1);
    }
    store.put(b"a", b"1").unwrap();

    let store = Store::format(store.into_flash(), StoreConfig::default()).unwrap();

    assert!(store.is_empty());
    for sector in store.sectors() {
        assert_eq!(sector.erase_count, 2);
    }
    assert_eq!(store.flash().erase_counts(), &[2, 2, 2, 2]);
}

#[test]
fn test_invalid_config_rejected() {
    let too_redundant = StoreConfig::builder().redundancy(4).build();
    assert!(matches!(
        Store::open(flash_4k(), too_redundant),
        Err(KvError::Config(_))
    ));

    let no_keys = StoreConfig::builder().max_entries(0).build();
    assert!(matches!(
        Store::open(flash_4k(), no_keys),
        Err(KvError::Config(_))
    ));

    let huge_keys = StoreConfig::builder().max_key_len(256).build();
    assert!(matches!(
        Store::open(flash_4k(), huge_keys),
        Err(KvError::Config(_))
    ));
}

#[test]
fn test_sector_too_small_rejected() {
    let flash = MemoryFlash::with_sectors(32, 4, 16);

    assert!(matches!(
        Store::open(flash, StoreConfig::default()),
        Err(KvError::Config(_))
    ));
}

#[derive(Debug)]
struct Xor8;

impl ChecksumAlgorithm for Xor8 {
    fn width(&self) -> usize {
        1
    }

    fn compute(&self, data: &[u8]) -> u64 {
        data.iter().fold(0u8, |acc, &b| acc ^ b) as u64
    }
}

#[test]
fn test_custom_checksum() {
    let config = StoreConfig::builder().checksum(Xor8).build();
    let mut store = Store::open(flash_4k(), config.clone()).unwrap();
    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"22").unwrap();

    let mut store = Store::open(store.into_flash(), config).unwrap();

    assert_eq!(store.get(b"a").unwrap(), b"1");
    assert_eq!(store.get(b"b").unwrap(), b"22");
}

#[test]
fn test_store_over_borrowed_flash() {
    let mut flash = flash_4k();

    {
        let mut store = Store::open(&mut flash, StoreConfig::default()).unwrap();
        store.put(b"a", b"1").unwrap();
    }

    assert!(!sectorkv::flash::is_erased(&flash.read_sector(0).unwrap()));
    let mut store = open(flash);
    assert_eq!(store.get(b"a").unwrap(), b"1");
}
