//! Tests for the Flash Partition layer
//!
//! These tests verify:
//! - Write-once semantics (bits can only be cleared until erased)
//! - Alignment and range checks
//! - Erase resets a single sector
//! - Fault injection (failed reads/writes/erases, torn writes, bad sectors)
//! - File-backed partitions persist data and geometry

use sectorkv::flash::{is_erased, FileFlash, FlashPartition, Geometry, MemoryFlash, PartitionDescriptor};
use sectorkv::FlashError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_flash() -> MemoryFlash {
    MemoryFlash::with_sectors(256, 4, 16)
}

// =============================================================================
// Geometry Tests
// =============================================================================

#[test]
fn test_geometry_addresses() {
    let geometry = Geometry::new(4096, 4, 16);

    assert_eq!(geometry.partition_size(), 16384);
    assert_eq!(geometry.sector_address(2), 8192);
    assert_eq!(geometry.sector_of(8191), 1);
    assert_eq!(geometry.sector_of(8192), 2);
    assert_eq!(geometry.align_up(17), 32);
    assert_eq!(geometry.align_up(32), 32);
}

#[test]
fn test_geometry_validity() {
    assert!(Geometry::new(4096, 4, 16).is_valid());
    assert!(!Geometry::new(4096, 0, 16).is_valid());
    assert!(!Geometry::new(4096, 4, 12).is_valid()); // not a power of two
    assert!(!Geometry::new(100, 4, 16).is_valid()); // sector not a multiple
}

// =============================================================================
// Write-Once Contract Tests
// =============================================================================

#[test]
fn test_fresh_partition_is_erased() {
    let flash = small_flash();
    assert!(is_erased(flash.as_bytes()));
}

#[test]
fn test_write_then_read() {
    let mut flash = small_flash();
    let data = [0xA5u8; 16];

    flash.write(32, &data).unwrap();

    let read = flash.read_vec(32, 16).unwrap();
    assert_eq!(read, data);
}

#[test]
fn test_write_may_clear_more_bits() {
    let mut flash = small_flash();

    flash.write(0, &[0xF0u8; 16]).unwrap();
    flash.write(0, &[0x30u8; 16]).unwrap();

    assert_eq!(flash.read_vec(0, 16).unwrap(), vec![0x30u8; 16]);
}

#[test]
fn test_write_setting_bits_is_rejected() {
    let mut flash = small_flash();
    flash.write(0, &[0x00u8; 16]).unwrap();

    let result = flash.write(0, &[0x01u8; 16]);

    assert!(matches!(result, Err(FlashError::ProgramConflict { address: 0 })));
    // A rejected write leaves flash untouched
    assert_eq!(flash.read_vec(0, 16).unwrap(), vec![0x00u8; 16]);
}

#[test]
fn test_misaligned_write_is_rejected() {
    let mut flash = small_flash();

    assert!(matches!(
        flash.write(8, &[0u8; 16]),
        Err(FlashError::Misaligned { .. })
    ));
    assert!(matches!(
        flash.write(0, &[0u8; 10]),
        Err(FlashError::Misaligned { .. })
    ));
}

#[test]
fn test_out_of_range_access() {
    let mut flash = small_flash();
    let mut buf = [0u8; 32];

    assert!(matches!(
        flash.read(1008, &mut buf),
        Err(FlashError::OutOfRange { .. })
    ));
    assert!(matches!(
        flash.write(1024, &[0u8; 16]),
        Err(FlashError::OutOfRange { .. })
    ));
    assert!(matches!(flash.erase(4), Err(FlashError::InvalidSector(4))));
}

#[test]
fn test_erase_resets_only_its_sector() {
    let mut flash = small_flash();
    flash.write(0, &[0u8; 16]).unwrap();
    flash.write(256, &[0u8; 16]).unwrap();

    flash.erase(0).unwrap();

    assert!(is_erased(&flash.read_sector(0).unwrap()));
    assert_eq!(flash.read_vec(256, 16).unwrap(), vec![0u8; 16]);
    assert_eq!(flash.erase_count(0), 1);
    assert_eq!(flash.erase_count(1), 0);

    // Re-programming is legal again after the erase
    flash.write(0, &[0x12u8; 16]).unwrap();
}

// =============================================================================
// Fault Injection Tests
// =============================================================================

#[test]
fn test_injected_failures_are_consumed() {
    let mut flash = small_flash();
    flash.fail_next_writes(1);
    flash.fail_next_reads(1);
    flash.fail_next_erases(1);

    assert!(matches!(flash.write(0, &[0u8; 16]), Err(FlashError::Device(_))));
    assert!(flash.write(0, &[0u8; 16]).is_ok());

    assert!(flash.read_vec(0, 16).is_err());
    assert!(flash.read_vec(0, 16).is_ok());

    assert!(flash.erase(0).is_err());
    assert!(flash.erase(0).is_ok());
}

#[test]
fn test_torn_write_programs_prefix() {
    let mut flash = small_flash();
    flash.tear_next_write(16);

    let result = flash.write(0, &[0u8; 48]);

    assert!(matches!(result, Err(FlashError::Device(_))));
    assert_eq!(flash.read_vec(0, 16).unwrap(), vec![0u8; 16]);
    assert!(is_erased(&flash.read_vec(16, 32).unwrap()));
}

#[test]
fn test_bad_sector_rejects_writes_and_erases() {
    let mut flash = small_flash();
    flash.mark_bad_sector(2);

    assert!(flash.write(512, &[0u8; 16]).is_err());
    assert!(flash.erase(2).is_err());
    assert!(flash.write(0, &[0u8; 16]).is_ok());

    flash.clear_faults();
    assert!(flash.erase(2).is_ok());
}

#[test]
fn test_corrupt_byte_bypasses_program_rules() {
    let mut flash = small_flash();
    flash.write(0, &[0u8; 16]).unwrap();

    flash.corrupt_byte(3, 0x80);

    assert_eq!(flash.read_vec(3, 1).unwrap(), vec![0x80]);
}

// =============================================================================
// File Flash Tests
// =============================================================================

#[test]
fn test_file_flash_create_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flash.img");
    let geometry = Geometry::new(512, 4, 16);

    {
        let mut flash = FileFlash::create(&path, geometry).unwrap();
        assert_eq!(flash.geometry(), geometry);
        assert!(is_erased(&flash.read_sector(3).unwrap()));
        flash.write(512, &[0x42u8; 16]).unwrap();
    }

    assert!(PartitionDescriptor::path_for(&path).exists());

    let mut flash = FileFlash::open(&path).unwrap();
    assert_eq!(flash.geometry(), geometry);
    assert_eq!(flash.read_vec(512, 16).unwrap(), vec![0x42u8; 16]);
}

#[test]
fn test_file_flash_enforces_write_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flash.img");
    let mut flash = FileFlash::create(&path, Geometry::new(512, 2, 16)).unwrap();

    flash.write(0, &[0x00u8; 16]).unwrap();
    assert!(matches!(
        flash.write(0, &[0xFFu8; 16]),
        Err(FlashError::ProgramConflict { .. })
    ));

    flash.erase(0).unwrap();
    flash.write(0, &[0x11u8; 16]).unwrap();
    assert_eq!(flash.read_vec(0, 16).unwrap(), vec![0x11u8; 16]);
}

#[test]
fn test_file_flash_open_missing_descriptor() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.img");

    assert!(FileFlash::open(&path).is_err());
}
