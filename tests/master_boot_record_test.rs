//! Partition scanner tests against freshly-materialized device images.

mod common;

use cinderfs::devices::block::BlockDevice;
use cinderfs::errors::FilesystemError;
use cinderfs::fs::partitions::discover_partitions;
use cinderfs::fs::FilesystemType;

#[test]
fn discovers_the_fat32_partition_and_its_volume_label() {
    let disk = common::ramdisk_with_volume("mbr-disk-0", "MBRVOL");

    let partitions = discover_partitions(&common::shared(&disk), false).unwrap();

    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].name(), "MBRVOL");
    assert_eq!(partitions[0].filesystem_type(), FilesystemType::Fat32);
    assert_eq!(partitions[0].first_lba(), common::PARTITION_FIRST_LBA);
    assert_eq!(partitions[0].total_sectors(), common::PARTITION_SECTORS);
    assert!(partitions[0].is_boot());
}

#[test]
fn rejects_a_bad_boot_signature() {
    let disk = common::ramdisk_with_volume("mbr-disk-1", "MBRVOL1");

    {
        let mut guard = disk.lock();

        let mut sector = vec![0u8; common::BLOCK_SIZE];
        guard.read_blocks(&mut sector, 0, 1).unwrap();

        sector[510] = 0x00;
        sector[511] = 0x00;

        guard.write_blocks(&sector, 0, 1).unwrap();
    }

    assert_eq!(
        discover_partitions(&common::shared(&disk), false).unwrap_err(),
        FilesystemError::BadMasterBootRecordMagicNumber
    );
}

#[test]
fn surfaces_device_read_failures() {
    let disk = common::ramdisk_with_volume("mbr-disk-2", "MBRVOL2");

    disk.lock().simulate_read_error(0);

    assert_eq!(
        discover_partitions(&common::shared(&disk), false).unwrap_err(),
        FilesystemError::UnableToReadMasterBootRecord
    );
}

#[test]
fn the_inactive_status_byte_is_accepted_by_default() {
    //  Formatting tools leave the active flag zero; the scanner keys off
    //  the type byte unless told otherwise.

    let disk = common::ramdisk_with_volume("mbr-disk-3", "MBRVOL3");

    let default_scan = discover_partitions(&common::shared(&disk), false).unwrap();
    assert_eq!(default_scan.len(), 1);

    let strict_scan = discover_partitions(&common::shared(&disk), true).unwrap();
    assert!(strict_scan.is_empty());
}

#[test]
fn partitions_of_other_types_are_skipped() {
    let disk = common::ramdisk_with_volume("mbr-disk-4", "MBRVOL4");

    {
        let mut guard = disk.lock();

        let mut sector = vec![0u8; common::BLOCK_SIZE];
        guard.read_blocks(&mut sector, 0, 1).unwrap();

        sector[0x1BE + 4] = 0x83; // Linux native

        guard.write_blocks(&sector, 0, 1).unwrap();
    }

    let partitions = discover_partitions(&common::shared(&disk), false).unwrap();
    assert!(partitions.is_empty());
}

#[test]
fn a_partition_without_a_volume_label_is_skipped() {
    let disk = common::ramdisk_with_volume("mbr-disk-5", "MBRVOL5");

    {
        //  Scrub the volume-information entry from the root directory

        let mut guard = disk.lock();

        let mut sector = vec![0u8; common::BLOCK_SIZE];
        guard
            .read_blocks(&mut sector, common::DATA_FIRST_LBA, 1)
            .unwrap();

        sector[..32].fill(0);

        guard
            .write_blocks(&sector, common::DATA_FIRST_LBA, 1)
            .unwrap();
    }

    let partitions = discover_partitions(&common::shared(&disk), false).unwrap();
    assert!(partitions.is_empty());
}
