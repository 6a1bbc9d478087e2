#![allow(dead_code)]
//! Test support: freshly-materialized FAT32 volumes.
//!
//! Each test builds its own image in a RAM disk instead of sharing a
//! reference binary: a master boot record with a single FAT32 partition,
//! the partition's BIOS Parameter Block, a seeded FAT and a root directory
//! holding the volume-information entry.

use std::sync::Arc;
use std::vec::Vec;

use cinderfs::devices::block::SharedBlockDevice;
use cinderfs::devices::RamDisk;
use cinderfs::registry::{self, ObjectUuid, SharedFilesystem};

/// Geometry of the generated test volumes.
pub const BLOCK_SIZE: usize = 512;
pub const PARTITION_FIRST_LBA: u32 = 2048;
pub const RESERVED_SECTORS: u32 = 32;
pub const SECTORS_PER_FAT: u32 = 16;
pub const SECTORS_PER_CLUSTER: u32 = 1;
pub const ROOT_DIRECTORY_CLUSTER: u32 = 2;
pub const PARTITION_SECTORS: u32 = 6144;

/// First sector of the FAT, relative to the device.
pub const FAT_FIRST_LBA: u32 = PARTITION_FIRST_LBA + RESERVED_SECTORS;

/// First sector of the data region (cluster 2), relative to the device.
pub const DATA_FIRST_LBA: u32 = FAT_FIRST_LBA + SECTORS_PER_FAT;

const FAT_ENTRY_ALLOCATED_AND_EOF: u32 = 0x0FFF_FFFF;
const FAT_ENTRY_MEDIA_DESCRIPTOR: u32 = 0x0FFF_FFF8;

/// A RAM disk kept at its concrete type so tests can reach the error
/// injection hooks and snapshot the raw image.
pub type SharedRamDisk = Arc<spin::Mutex<RamDisk>>;

/// Coerces a RAM disk into the block-device capability the engine
/// consumes.
pub fn shared(disk: &SharedRamDisk) -> SharedBlockDevice {
    disk.clone()
}

/// Builds a complete device image: MBR plus one FAT32 partition labelled
/// `volume_label`.
pub fn build_device_image(volume_label: &str) -> Vec<u8> {
    let device_blocks = PARTITION_FIRST_LBA + PARTITION_SECTORS;
    let mut image = vec![0u8; device_blocks as usize * BLOCK_SIZE];

    write_master_boot_record(&mut image);
    write_bios_parameter_block(&mut image, volume_label);
    write_fat_seed(&mut image);
    write_volume_label_entry(&mut image, volume_label);

    image
}

/// Builds the image and wraps it in a RAM disk.
pub fn ramdisk_with_volume(device_name: &str, volume_label: &str) -> SharedRamDisk {
    let image = build_device_image(volume_label);

    Arc::new(spin::Mutex::new(RamDisk::from_image(device_name, &image)))
}

/// Builds, mounts and registers a fresh volume, returning the device and
/// the filesystem's registry UUID.
pub fn mount_fresh_volume(device_name: &str, volume_label: &str) -> (SharedRamDisk, ObjectUuid) {
    let disk = ramdisk_with_volume(device_name, volume_label);

    let mounted = cinderfs::fs::mount_mass_storage_filesystems(&shared(&disk))
        .expect("partition scan failed");

    assert_eq!(mounted.len(), 1, "expected exactly one mounted volume");

    (disk, mounted[0])
}

/// Resolves a filesystem registered by [`mount_fresh_volume`].
pub fn filesystem(uuid: ObjectUuid) -> SharedFilesystem {
    registry::find_filesystem(uuid).expect("filesystem is not registered")
}

/// Snapshot of the full device image.
pub fn device_image(disk: &SharedRamDisk) -> Vec<u8> {
    disk.lock().image()
}

/// Snapshot of the FAT region of the device image.
pub fn fat_region(disk: &SharedRamDisk) -> Vec<u8> {
    let image = disk.lock().image();

    let start = FAT_FIRST_LBA as usize * BLOCK_SIZE;
    let end = start + SECTORS_PER_FAT as usize * BLOCK_SIZE;

    image[start..end].to_vec()
}

/// Raw bytes of a data cluster.
pub fn cluster_bytes(disk: &SharedRamDisk, cluster: u32) -> Vec<u8> {
    let image = disk.lock().image();

    let start = (DATA_FIRST_LBA + (cluster - 2) * SECTORS_PER_CLUSTER) as usize * BLOCK_SIZE;
    let end = start + (SECTORS_PER_CLUSTER as usize) * BLOCK_SIZE;

    image[start..end].to_vec()
}

fn write_master_boot_record(image: &mut [u8]) {
    let entry_offset = 0x1BE;

    image[entry_offset] = 0x00; // formatting tools leave the status zero
    image[entry_offset + 4] = 0x0C; // FAT32 LBA
    image[entry_offset + 8..entry_offset + 12]
        .copy_from_slice(&PARTITION_FIRST_LBA.to_le_bytes());
    image[entry_offset + 12..entry_offset + 16]
        .copy_from_slice(&PARTITION_SECTORS.to_le_bytes());

    image[510] = 0x55;
    image[511] = 0xAA;
}

fn write_bios_parameter_block(image: &mut [u8], volume_label: &str) {
    let base = PARTITION_FIRST_LBA as usize * BLOCK_SIZE;
    let sector = &mut image[base..base + BLOCK_SIZE];

    sector[0] = 0xEB;
    sector[1] = 0x58;
    sector[2] = 0x90;
    sector[3..11].copy_from_slice(b"CINDEROS");

    sector[11..13].copy_from_slice(&(BLOCK_SIZE as u16).to_le_bytes());
    sector[13] = SECTORS_PER_CLUSTER as u8;
    sector[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
    sector[16] = 1; // one FAT
    sector[21] = 0xF8; // media descriptor
    sector[32..36].copy_from_slice(&PARTITION_SECTORS.to_le_bytes());
    sector[36..40].copy_from_slice(&SECTORS_PER_FAT.to_le_bytes());
    sector[44..48].copy_from_slice(&ROOT_DIRECTORY_CLUSTER.to_le_bytes());
    sector[48..50].copy_from_slice(&1u16.to_le_bytes()); // FSINFO sector
    sector[66] = 0x29;

    let mut label = [b' '; 11];
    for (slot, byte) in label.iter_mut().zip(volume_label.bytes()) {
        *slot = byte;
    }
    sector[71..82].copy_from_slice(&label);
    sector[82..90].copy_from_slice(b"FAT32   ");

    sector[510] = 0x55;
    sector[511] = 0xAA;
}

fn write_fat_seed(image: &mut [u8]) {
    let fat_base = FAT_FIRST_LBA as usize * BLOCK_SIZE;

    let seed = [
        FAT_ENTRY_MEDIA_DESCRIPTOR,
        FAT_ENTRY_ALLOCATED_AND_EOF,
        FAT_ENTRY_ALLOCATED_AND_EOF, // the root directory cluster
    ];

    for (index, value) in seed.iter().enumerate() {
        image[fat_base + index * 4..fat_base + index * 4 + 4]
            .copy_from_slice(&value.to_le_bytes());
    }
}

fn write_volume_label_entry(image: &mut [u8], volume_label: &str) {
    //  Cluster 2 is the first data cluster, holding the root directory

    let root_base = DATA_FIRST_LBA as usize * BLOCK_SIZE;

    let mut label = [b' '; 11];
    for (slot, byte) in label.iter_mut().zip(volume_label.bytes()) {
        *slot = byte;
    }

    image[root_base..root_base + 11].copy_from_slice(&label);
    image[root_base + 11] = 0x08; // volume-id attribute
}
