//! MBR (Master Boot Record) partition table handling.
//!
//! Legacy structure used to store partition information on mass-storage
//! devices, stored on the first logical block of the drive. It limits the
//! number of partitions to 4 and the partition size to 2 Terabytes.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, error};

use crate::devices::block::SharedBlockDevice;
use crate::errors::FilesystemError;
use crate::fs::fat32::blockio::Fat32BlockIoAdapter;
use crate::fs::fat32::cluster::DirectoryCluster;
use crate::fs::partitions::MassStoragePartition;
use crate::fs::{EntryKind, FilesystemType};
use crate::registry::ObjectUuid;
use crate::MAX_PARTITIONS_ON_MASS_STORAGE_DEVICE;

/// Offset of the partition table in the Master Boot Record.
const MBR_PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// Boot signature closing the Master Boot Record, at byte offset 510.
const MBR_BOOT_SIGNATURE: u16 = 0xAA55;

/// Partition type byte announcing a FAT32 volume addressed by LBA.
const MBR_PARTITION_FILESYSTEM_FAT32_LBA_TYPE: u8 = 0x0C;

/// A Master Boot Record partition entry.
///
/// All related methods use LBA instead of the legacy CHS addressing; the
/// CHS fields are carried only to keep the record bit-exact.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MbrPartitionEntry {
    attributes: u8,
    chs_start: [u8; 3],
    partition_type: u8,
    chs_last: [u8; 3],
    lba_start: u32,
    sectors_count: u32,
}

const _: () = assert!(core::mem::size_of::<MbrPartitionEntry>() == 16);

impl MbrPartitionEntry {
    /// Checks if this partition is active (bootable). At most one
    /// partition of a table should be active.
    pub fn is_active(&self) -> bool {
        (0x80..0x8F).contains(&self.attributes)
    }

    /// Checks if this partition entry is in use.
    pub fn is_used(&self) -> bool {
        self.partition_type != 0
    }

    /// Returns this partition's starting LBA.
    pub fn start_lba(&self) -> u32 {
        self.lba_start
    }

    /// Returns this partition's length in sectors.
    pub fn sectors_count(&self) -> u32 {
        self.sectors_count
    }

    /// Returns the raw partition type byte.
    pub fn partition_type(&self) -> u8 {
        self.partition_type
    }

    /// Maps the partition type byte onto the filesystem it announces.
    pub fn filesystem_type(&self) -> FilesystemType {
        match self.partition_type {
            MBR_PARTITION_FILESYSTEM_FAT32_LBA_TYPE => FilesystemType::Fat32,
            _ => FilesystemType::Unknown,
        }
    }
}

/// The four-entry partition table of a Master Boot Record.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct MbrPartitionTable {
    partitions: [MbrPartitionEntry; MAX_PARTITIONS_ON_MASS_STORAGE_DEVICE],
}

impl MbrPartitionTable {
    /// Returns the partition entries of this table.
    pub fn entries(&self) -> [MbrPartitionEntry; MAX_PARTITIONS_ON_MASS_STORAGE_DEVICE] {
        self.partitions
    }
}

/// Decodes a Master Boot Record sector into its partition table.
///
/// # Errors
///
/// [`FilesystemError::BadMasterBootRecordMagicNumber`] when the boot
/// signature is missing.
pub fn decode_master_boot_record(sector: &[u8]) -> Result<MbrPartitionTable, FilesystemError> {
    if sector.len() < 512 {
        return Err(FilesystemError::BadMasterBootRecordMagicNumber);
    }

    let boot_signature = u16::from_le_bytes([sector[510], sector[511]]);

    if boot_signature != MBR_BOOT_SIGNATURE {
        return Err(FilesystemError::BadMasterBootRecordMagicNumber);
    }

    Ok(bytemuck::pod_read_unaligned(
        &sector[MBR_PARTITION_TABLE_OFFSET
            ..MBR_PARTITION_TABLE_OFFSET + core::mem::size_of::<MbrPartitionTable>()],
    ))
}

/// Enumerates the FAT32 partitions of a mass-storage device.
///
/// Partitions are accepted on their type byte alone; the active-partition
/// flag is frequently left zero by formatting tools, so filtering on it is
/// opt-in via `require_active_flag`. Each accepted partition is named
/// after the volume label found in its root directory; a partition without
/// a volume-information entry is skipped. The first accepted partition is
/// marked as the boot partition.
///
/// # Errors
///
/// [`FilesystemError::UnableToReadMasterBootRecord`] when sector zero
/// cannot be read, [`FilesystemError::BadMasterBootRecordMagicNumber`] for
/// a bad signature, plus the adapter mount errors of a malformed FAT32
/// partition.
pub fn discover_partitions(
    device: &SharedBlockDevice,
    require_active_flag: bool,
) -> Result<Vec<MassStoragePartition>, FilesystemError> {
    let sector = {
        let mut device_guard = device.lock();

        let mut sector = vec![0u8; device_guard.block_size() as usize];

        if device_guard.read_blocks(&mut sector, 0, 1).is_err() {
            error!(
                "unable to read the master boot record from device {}",
                device_guard.name()
            );
            return Err(FilesystemError::UnableToReadMasterBootRecord);
        }

        sector
    };

    let partition_table = decode_master_boot_record(&sector)?;

    let mut partitions = Vec::new();

    for entry in partition_table.entries() {
        if require_active_flag && !entry.is_active() {
            continue;
        }

        if entry.filesystem_type() != FilesystemType::Fat32 {
            continue;
        }

        //  A short-lived adapter on the candidate volume resolves its
        //  label from the volume-information entry in the root directory.

        let mut adapter = Fat32BlockIoAdapter::mount(device.clone(), entry.start_lba())?;
        let root_directory_cluster = adapter.root_directory_cluster();

        let volume_label = {
            let directory_cluster = DirectoryCluster::new(
                ObjectUuid::NIL,
                &mut adapter,
                root_directory_cluster,
            );

            let mut found =
                directory_cluster.find_directory_entry(EntryKind::VOLUME_INFORMATION, None)?;

            if found.is_end() {
                None
            } else {
                Some(String::from(found.as_directory_entry()?.name()))
            }
        };

        let volume_label = match volume_label {
            Some(volume_label) => volume_label,
            None => {
                debug!(
                    "skipping FAT32 partition at LBA {} without a volume label",
                    entry.start_lba()
                );
                continue;
            }
        };

        //  The first accepted partition is the boot partition

        let boot = partitions.is_empty();

        partitions.push(MassStoragePartition::new(
            volume_label,
            FilesystemType::Fat32,
            boot,
            entry.start_lba(),
            entry.sectors_count(),
        ));
    }

    Ok(partitions)
}
