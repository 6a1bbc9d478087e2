//! Filesystem support for CinderOS.
//!
//! The `fat32` module carries the FAT32 engine itself; this module holds the
//! filesystem-independent surface: open modes, directory-entry kinds, the
//! directory-entry model handed to callers, the directory visitor contract
//! and the mount-everything entry point used during boot.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use log::{error, info};

use crate::devices::block::SharedBlockDevice;
use crate::errors::FilesystemError;
use crate::fs::fat32::cluster::{DirectoryClusterEntry, EntryAddress};
use crate::fs::fat32::{ClusterIndex, Fat32Filesystem};
use crate::fs::partitions::discover_partitions;
use crate::registry::{self, ObjectUuid, SharedFilesystem};

pub mod fat32;
pub mod partitions;

/// Filesystems recognized by the partition scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemType {
    Fat32,
    Unknown,
}

bitflags! {
    /// Open modes for files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const READ = 1;
        const APPEND = 2;
        const WRITE = 4;
        const CREATE = 8;
    }
}

impl FileMode {
    /// Read and write access.
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);

    /// Read, write and append access.
    pub const READ_WRITE_APPEND: Self = Self::READ_WRITE.union(Self::APPEND);

    /// Read, write and append access, creating the file when missing.
    pub const READ_WRITE_APPEND_CREATE: Self = Self::READ_WRITE_APPEND.union(Self::CREATE);
}

bitflags! {
    /// Kinds of directory entries, usable as a search filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryKind: u32 {
        const VOLUME_INFORMATION = 1;
        const DIRECTORY = 2;
        const FILE = 4;
    }
}

/// Filesystem-specific payload of a [`DirectoryEntry`].
///
/// Each filesystem arm carries whatever it needs to find the entry again;
/// the FAT32 arm keeps the entry's slot address, the volume's root cluster
/// (needed to resolve `..` entries that store zero) and a copy of the
/// on-disk record.
#[derive(Debug, Clone)]
pub enum DirectoryEntryInfo {
    Fat32 {
        entry_address: EntryAddress,
        root_directory_cluster: ClusterIndex,
        cluster_entry: DirectoryClusterEntry,
    },
}

/// A directory entry as surfaced to callers.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    filesystem_uuid: ObjectUuid,
    kind: EntryKind,
    name: String,
    extension: String,
    attributes: u8,
    size: u32,
    info: DirectoryEntryInfo,
}

impl DirectoryEntry {
    pub(crate) fn new(
        filesystem_uuid: ObjectUuid,
        kind: EntryKind,
        name: String,
        extension: String,
        attributes: u8,
        size: u32,
        info: DirectoryEntryInfo,
    ) -> Self {
        Self {
            filesystem_uuid,
            kind,
            name,
            extension,
            attributes,
            size,
            info,
        }
    }

    /// UUID of the filesystem the entry belongs to.
    pub fn filesystem_uuid(&self) -> ObjectUuid {
        self.filesystem_uuid
    }

    /// The kind of object the entry names.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The entry's name: the reassembled long filename when one exists,
    /// otherwise the compact 8.3 name (or the volume label for the
    /// volume-information entry).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The extension component of the name, empty when there is none.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The raw FAT attribute byte.
    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    /// Size in bytes; zero for directories.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns `true` when the entry names a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::DIRECTORY
    }

    /// The filesystem-specific payload.
    pub fn info(&self) -> &DirectoryEntryInfo {
        &self.info
    }

    /// The address of the entry's 32-byte slot.
    pub fn entry_address(&self) -> EntryAddress {
        match &self.info {
            DirectoryEntryInfo::Fat32 { entry_address, .. } => *entry_address,
        }
    }

    /// The first cluster of the object the entry names, with the `..`
    /// stored-zero convention resolved.
    pub fn first_cluster(&self) -> ClusterIndex {
        match &self.info {
            DirectoryEntryInfo::Fat32 {
                root_directory_cluster,
                cluster_entry,
                ..
            } => cluster_entry.first_cluster(*root_directory_cluster),
        }
    }

    /// A copy of the on-disk 32-byte record.
    pub fn cluster_entry(&self) -> &DirectoryClusterEntry {
        match &self.info {
            DirectoryEntryInfo::Fat32 { cluster_entry, .. } => cluster_entry,
        }
    }

    pub(crate) fn update_size(&mut self, new_size: u32) {
        self.size = new_size;
    }
}

/// Return value of a directory visitor callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Stop the enumeration.
    Finished,

    /// Continue with the next entry.
    Next,
}

/// Enumerates the partitions of a mass-storage device and mounts every
/// FAT32 volume found, registering each in the entity registry.
///
/// Failures of individual partitions are logged and skipped; the call
/// fails only when the partition table itself cannot be used.
///
/// # Errors
///
/// The master-boot-record errors from
/// [`discover_partitions`](crate::fs::partitions::discover_partitions).
pub fn mount_mass_storage_filesystems(
    device: &SharedBlockDevice,
) -> Result<Vec<ObjectUuid>, FilesystemError> {
    let partitions = discover_partitions(device, false)?;

    let mut mounted = Vec::new();

    for partition in partitions {
        let filesystem = match Fat32Filesystem::mount(
            partition.name(),
            partition.is_boot(),
            device.clone(),
            &partition,
        ) {
            Ok(filesystem) => filesystem,
            Err(code) => {
                error!("unable to mount partition {}: {}", partition.name(), code);
                continue;
            }
        };

        info!(
            "mounted FAT32 volume {} ({} sectors at LBA {})",
            partition.name(),
            partition.total_sectors(),
            partition.first_lba()
        );

        mounted.push(registry::register_filesystem(filesystem));
    }

    Ok(mounted)
}

/// Mounts every FAT32 volume of a mass-storage device registered in the
/// entity registry, resolved by its device name.
///
/// This is the boot-time entry point: the storage driver registers its
/// device and the kernel mounts everything it carries by name. Callers
/// already holding the device handle can use
/// [`mount_mass_storage_filesystems`] directly.
///
/// # Errors
///
/// [`FilesystemError::BlockDeviceDoesNotExist`] when no device is
/// registered under `device_name`, plus the partition-table errors of
/// [`mount_mass_storage_filesystems`].
pub fn mount_block_device_filesystems(
    device_name: &str,
) -> Result<Vec<ObjectUuid>, FilesystemError> {
    let device = registry::find_block_device(device_name)
        .ok_or(FilesystemError::BlockDeviceDoesNotExist)?;

    mount_mass_storage_filesystems(&device)
}

/// Returns the filesystem mounted from the boot partition.
///
/// # Errors
///
/// [`FilesystemError::UnableToFindBootFilesystem`] when none is registered.
pub fn boot_filesystem() -> Result<SharedFilesystem, FilesystemError> {
    registry::find_boot_filesystem().ok_or(FilesystemError::UnableToFindBootFilesystem)
}
