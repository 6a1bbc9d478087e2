#![cfg_attr(not(test), no_std)]
//! The CinderOS filesystem engine.
//!
//! Implements the FAT32 filesystem of the CinderOS bare-metal Raspberry Pi
//! project: mounting FAT32 partitions exposed by a block device, parsing
//! and maintaining the on-disk structures (BIOS Parameter Block, File
//! Allocation Table, directory clusters, long filename sequences, 8.3
//! short names) and the directory and file operations on top, with
//! crash-safe ordering of writes.
//!
//! The engine consumes only the block-device capability in
//! [`devices::block`]; device drivers, the kernel boot path and the
//! console live elsewhere in the project. Mounted filesystems and
//! registered devices are looked up through the [`registry`], and handles
//! hold UUIDs rather than references so removal is always observable.

extern crate alloc;

pub mod devices;
pub mod errors;
pub mod fs;
pub mod path;
pub mod registry;

/// Longest accepted long filename, in characters.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Longest extension tracked for a directory entry, in characters.
pub const MAX_FILE_EXTENSION_LENGTH: usize = 32;

/// Longest accepted absolute path, in bytes.
pub const MAX_FILESYSTEM_PATH_LENGTH: usize = 4096;

/// Partition entries in a Master Boot Record.
pub const MAX_PARTITIONS_ON_MASS_STORAGE_DEVICE: usize = 4;

/// Default bound of a filesystem's directory cache.
pub const DEFAULT_DIRECTORY_CACHE_SIZE: usize = 64;

/// Window size used by the short-filename numeric-tail search.
pub const MAX_FAT32_SHORT_FILENAME_SEARCH_TABLE_SIZE: usize = 64;
