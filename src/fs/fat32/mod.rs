//! The FAT32 filesystem engine.
//!
//! [`Fat32Filesystem`] is the façade: it owns the block I/O adapter and the
//! directory cache, and hands out [`Fat32Directory`] handles by path. The
//! submodules carry the engine proper: the adapter, the directory cluster
//! machinery, the filename engine, the cache and the file layer.

use alloc::string::String;

use log::{debug, info};

use crate::devices::block::SharedBlockDevice;
use crate::errors::FilesystemError;
use crate::fs::fat32::blockio::Fat32BlockIoAdapter;
use crate::fs::fat32::cluster::{DirectoryCluster, EntryAddress};
use crate::fs::fat32::dir_cache::{DirectoryCache, DirectoryCacheEntryType};
use crate::fs::fat32::directory::Fat32Directory;
use crate::fs::fat32::filenames::Compact8Dot3Filename;
use crate::fs::partitions::MassStoragePartition;
use crate::fs::{DirectoryEntry, EntryKind, FilesystemType};
use crate::path::FilesystemPath;
use crate::registry::ObjectUuid;
use crate::DEFAULT_DIRECTORY_CACHE_SIZE;

pub mod blockio;
pub mod bpb;
pub mod cluster;
pub mod datetime;
pub mod dir_cache;
pub mod directory;
pub mod file;
pub mod file_map;
pub mod filenames;

/// A 32-bit value naming one cluster of a FAT32 volume, or one of the
/// reserved marker values below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterIndex(pub u32);

/// FAT entry marker: the cluster is free.
pub const FAT32_ENTRY_FREE: ClusterIndex = ClusterIndex(0x0000_0000);

/// FAT entry marker: the cluster is defective and must not be used.
pub const FAT32_ENTRY_DEFECTIVE: ClusterIndex = ClusterIndex(0x0FFF_FFF7);

/// First of the media-descriptor marker values.
pub const FAT32_MEDIA_DESCRIPTOR: ClusterIndex = ClusterIndex(0x0FFF_FFF8);

/// FAT entries at or above this value terminate a chain.
pub const FAT32_ENTRY_EOF_THRESHOLD: ClusterIndex = ClusterIndex(0x0FFF_FFF8);

/// FAT entry marker: allocated and the last cluster of its chain.
pub const FAT32_ENTRY_ALLOCATED_AND_EOF: ClusterIndex = ClusterIndex(0x0FFF_FFFF);

/// Directory cache counters of one mounted filesystem.
#[derive(Debug, Clone, Copy)]
pub struct Fat32FilesystemStatistics {
    directory_cache_hits: u64,
    directory_cache_misses: u64,
    directory_cache_size: usize,
}

impl Fat32FilesystemStatistics {
    pub fn directory_cache_hits(&self) -> u64 {
        self.directory_cache_hits
    }

    pub fn directory_cache_misses(&self) -> u64 {
        self.directory_cache_misses
    }

    pub fn directory_cache_size(&self) -> usize {
        self.directory_cache_size
    }
}

/// A mounted FAT32 volume.
pub struct Fat32Filesystem {
    id: ObjectUuid,
    name: String,
    boot: bool,
    volume_label: String,

    pub(crate) block_io_adapter: Fat32BlockIoAdapter,
    pub(crate) directory_cache: DirectoryCache,
}

impl Fat32Filesystem {
    /// Mounts a FAT32 partition of `io_device`.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32NotAFat32Filesystem`] when the partition
    /// descriptor names another filesystem, plus the adapter's mount
    /// errors.
    pub fn mount(
        name: &str,
        boot: bool,
        io_device: SharedBlockDevice,
        partition: &MassStoragePartition,
    ) -> Result<Self, FilesystemError> {
        if partition.filesystem_type() != FilesystemType::Fat32 {
            debug!("partition {} is not FAT32", partition.name());
            return Err(FilesystemError::Fat32NotAFat32Filesystem);
        }

        let block_io_adapter = Fat32BlockIoAdapter::mount(io_device, partition.first_lba())?;

        info!(
            "mounted FAT32 filesystem {} with volume label {}",
            name,
            partition.name()
        );

        Ok(Self {
            id: ObjectUuid::generate(),
            name: String::from(name),
            boot,
            volume_label: String::from(partition.name()),
            block_io_adapter,
            directory_cache: DirectoryCache::new(DEFAULT_DIRECTORY_CACHE_SIZE),
        })
    }

    /// The filesystem's registry UUID.
    pub fn id(&self) -> ObjectUuid {
        self.id
    }

    /// The name the filesystem is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when the filesystem was mounted from the boot
    /// partition.
    pub fn is_boot(&self) -> bool {
        self.boot
    }

    /// The volume label found in the root directory.
    pub fn volume_label(&self) -> &str {
        &self.volume_label
    }

    /// The block I/O adapter of the volume.
    pub fn block_io_adapter(&self) -> &Fat32BlockIoAdapter {
        &self.block_io_adapter
    }

    /// A snapshot of the directory cache counters.
    pub fn statistics(&self) -> Fat32FilesystemStatistics {
        Fat32FilesystemStatistics {
            directory_cache_hits: self.directory_cache.hits(),
            directory_cache_misses: self.directory_cache.misses(),
            directory_cache_size: self.directory_cache.current_size(),
        }
    }

    /// Returns a handle onto the root directory.
    pub fn get_root_directory(&self) -> Fat32Directory {
        Fat32Directory::new(
            self.id,
            "/",
            EntryAddress::default(),
            self.block_io_adapter.root_directory_cluster(),
            Compact8Dot3Filename::new("/", ""),
        )
    }

    /// Resolves a directory by absolute path.
    ///
    /// The cache is consulted for the longest already-resolved prefix of
    /// the path; the remaining segments are walked on disk and each newly
    /// resolved prefix is inserted into the cache.
    ///
    /// # Errors
    ///
    /// The path parser's errors, and
    /// [`FilesystemError::DirectoryNotFound`] when a segment does not
    /// resolve.
    pub fn get_directory(&mut self, directory_path: &str) -> Result<Fat32Directory, FilesystemError> {
        let parsed_path = FilesystemPath::parse(directory_path)?;

        if parsed_path.is_root() {
            return Ok(self.get_root_directory());
        }

        if let Some(cached) = self.directory_cache.find_entry(parsed_path.full_path()) {
            debug!("found directory in cache: {directory_path}");

            return Ok(Fat32Directory::new(
                self.id,
                parsed_path.full_path(),
                cached.entry_address(),
                cached.first_cluster(),
                *cached.compact_name(),
            ));
        }

        let directory_entry = self.find_directory_entry(&parsed_path)?;

        Ok(Fat32Directory::new(
            self.id,
            parsed_path.full_path(),
            directory_entry.entry_address(),
            directory_entry.first_cluster(),
            *directory_entry.cluster_entry().compact_name(),
        ))
    }

    //  Walks a parsed path down to its final segment. The walk starts at
    //  the longest prefix of the path already present in the cache (the
    //  whole path was checked by the caller), or the root directory when
    //  no prefix is cached, and caches every prefix it resolves on the
    //  way down.
    fn find_directory_entry(
        &mut self,
        parsed_path: &FilesystemPath,
    ) -> Result<DirectoryEntry, FilesystemError> {
        let segments = parsed_path.segments();

        let mut starting_cluster = ClusterIndex(0);
        let mut start_segment = 0usize;

        for count in (1..segments.len()).rev() {
            let prefix = parsed_path.prefix(count);

            if let Some(first_cluster) = self.directory_cache.find_first_cluster(&prefix) {
                starting_cluster = first_cluster;
                start_segment = count;
                break;
            }
        }

        let mut absolute_path = parsed_path.prefix(start_segment);

        let first_cluster = if starting_cluster == ClusterIndex(0) {
            self.block_io_adapter.root_directory_cluster()
        } else {
            starting_cluster
        };

        let mut current_directory =
            DirectoryCluster::new(self.id, &mut self.block_io_adapter, first_cluster);

        for (segment_index, segment) in segments.iter().enumerate().skip(start_segment) {
            let entry = {
                let mut found = current_directory
                    .find_directory_entry(EntryKind::DIRECTORY, Some(segment.as_str()))?;

                if found.is_end() {
                    debug!("could not find subdirectory entry: {segment}");
                    return Err(FilesystemError::DirectoryNotFound);
                }

                found.as_directory_entry()?
            };

            absolute_path.push('/');
            absolute_path.push_str(segment);

            self.directory_cache.add_entry(
                DirectoryCacheEntryType::Directory,
                entry.entry_address(),
                entry.first_cluster(),
                *entry.cluster_entry().compact_name(),
                &absolute_path,
            );

            if segment_index == segments.len() - 1 {
                return Ok(entry);
            }

            current_directory.move_to_directory(entry.first_cluster());
        }

        Err(FilesystemError::DirectoryNotFound)
    }
}
