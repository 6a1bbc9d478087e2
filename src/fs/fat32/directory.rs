//! The FAT32 directory object.
//!
//! A [`Fat32Directory`] is a lightweight handle: it keeps the filesystem
//! UUID, its absolute path and the coordinates of its entry, never a
//! reference into the filesystem. Every operation re-resolves the
//! filesystem through the entity registry, so an unmounted filesystem is
//! observed as [`FilesystemError::FilesystemDoesNotExist`].

use alloc::string::String;

use log::{debug, error};

use crate::errors::{CanFail, FilesystemError};
use crate::fs::fat32::blockio::Fat32BlockIoAdapter;
use crate::fs::fat32::cluster::{
    attributes, cluster_entry_at_address, DirectoryCluster, EntryAddress,
};
use crate::fs::fat32::datetime::{Fat32Date, Fat32Time, Fat32TimeHundredths};
use crate::fs::fat32::file::{Fat32File, FileHandle};
use crate::fs::fat32::filenames::Compact8Dot3Filename;
use crate::fs::fat32::{file_map, ClusterIndex, FAT32_ENTRY_ALLOCATED_AND_EOF, FAT32_ENTRY_FREE};
use crate::fs::{DirectoryEntry, EntryKind, FileMode, VisitOutcome};
use crate::path;
use crate::registry::{self, ObjectUuid, SharedFilesystem};

/// A handle onto one directory of a mounted FAT32 volume.
#[derive(Debug, Clone)]
pub struct Fat32Directory {
    filesystem_uuid: ObjectUuid,
    absolute_path: String,
    entry_address: EntryAddress,
    first_cluster: ClusterIndex,
    compact_name: Compact8Dot3Filename,
}

impl Fat32Directory {
    pub(crate) fn new(
        filesystem_uuid: ObjectUuid,
        absolute_path: &str,
        entry_address: EntryAddress,
        first_cluster: ClusterIndex,
        compact_name: Compact8Dot3Filename,
    ) -> Self {
        Self {
            filesystem_uuid,
            absolute_path: String::from(absolute_path),
            entry_address,
            first_cluster,
            compact_name,
        }
    }

    /// UUID of the owning filesystem.
    pub fn filesystem_uuid(&self) -> ObjectUuid {
        self.filesystem_uuid
    }

    /// The directory's absolute path.
    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    /// The directory's first cluster.
    pub fn first_cluster(&self) -> ClusterIndex {
        self.first_cluster
    }

    /// The directory's compact 8.3 name.
    pub fn compact_name(&self) -> &Compact8Dot3Filename {
        &self.compact_name
    }

    /// Returns `true` for the root directory.
    pub fn is_root(&self) -> bool {
        self.absolute_path == "/"
    }

    /// Enumerates the directory, handing each entry to `callback` until the
    /// callback returns [`VisitOutcome::Finished`] or the entries run out.
    ///
    /// The callback must not mutate the visited directory.
    pub fn visit_directory(
        &self,
        mut callback: impl FnMut(&DirectoryEntry) -> VisitOutcome,
    ) -> CanFail<FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();

        let directory_cluster = DirectoryCluster::new(
            self.filesystem_uuid,
            &mut guard.block_io_adapter,
            self.first_cluster,
        );

        let mut cursor = directory_cluster.directory_entries();

        while !cursor.is_end() {
            let entry = match cursor.as_directory_entry() {
                Ok(entry) => entry,
                Err(FilesystemError::Fat32DirectoryIteratorAtEnd) => break,
                Err(code) => return Err(code),
            };

            if callback(&entry) == VisitOutcome::Finished {
                break;
            }

            cursor.advance()?;
        }

        Ok(())
    }

    /// Resolves a child directory by name.
    ///
    /// `.` returns a handle to this directory and `..` one to the parent
    /// (the root is its own parent). Any other name is resolved through
    /// the directory cache first, then by searching this directory's
    /// clusters; a successful search is inserted into the cache.
    pub fn get_directory(&self, directory_name: &str) -> Result<Fat32Directory, FilesystemError> {
        if directory_name == "." {
            return Ok(self.dot_entry());
        }

        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();
        let filesystem = &mut *guard;

        if directory_name == ".." {
            return self.dot_dot_entry(&mut filesystem.block_io_adapter);
        }

        let directory_absolute_path = path::join(&self.absolute_path, directory_name);

        if let Some(cached) = filesystem
            .directory_cache
            .find_entry(&directory_absolute_path)
        {
            return Ok(Fat32Directory::new(
                self.filesystem_uuid,
                &directory_absolute_path,
                cached.entry_address(),
                cached.first_cluster(),
                *cached.compact_name(),
            ));
        }

        let directory_entry = self.get_entry(
            &mut filesystem.block_io_adapter,
            directory_name,
            EntryKind::DIRECTORY,
        )?;

        filesystem.directory_cache.add_entry(
            super::dir_cache::DirectoryCacheEntryType::Directory,
            directory_entry.entry_address(),
            directory_entry.first_cluster(),
            *directory_entry.cluster_entry().compact_name(),
            &directory_absolute_path,
        );

        Ok(Fat32Directory::new(
            self.filesystem_uuid,
            &directory_absolute_path,
            directory_entry.entry_address(),
            directory_entry.first_cluster(),
            *directory_entry.cluster_entry().compact_name(),
        ))
    }

    /// Creates a child directory.
    ///
    /// A fresh cluster is initialized with the `.` and `..` entries and
    /// marked end-of-chain before the entry is created in this directory;
    /// if the entry creation fails, the cluster is freed again.
    pub fn create_directory(
        &self,
        new_directory_name: &str,
    ) -> Result<Fat32Directory, FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();
        let adapter = &mut guard.block_io_adapter;

        debug!(
            "creating subdirectory {new_directory_name} under {}",
            self.absolute_path
        );

        let new_directory_first_cluster = adapter.find_next_empty_cluster(FAT32_ENTRY_FREE)?;

        {
            let mut directory_cluster =
                DirectoryCluster::new(self.filesystem_uuid, adapter, self.first_cluster);

            directory_cluster
                .write_empty_directory_cluster(new_directory_first_cluster, self.first_cluster)?;
        }

        adapter.update_fat_table_entry(new_directory_first_cluster, FAT32_ENTRY_ALLOCATED_AND_EOF)?;

        let mut directory_cluster =
            DirectoryCluster::new(self.filesystem_uuid, adapter, self.first_cluster);

        let create_result = directory_cluster.create_entry(
            new_directory_name,
            attributes::DIRECTORY,
            Fat32TimeHundredths::new(0),
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            Fat32Date::from_ymd(1980, 1, 1),
            new_directory_first_cluster,
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            0,
        );

        drop(directory_cluster);

        let new_directory_entry = match create_result {
            Ok(entry) => entry,
            Err(code) => {
                //  Free the cluster allocated above

                if adapter
                    .update_fat_table_entry(new_directory_first_cluster, FAT32_ENTRY_FREE)
                    .is_err()
                {
                    error!("unable to free cluster after failed directory entry creation");
                }

                return Err(code);
            }
        };

        Ok(Fat32Directory::new(
            self.filesystem_uuid,
            &path::join(&self.absolute_path, new_directory_name),
            new_directory_entry.entry_address(),
            new_directory_first_cluster,
            *new_directory_entry.cluster_entry().compact_name(),
        ))
    }

    /// Removes this directory from the volume.
    ///
    /// The cache entry is invalidated first, the on-disk entry re-verified
    /// (the handle may be stale), then the entry is removed and the
    /// directory's cluster chain released.
    pub fn remove_directory(&self) -> CanFail<FilesystemError> {
        if self.is_root() {
            return Err(FilesystemError::RootDirectoryCannotBeRemoved);
        }

        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();
        let filesystem = &mut *guard;

        filesystem.directory_cache.remove_entry(self.first_cluster);

        let adapter = &mut filesystem.block_io_adapter;

        let mut directory_cluster = DirectoryCluster::new(
            self.filesystem_uuid,
            adapter,
            self.entry_address.cluster,
        );

        let cluster_entry = directory_cluster.get_cluster_entry(self.entry_address)?;

        if cluster_entry.is_unused() || !cluster_entry.is_directory_entry() {
            return Err(FilesystemError::DirectoryNotFound);
        }

        directory_cluster.remove_entry(self.entry_address)?;

        drop(directory_cluster);

        adapter.release_chain(cluster_entry.first_cluster(adapter.root_directory_cluster()))?;

        Ok(())
    }

    /// Renames a child directory. The new entry is created before the old
    /// one is removed, so a crash in between leaves the directory
    /// discoverable under at least one of the two names.
    pub fn rename_directory(
        &self,
        directory_name: &str,
        new_directory_name: &str,
    ) -> CanFail<FilesystemError> {
        self.rename_entry(directory_name, new_directory_name, EntryKind::DIRECTORY)
    }

    /// Renames a file within this directory; create-then-remove, as for
    /// directories.
    pub fn rename_file(&self, filename: &str, new_filename: &str) -> CanFail<FilesystemError> {
        self.rename_entry(filename, new_filename, EntryKind::FILE)
    }

    /// Opens a file in this directory.
    ///
    /// A missing file is created when `mode` includes
    /// [`FileMode::CREATE`]; the new entry has size zero and no storage
    /// until the first write. The open file is admitted into the open-file
    /// table, which enforces one open per absolute path.
    pub fn open_file(
        &self,
        filename: &str,
        mode: FileMode,
    ) -> Result<FileHandle, FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();

        let file_entry =
            match self.get_entry(&mut guard.block_io_adapter, filename, EntryKind::FILE) {
                Ok(entry) => entry,
                Err(FilesystemError::FileNotFound) => {
                    if !mode.contains(FileMode::CREATE) {
                        debug!("no such file and CREATE not specified: {filename}");
                        return Err(FilesystemError::FileNotFound);
                    }

                    self.create_file_entry(&mut guard.block_io_adapter, filename)?
                }
                Err(code) => return Err(code),
            };

        drop(guard);

        let absolute_path = path::join(&self.absolute_path, filename);

        let file = Fat32File::new(self.filesystem_uuid, file_entry, &absolute_path, mode);

        let file_uuid = file_map::add_file(file)?;

        Ok(FileHandle::new(file_uuid))
    }

    /// Deletes a file in this directory.
    ///
    /// Refused while the file is open. The cache entry for the file's
    /// first cluster is invalidated, the on-disk entry re-verified, then
    /// the entry is removed and its cluster chain released.
    pub fn delete_file(&self, filename: &str) -> CanFail<FilesystemError> {
        let filesystem = self.resolve_filesystem()?;

        let file_entry = {
            let mut guard = filesystem.lock();

            match self.get_entry(&mut guard.block_io_adapter, filename, EntryKind::FILE) {
                Ok(entry) => entry,
                Err(_) => return Err(FilesystemError::FileNotFound),
            }
        };

        let absolute_path = path::join(&self.absolute_path, filename);

        if file_map::is_file_open(&absolute_path) {
            return Err(FilesystemError::FileAlreadyOpenedExclusively);
        }

        let mut guard = filesystem.lock();
        let filesystem = &mut *guard;

        filesystem
            .directory_cache
            .remove_entry(file_entry.first_cluster());

        let adapter = &mut filesystem.block_io_adapter;

        let mut directory_cluster =
            DirectoryCluster::new(self.filesystem_uuid, adapter, self.first_cluster);

        let cluster_entry = directory_cluster.get_cluster_entry(file_entry.entry_address())?;

        if cluster_entry.is_unused() || !cluster_entry.is_standard_entry() {
            return Err(FilesystemError::FileNotFound);
        }

        directory_cluster.remove_entry(file_entry.entry_address())?;

        drop(directory_cluster);

        let first_cluster = cluster_entry.first_cluster(adapter.root_directory_cluster());

        //  A never-written file has no chain to release

        if first_cluster != ClusterIndex(0) {
            adapter.release_chain(first_cluster)?;
        }

        Ok(())
    }

    fn rename_entry(
        &self,
        name: &str,
        new_name: &str,
        entry_kind: EntryKind,
    ) -> CanFail<FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();
        let filesystem = &mut *guard;

        let existing_entry =
            self.get_entry(&mut filesystem.block_io_adapter, name, entry_kind)?;

        //  Create the replacement entry first: a crash between the two
        //  steps must leave the object reachable under one of the names.

        let mut directory_cluster = DirectoryCluster::new(
            self.filesystem_uuid,
            &mut filesystem.block_io_adapter,
            self.first_cluster,
        );

        directory_cluster.create_entry_from_existing(
            new_name,
            existing_entry.first_cluster(),
            existing_entry.cluster_entry(),
        )?;

        drop(directory_cluster);

        filesystem
            .directory_cache
            .remove_entry(existing_entry.first_cluster());

        let mut directory_cluster = DirectoryCluster::new(
            self.filesystem_uuid,
            &mut filesystem.block_io_adapter,
            self.first_cluster,
        );

        directory_cluster.remove_entry(existing_entry.entry_address())?;

        Ok(())
    }

    fn create_file_entry(
        &self,
        adapter: &mut Fat32BlockIoAdapter,
        filename: &str,
    ) -> Result<DirectoryEntry, FilesystemError> {
        let mut directory_cluster =
            DirectoryCluster::new(self.filesystem_uuid, adapter, self.first_cluster);

        directory_cluster.create_entry(
            filename,
            attributes::FILE,
            Fat32TimeHundredths::new(0),
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            Fat32Date::from_ymd(1980, 1, 1),
            ClusterIndex(0),
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            0,
        )
    }

    fn dot_entry(&self) -> Fat32Directory {
        Fat32Directory::new(
            self.filesystem_uuid,
            &self.absolute_path,
            self.entry_address,
            self.first_cluster,
            Compact8Dot3Filename::new(".", ""),
        )
    }

    fn dot_dot_entry(
        &self,
        adapter: &mut Fat32BlockIoAdapter,
    ) -> Result<Fat32Directory, FilesystemError> {
        //  The root directory is its own parent

        if self.is_root() {
            return Ok(self.dot_entry());
        }

        let dot_dot_entry = self.get_entry(adapter, "..", EntryKind::DIRECTORY)?;

        let parent_path = path::parent(&self.absolute_path)?;

        Ok(Fat32Directory::new(
            self.filesystem_uuid,
            &parent_path,
            dot_dot_entry.entry_address(),
            dot_dot_entry.first_cluster(),
            Compact8Dot3Filename::new("..", ""),
        ))
    }

    fn get_entry(
        &self,
        adapter: &mut Fat32BlockIoAdapter,
        entry_name: &str,
        entry_kind: EntryKind,
    ) -> Result<DirectoryEntry, FilesystemError> {
        let directory_cluster =
            DirectoryCluster::new(self.filesystem_uuid, adapter, self.first_cluster);

        let mut found = directory_cluster.find_directory_entry(entry_kind, Some(entry_name))?;

        if !found.is_end() {
            return found.as_directory_entry();
        }

        //  Never found: surface a kind-specific error

        if entry_kind == EntryKind::DIRECTORY {
            Err(FilesystemError::DirectoryNotFound)
        } else if entry_kind == EntryKind::VOLUME_INFORMATION {
            Err(FilesystemError::VolumeInformationNotFound)
        } else {
            Err(FilesystemError::FileNotFound)
        }
    }

    fn resolve_filesystem(&self) -> Result<SharedFilesystem, FilesystemError> {
        registry::find_filesystem(self.filesystem_uuid)
            .ok_or(FilesystemError::FilesystemDoesNotExist)
    }
}

/// Rewrites the first-cluster field of the directory entry at `address`.
///
/// Used when the first write to a fresh file allocates its initial
/// cluster.
pub(crate) fn set_directory_entry_first_cluster(
    adapter: &Fat32BlockIoAdapter,
    address: EntryAddress,
    first_cluster: ClusterIndex,
) -> CanFail<FilesystemError> {
    cluster_entry_at_address(adapter, address, |entry| {
        entry.set_first_cluster(first_cluster);
    })
}

/// Rewrites the size field of the directory entry at `address`.
pub(crate) fn update_directory_entry_size(
    adapter: &Fat32BlockIoAdapter,
    address: EntryAddress,
    new_size: u32,
) -> CanFail<FilesystemError> {
    cluster_entry_at_address(adapter, address, |entry| {
        entry.set_size(new_size);
    })
}
