//! The FAT32 file object.
//!
//! [`Fat32File`] is the open-file record owned by the
//! [`file_map`](crate::fs::fat32::file_map): the position state, the open
//! mode and an in-memory copy of the directory entry. Callers only ever see
//! [`FileHandle`], a thin wrapper around the file UUID; every handle
//! operation re-resolves the record through the file map and the owning
//! filesystem through the registry, so a closed file or an unmounted
//! filesystem surfaces as an error instead of a dangling reference.

use alloc::string::String;
use alloc::vec;

use log::debug;

use crate::errors::{CanFail, FilesystemError};
use crate::fs::fat32::directory;
use crate::fs::fat32::file_map;
use crate::fs::fat32::cluster::EntryAddress;
use crate::fs::fat32::{ClusterIndex, FAT32_ENTRY_ALLOCATED_AND_EOF, FAT32_ENTRY_EOF_THRESHOLD};
use crate::fs::{DirectoryEntry, FileMode};
use crate::registry::{self, ObjectUuid, SharedFilesystem};

/// An open file: directory-entry coordinates plus the read/write position.
pub struct Fat32File {
    file_uuid: ObjectUuid,
    filesystem_uuid: ObjectUuid,

    directory_entry: DirectoryEntry,
    absolute_path: String,
    mode: FileMode,

    directory_entry_address: EntryAddress,

    first_cluster: ClusterIndex,
    current_cluster: ClusterIndex,
    byte_offset_into_cluster: u32,
    byte_offset_into_file: u32,
}

impl Fat32File {
    pub(crate) fn new(
        filesystem_uuid: ObjectUuid,
        directory_entry: DirectoryEntry,
        absolute_path: &str,
        mode: FileMode,
    ) -> Self {
        let directory_entry_address = directory_entry.entry_address();
        let first_cluster = directory_entry.first_cluster();

        Self {
            file_uuid: ObjectUuid::generate(),
            filesystem_uuid,
            directory_entry,
            absolute_path: String::from(absolute_path),
            mode,
            directory_entry_address,
            first_cluster,
            current_cluster: first_cluster,
            byte_offset_into_cluster: 0,
            byte_offset_into_file: 0,
        }
    }

    /// The file's process-unique UUID.
    pub fn id(&self) -> ObjectUuid {
        self.file_uuid
    }

    /// The file's absolute path.
    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    /// The filename the file was opened under.
    pub fn filename(&self) -> &str {
        self.directory_entry.name()
    }

    /// The in-memory copy of the directory entry.
    pub fn directory_entry(&self) -> &DirectoryEntry {
        &self.directory_entry
    }

    /// The file size, from the in-memory copy of the directory entry.
    pub fn size(&self) -> u32 {
        self.directory_entry.size()
    }

    /// Moves the position to the end of the file.
    pub fn seek_end(&mut self) -> CanFail<FilesystemError> {
        self.seek(self.directory_entry.size())
    }

    /// Moves the position to `position`, clamped to the file size.
    ///
    /// Position zero resets to the first cluster; a backward seek restarts
    /// from the first cluster before walking forward, since cluster chains
    /// only link forward.
    pub fn seek(&mut self, position: u32) -> CanFail<FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let guard = filesystem.lock();

        //  An empty file has no storage to position into

        if self.current_cluster == ClusterIndex(0) {
            return Ok(());
        }

        let position = position.min(self.directory_entry.size());

        if position == 0 {
            self.current_cluster = self.first_cluster;
            self.byte_offset_into_cluster = 0;
            self.byte_offset_into_file = 0;

            return Ok(());
        }

        if position < self.byte_offset_into_file {
            self.current_cluster = self.first_cluster;
            self.byte_offset_into_cluster = 0;
            self.byte_offset_into_file = 0;
        }

        let bytes_in_cluster = guard.block_io_adapter.bytes_per_cluster();

        loop {
            let bytes_to_skip = (bytes_in_cluster - self.byte_offset_into_cluster)
                .min(position - self.byte_offset_into_file);

            self.byte_offset_into_file += bytes_to_skip;
            self.byte_offset_into_cluster += bytes_to_skip;

            if self.byte_offset_into_file >= position {
                break;
            }

            if self.byte_offset_into_cluster >= bytes_in_cluster {
                let next_cluster = guard
                    .block_io_adapter
                    .next_cluster_in_chain(self.current_cluster)?;

                if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                    break;
                }

                self.current_cluster = next_cluster;
                self.byte_offset_into_cluster = 0;
            }
        }

        Ok(())
    }

    /// Reads from the current position, filling `buffer` or stopping at
    /// the end of the file. Returns the number of bytes read.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::FileNotOpenedForRead`] when the file was opened
    /// without [`FileMode::READ`].
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FilesystemError> {
        if !self.mode.contains(FileMode::READ) {
            return Err(FilesystemError::FileNotOpenedForRead);
        }

        let filesystem = self.resolve_filesystem()?;
        let guard = filesystem.lock();
        let adapter = &guard.block_io_adapter;

        //  An empty file has nothing to read

        if self.current_cluster == ClusterIndex(0) {
            return Ok(0);
        }

        let bytes_in_cluster = adapter.bytes_per_cluster();
        let mut cluster_buffer = vec![0u8; bytes_in_cluster as usize];

        let mut total_bytes_read = 0usize;

        while total_bytes_read < buffer.len() {
            adapter.read_cluster(self.current_cluster, &mut cluster_buffer)?;

            //  The lesser of what is left in this cluster and what is left
            //  in the file, further capped by the space left in the
            //  caller's buffer.

            let bytes_to_read = (bytes_in_cluster - self.byte_offset_into_cluster)
                .min(self.directory_entry.size() - self.byte_offset_into_file);

            let bytes_appended =
                (bytes_to_read as usize).min(buffer.len() - total_bytes_read);

            let cluster_offset = self.byte_offset_into_cluster as usize;

            buffer[total_bytes_read..total_bytes_read + bytes_appended].copy_from_slice(
                &cluster_buffer[cluster_offset..cluster_offset + bytes_appended],
            );

            total_bytes_read += bytes_appended;
            self.byte_offset_into_file += bytes_appended as u32;
            self.byte_offset_into_cluster += bytes_appended as u32;

            if self.byte_offset_into_file >= self.directory_entry.size() {
                break;
            }

            if self.byte_offset_into_cluster >= bytes_in_cluster {
                let next_cluster = adapter.next_cluster_in_chain(self.current_cluster)?;

                if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                    break;
                }

                self.current_cluster = next_cluster;
                self.byte_offset_into_cluster = 0;
            }
        }

        Ok(total_bytes_read)
    }

    /// Writes `buffer` at the current position, allocating clusters on
    /// demand and persisting the new size to the directory entry when the
    /// write ends past the recorded size.
    pub fn write(&mut self, buffer: &[u8]) -> CanFail<FilesystemError> {
        let filesystem = self.resolve_filesystem()?;
        let mut guard = filesystem.lock();
        let adapter = &mut guard.block_io_adapter;

        //  A file that has never been written has no storage yet: allocate
        //  the first cluster, terminate its chain and persist it into the
        //  directory entry before any data moves.

        if self.current_cluster == ClusterIndex(0) {
            let new_cluster = adapter.find_next_empty_cluster(ClusterIndex(0))?;

            adapter.update_fat_table_entry(new_cluster, FAT32_ENTRY_ALLOCATED_AND_EOF)?;

            directory::set_directory_entry_first_cluster(
                adapter,
                self.directory_entry_address,
                new_cluster,
            )?;

            self.first_cluster = new_cluster;
            self.current_cluster = new_cluster;
        }

        let bytes_in_cluster = adapter.bytes_per_cluster();
        let mut cluster_buffer = vec![0u8; bytes_in_cluster as usize];

        let mut offset_into_buffer = 0usize;

        while offset_into_buffer < buffer.len() {
            let bytes_left_in_cluster = bytes_in_cluster - self.byte_offset_into_cluster;
            let bytes_to_copy =
                (bytes_left_in_cluster as usize).min(buffer.len() - offset_into_buffer);

            //  Preserve existing cluster contents unless the write covers
            //  the whole cluster.

            let partial_cluster = self.byte_offset_into_cluster > 0
                || ((bytes_to_copy as u32) < bytes_in_cluster
                    && self.byte_offset_into_file < self.directory_entry.size());

            if partial_cluster {
                adapter.read_cluster(self.current_cluster, &mut cluster_buffer)?;
            }

            let cluster_offset = self.byte_offset_into_cluster as usize;

            cluster_buffer[cluster_offset..cluster_offset + bytes_to_copy].copy_from_slice(
                &buffer[offset_into_buffer..offset_into_buffer + bytes_to_copy],
            );

            adapter.write_cluster(self.current_cluster, &cluster_buffer)?;

            self.byte_offset_into_file += bytes_to_copy as u32;
            self.byte_offset_into_cluster += bytes_to_copy as u32;

            offset_into_buffer += bytes_to_copy;

            if offset_into_buffer >= buffer.len() {
                break;
            }

            //  More data to write: move to the next cluster of the file,
            //  or extend the chain when the existing storage is used up.

            if self.byte_offset_into_file < self.directory_entry.size() {
                let next_cluster = adapter.next_cluster_in_chain(self.current_cluster)?;

                self.current_cluster = next_cluster;
                self.byte_offset_into_cluster = 0;

                continue;
            }

            //  Mark the new cluster as the chain end first; a crash between
            //  the two updates leaves a reserved but unreferenced cluster,
            //  never a dangling link.

            let next_empty_cluster =
                adapter.find_next_empty_cluster(ClusterIndex(self.current_cluster.0 + 1))?;

            adapter.update_fat_table_entry(next_empty_cluster, FAT32_ENTRY_ALLOCATED_AND_EOF)?;
            adapter.update_fat_table_entry(self.current_cluster, next_empty_cluster)?;

            self.current_cluster = next_empty_cluster;
            self.byte_offset_into_cluster = 0;
        }

        //  Update the directory entry when the file grew, both the
        //  in-memory copy and the entry on disk.

        if self.byte_offset_into_file > self.directory_entry.size() {
            self.directory_entry.update_size(self.byte_offset_into_file);

            directory::update_directory_entry_size(
                adapter,
                self.directory_entry_address,
                self.byte_offset_into_file,
            )
            .map_err(|code| {
                debug!("failed to update directory entry size after write");
                code
            })?;
        }

        Ok(())
    }

    /// Appends `buffer` at the end of the file.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::FileNotOpenedForAppend`] when the file was
    /// opened without [`FileMode::APPEND`].
    pub fn append(&mut self, buffer: &[u8]) -> CanFail<FilesystemError> {
        if !self.mode.contains(FileMode::APPEND) {
            return Err(FilesystemError::FileNotOpenedForAppend);
        }

        self.seek_end()?;
        self.write(buffer)
    }

    fn resolve_filesystem(&self) -> Result<SharedFilesystem, FilesystemError> {
        registry::find_filesystem(self.filesystem_uuid)
            .ok_or(FilesystemError::FilesystemDoesNotExist)
    }
}

/// A caller-held capability onto an open file.
///
/// Holds only the file UUID; dropping the handle closes the file exactly
/// once.
#[derive(Debug)]
pub struct FileHandle {
    file_uuid: ObjectUuid,
}

impl FileHandle {
    pub(crate) fn new(file_uuid: ObjectUuid) -> Self {
        Self { file_uuid }
    }

    /// The open file's UUID.
    pub fn id(&self) -> ObjectUuid {
        self.file_uuid
    }

    /// The filename the file was opened under.
    pub fn filename(&self) -> Result<String, FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| Ok(String::from(file.filename())))
    }

    /// The file's absolute path.
    pub fn absolute_path(&self) -> Result<String, FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| {
            Ok(String::from(file.absolute_path()))
        })
    }

    /// A copy of the file's directory entry.
    pub fn directory_entry(&self) -> Result<DirectoryEntry, FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| {
            registry::find_filesystem(file.directory_entry().filesystem_uuid())
                .ok_or(FilesystemError::FilesystemDoesNotExist)?;

            Ok(file.directory_entry().clone())
        })
    }

    /// The file's size in bytes.
    pub fn size(&self) -> Result<u32, FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| {
            registry::find_filesystem(file.directory_entry().filesystem_uuid())
                .ok_or(FilesystemError::FilesystemDoesNotExist)?;

            Ok(file.size())
        })
    }

    /// Reads from the current position; see [`Fat32File::read`].
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| file.read(buffer))
    }

    /// Writes at the current position; see [`Fat32File::write`].
    pub fn write(&self, buffer: &[u8]) -> CanFail<FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| file.write(buffer))
    }

    /// Appends at the end of the file; see [`Fat32File::append`].
    pub fn append(&self, buffer: &[u8]) -> CanFail<FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| file.append(buffer))
    }

    /// Moves the position; see [`Fat32File::seek`].
    pub fn seek(&self, position: u32) -> CanFail<FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| file.seek(position))
    }

    /// Moves the position to the end of the file.
    pub fn seek_end(&self) -> CanFail<FilesystemError> {
        file_map::with_open_file(self.file_uuid, |file| file.seek_end())
    }

    /// Closes the file, removing it from the open-file table.
    pub fn close(self) -> CanFail<FilesystemError> {
        let result = file_map::remove_file(self.file_uuid);

        core::mem::forget(self);

        result
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let _ = file_map::remove_file(self.file_uuid);
    }
}
