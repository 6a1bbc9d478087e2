//! The process-wide open-file table.
//!
//! Owns every open [`Fat32File`] record, indexed by absolute path and by
//! file UUID. The path index enforces the engine's exclusivity rule: at
//! most one open file per absolute path. Callers hold
//! [`FileHandle`](crate::fs::fat32::file::FileHandle) wrappers that
//! re-resolve the record through this table on every operation.

use alloc::string::String;

use hashbrown::HashMap;
use lazy_static::lazy_static;
use log::error;

use crate::errors::{CanFail, FilesystemError};
use crate::fs::fat32::file::Fat32File;
use crate::registry::ObjectUuid;

#[derive(Default)]
struct FileMap {
    files_by_path: HashMap<String, Fat32File>,
    paths_by_uuid: HashMap<ObjectUuid, String>,
}

lazy_static! {
    static ref FILE_MAP: spin::Mutex<FileMap> = spin::Mutex::new(FileMap::default());
}

/// Admits a file into the table.
///
/// # Errors
///
/// [`FilesystemError::FileAlreadyOpenedExclusively`] when a file with the
/// same absolute path is already open.
pub fn add_file(file: Fat32File) -> Result<ObjectUuid, FilesystemError> {
    let mut map = FILE_MAP.lock();

    let path = String::from(file.absolute_path());
    let uuid = file.id();

    if map.files_by_path.contains_key(&path) {
        return Err(FilesystemError::FileAlreadyOpenedExclusively);
    }

    map.files_by_path.insert(path.clone(), file);
    map.paths_by_uuid.insert(uuid, path);

    Ok(uuid)
}

/// Removes a file from the table, closing it.
///
/// # Errors
///
/// [`FilesystemError::FileNotOpen`] when the UUID is not present.
pub fn remove_file(uuid: ObjectUuid) -> CanFail<FilesystemError> {
    let mut map = FILE_MAP.lock();

    let path = match map.paths_by_uuid.remove(&uuid) {
        Some(path) => path,
        None => return Err(FilesystemError::FileNotOpen),
    };

    if map.files_by_path.remove(&path).is_none() {
        error!("open file record missing from the path index for {path}");
        return Err(FilesystemError::FileNotOpen);
    }

    Ok(())
}

/// Tests whether a file with the given absolute path is open.
pub fn is_file_open(absolute_path: &str) -> bool {
    FILE_MAP.lock().files_by_path.contains_key(absolute_path)
}

/// Runs `operation` against the open file record for `uuid`.
///
/// # Errors
///
/// [`FilesystemError::FileIsClosed`] when the UUID does not resolve to an
/// open file, plus whatever the operation itself returns.
pub fn with_open_file<R>(
    uuid: ObjectUuid,
    operation: impl FnOnce(&mut Fat32File) -> Result<R, FilesystemError>,
) -> Result<R, FilesystemError> {
    let mut map = FILE_MAP.lock();

    let path = map
        .paths_by_uuid
        .get(&uuid)
        .cloned()
        .ok_or(FilesystemError::FileIsClosed)?;

    let file = map
        .files_by_path
        .get_mut(&path)
        .ok_or(FilesystemError::FileIsClosed)?;

    operation(file)
}
