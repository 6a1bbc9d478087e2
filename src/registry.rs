//! Process-wide registry of OS entities used by the filesystem engine.
//!
//! The registry is the only owner of mounted filesystems and registered
//! block devices. Directory and file handles never hold references into the
//! registry; they keep the entity's [`ObjectUuid`] and re-resolve it on
//! every operation, so removal of a filesystem is observable as a
//! [`FilesystemDoesNotExist`](crate::errors::FilesystemError::FilesystemDoesNotExist)
//! failure instead of a dangling pointer.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use lazy_static::lazy_static;
use spin::RwLock;

use crate::devices::block::SharedBlockDevice;
use crate::fs::fat32::Fat32Filesystem;

/// A process-unique identifier for a registered entity or an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectUuid(u64);

impl ObjectUuid {
    /// The nil UUID, never produced by [`ObjectUuid::generate`].
    pub const NIL: Self = Self(0);

    /// Returns a fresh process-unique id.
    pub fn generate() -> Self {
        static NEXT_UUID: AtomicU64 = AtomicU64::new(1);

        Self(NEXT_UUID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A mounted filesystem owned by the registry.
pub type SharedFilesystem = Arc<spin::Mutex<Fat32Filesystem>>;

#[derive(Default)]
struct EntityRegistry {
    filesystems: HashMap<ObjectUuid, SharedFilesystem>,
    filesystem_names: HashMap<String, ObjectUuid>,
    block_devices: HashMap<String, SharedBlockDevice>,
}

lazy_static! {
    static ref ENTITY_REGISTRY: RwLock<EntityRegistry> = RwLock::new(EntityRegistry::default());
}

/// Adds a mounted filesystem to the registry and returns its UUID.
///
/// A filesystem registered under a name that is already taken replaces the
/// name binding; the previous filesystem stays reachable by UUID until
/// removed.
pub fn register_filesystem(filesystem: Fat32Filesystem) -> ObjectUuid {
    let uuid = filesystem.id();
    let name = String::from(filesystem.name());

    let mut registry = ENTITY_REGISTRY.write();

    registry
        .filesystems
        .insert(uuid, Arc::new(spin::Mutex::new(filesystem)));
    registry.filesystem_names.insert(name, uuid);

    uuid
}

/// Looks a filesystem up by UUID.
pub fn find_filesystem(uuid: ObjectUuid) -> Option<SharedFilesystem> {
    ENTITY_REGISTRY.read().filesystems.get(&uuid).cloned()
}

/// Looks a filesystem up by its registered name.
pub fn find_filesystem_by_name(name: &str) -> Option<SharedFilesystem> {
    let registry = ENTITY_REGISTRY.read();

    let uuid = registry.filesystem_names.get(name)?;
    registry.filesystems.get(uuid).cloned()
}

/// Returns the UUID of the filesystem mounted from the boot partition, if
/// one is registered.
pub fn find_boot_filesystem() -> Option<SharedFilesystem> {
    let registry = ENTITY_REGISTRY.read();

    registry
        .filesystems
        .values()
        .find(|filesystem| filesystem.lock().is_boot())
        .cloned()
}

/// Removes a filesystem from the registry.
///
/// Handles holding the UUID observe the removal on their next operation.
pub fn remove_filesystem(uuid: ObjectUuid) -> bool {
    let mut registry = ENTITY_REGISTRY.write();

    if let Some(filesystem) = registry.filesystems.remove(&uuid) {
        let name = String::from(filesystem.lock().name());
        registry.filesystem_names.remove(&name);
        return true;
    }

    false
}

/// Registers a block device under its name.
pub fn register_block_device(device: SharedBlockDevice) {
    let name = String::from(device.lock().name());

    ENTITY_REGISTRY.write().block_devices.insert(name, device);
}

/// Looks a block device up by name.
pub fn find_block_device(name: &str) -> Option<SharedBlockDevice> {
    ENTITY_REGISTRY.read().block_devices.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_unique() {
        let first = ObjectUuid::generate();
        let second = ObjectUuid::generate();

        assert_ne!(first, second);
        assert_ne!(first, ObjectUuid::NIL);
    }

    #[test]
    fn block_devices_resolve_by_name() {
        let device: SharedBlockDevice = Arc::new(spin::Mutex::new(
            crate::devices::RamDisk::new("registry-test-disk", 4),
        ));

        register_block_device(device);

        assert!(find_block_device("registry-test-disk").is_some());
        assert!(find_block_device("registry-test-missing").is_none());
    }
}
