//! Filesystem façade tests: mounting, root enumeration and path-driven
//! directory lookup with the directory cache in the loop.

mod common;

use cinderfs::errors::FilesystemError;
use cinderfs::fs::fat32::directory::Fat32Directory;
use cinderfs::fs::{EntryKind, VisitOutcome};
use cinderfs::registry;

fn entry_names(directory: &Fat32Directory) -> Vec<(String, String, EntryKind)> {
    let mut names = Vec::new();

    directory
        .visit_directory(|entry| {
            names.push((
                String::from(entry.name()),
                entry.cluster_entry().compact_8_dot_3_filename(),
                entry.kind(),
            ));
            VisitOutcome::Next
        })
        .unwrap();

    names
}

#[test]
fn mounting_and_enumerating_does_not_alter_the_image() {
    let disk = common::ramdisk_with_volume("fs-disk-0", "TESTFAT32");

    let image_before = common::device_image(&disk);

    let mounted = cinderfs::fs::mount_mass_storage_filesystems(&common::shared(&disk)).unwrap();
    let filesystem = common::filesystem(mounted[0]);

    let root = filesystem.lock().get_root_directory();
    let names = entry_names(&root);

    assert_eq!(names.len(), 1);
    assert_eq!(names[0].0, "TESTFAT32");
    assert_eq!(names[0].2, EntryKind::VOLUME_INFORMATION);

    assert_eq!(common::device_image(&disk), image_before);
}

#[test]
fn root_enumeration_lists_entries_in_on_disk_order() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-1", "ROOTENUM");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();

    root.create_directory("SUBDIR1").unwrap();
    root.create_directory("SUBDIR2").unwrap();
    root.create_directory("SUBDIR3").unwrap();
    root.create_directory("file testing").unwrap();
    root.create_directory("test 1").unwrap();
    root.create_directory("test+1").unwrap();
    root.create_directory("Test 1.t x").unwrap();
    root.create_directory("Test1.t+x").unwrap();
    root.create_directory("...Name.With.Leading.Periods.lNg").unwrap();

    let names = entry_names(&root);

    let expected: &[(&str, &str, EntryKind)] = &[
        ("ROOTENUM", "ROOTENUM", EntryKind::VOLUME_INFORMATION),
        ("SUBDIR1", "SUBDIR1", EntryKind::DIRECTORY),
        ("SUBDIR2", "SUBDIR2", EntryKind::DIRECTORY),
        ("SUBDIR3", "SUBDIR3", EntryKind::DIRECTORY),
        ("file testing", "FILETE~1", EntryKind::DIRECTORY),
        ("test 1", "TEST1~1", EntryKind::DIRECTORY),
        ("test+1", "TEST_1~1", EntryKind::DIRECTORY),
        ("Test 1.t x", "TEST1~1.TX", EntryKind::DIRECTORY),
        ("Test1.t+x", "TEST1~1.T_X", EntryKind::DIRECTORY),
        (
            "...Name.With.Leading.Periods.lNg",
            "NAMEWI~1.LNG",
            EntryKind::DIRECTORY,
        ),
    ];

    assert_eq!(names.len(), expected.len());

    for (index, (name, compact, kind)) in expected.iter().enumerate() {
        assert_eq!(names[index].0, *name, "long name at index {index}");
        assert_eq!(names[index].1, *compact, "compact name at index {index}");
        assert_eq!(names[index].2, *kind, "kind at index {index}");
    }
}

#[test]
fn directories_resolve_by_absolute_path() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-2", "PATHWALK");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let level1 = root.create_directory("level one").unwrap();
    let level2 = level1.create_directory("level two").unwrap();
    level2.create_directory("level three").unwrap();

    let resolved = filesystem
        .lock()
        .get_directory("/level one/level two/level three")
        .unwrap();

    assert_eq!(resolved.absolute_path(), "/level one/level two/level three");
    assert!(!resolved.is_root());

    //  The path walk caches every resolved prefix; a second lookup is
    //  served from the cache.

    let misses_after_first = filesystem.lock().statistics().directory_cache_misses();

    let resolved_again = filesystem
        .lock()
        .get_directory("/level one/level two/level three")
        .unwrap();

    assert_eq!(resolved_again.first_cluster(), resolved.first_cluster());

    let statistics = filesystem.lock().statistics();
    assert!(statistics.directory_cache_hits() > 0);
    assert_eq!(statistics.directory_cache_misses(), misses_after_first);
}

#[test]
fn the_root_path_resolves_to_the_root_directory() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-3", "ROOTPATH");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_directory("/").unwrap();

    assert!(root.is_root());
    assert_eq!(root.absolute_path(), "/");
}

#[test]
fn missing_segments_report_directory_not_found() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-4", "MISSING");
    let filesystem = common::filesystem(uuid);

    assert_eq!(
        filesystem.lock().get_directory("/no/such/path").unwrap_err(),
        FilesystemError::DirectoryNotFound
    );

    assert_eq!(
        filesystem.lock().get_directory("relative").unwrap_err(),
        FilesystemError::IllegalPath
    );

    assert_eq!(
        filesystem.lock().get_directory("").unwrap_err(),
        FilesystemError::EmptyPath
    );
}

#[test]
fn volume_metadata_is_exposed() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-5", "METADATA");
    let filesystem = common::filesystem(uuid);

    let guard = filesystem.lock();

    assert_eq!(guard.volume_label(), "METADATA");
    assert_eq!(guard.name(), "METADATA");
    assert!(guard.is_boot());
    assert_eq!(
        guard.block_io_adapter().root_directory_cluster().0,
        common::ROOT_DIRECTORY_CLUSTER
    );
    assert_eq!(guard.block_io_adapter().bytes_per_cluster(), 512);
}

#[test]
fn registered_devices_mount_by_name() {
    let disk = common::ramdisk_with_volume("fs-disk-7", "BYNAME");

    registry::register_block_device(common::shared(&disk));

    let mounted = cinderfs::fs::mount_block_device_filesystems("fs-disk-7").unwrap();
    assert_eq!(mounted.len(), 1);

    let filesystem = common::filesystem(mounted[0]);
    assert_eq!(filesystem.lock().volume_label(), "BYNAME");
    assert_eq!(filesystem.lock().name(), "BYNAME");

    //  An unregistered device name does not resolve

    assert_eq!(
        cinderfs::fs::mount_block_device_filesystems("fs-disk-unregistered").unwrap_err(),
        FilesystemError::BlockDeviceDoesNotExist
    );
}

#[test]
fn removed_filesystems_are_observed_by_their_handles() {
    let (_disk, uuid) = common::mount_fresh_volume("fs-disk-6", "UNMOUNT");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();

    assert!(registry::remove_filesystem(uuid));

    assert_eq!(
        root.get_directory("anything").unwrap_err(),
        FilesystemError::FilesystemDoesNotExist
    );
    assert_eq!(
        root.visit_directory(|_| VisitOutcome::Next).unwrap_err(),
        FilesystemError::FilesystemDoesNotExist
    );
}
