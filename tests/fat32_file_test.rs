//! File object tests: create, write, read, seek, append, rename, delete
//! and the open-file exclusivity rules.

mod common;

use cinderfs::errors::FilesystemError;
use cinderfs::fs::fat32::directory::Fat32Directory;
use cinderfs::fs::fat32::file_map;
use cinderfs::fs::{FileMode, VisitOutcome};

fn file_names(directory: &Fat32Directory) -> Vec<String> {
    let mut names = Vec::new();

    directory
        .visit_directory(|entry| {
            names.push(String::from(entry.name()));
            VisitOutcome::Next
        })
        .unwrap();

    names
}

#[test]
fn a_new_file_round_trips_its_contents() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-0", "SMALLRW");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("small rw arena").unwrap();

    let handle = directory
        .open_file("new.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    assert_eq!(handle.size().unwrap(), 0);

    handle.write(b"Hello FAT32").unwrap();
    assert_eq!(handle.size().unwrap(), 11);

    handle.seek(0).unwrap();

    let mut readback = [0u8; 11];
    assert_eq!(handle.read(&mut readback).unwrap(), 11);
    assert_eq!(&readback, b"Hello FAT32");

    handle.close().unwrap();
}

#[test]
fn multi_cluster_create_write_delete_restores_the_fat() {
    let (disk, uuid) = common::mount_fresh_volume("file-disk-1", "ROUNDTRIP");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("round trip arena").unwrap();

    let fat_before_create = common::fat_region(&disk);

    let handle = directory
        .open_file("new.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    //  33 bytes, 1022 times: 33,726 bytes across 66 clusters

    let pattern = b"This is content for the new File\n";
    assert_eq!(pattern.len(), 33);

    let mut contents = Vec::with_capacity(33 * 1022);
    for _ in 0..1022 {
        contents.extend_from_slice(pattern);
    }
    assert_eq!(contents.len(), 33_726);

    handle.write(&contents).unwrap();
    assert_eq!(handle.size().unwrap(), 33_726);

    handle.seek(0).unwrap();

    let mut readback = vec![0u8; 33_726];
    assert_eq!(handle.read(&mut readback).unwrap(), 33_726);
    assert_eq!(readback, contents);

    handle.close().unwrap();

    directory.delete_file("new.txt").unwrap();

    //  The file is gone and every cluster it held is free again

    assert!(file_names(&directory).iter().all(|name| name != "new.txt"));
    assert_eq!(common::fat_region(&disk), fat_before_create);
}

#[test]
fn positional_writes_patch_without_disturbing_the_rest() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-2", "SEEKPATCH");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("patch testing").unwrap();

    let handle = directory
        .open_file("patched.bin", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    handle.write(&vec![b'*'; 50_000]).unwrap();

    handle.seek(0).unwrap();
    handle.write(b"0").unwrap();

    handle.seek(67).unwrap();
    handle.write(b"1").unwrap();

    //  Spans the boundary between two 512-byte clusters

    handle.seek(1023).unwrap();
    handle.write(b"23").unwrap();

    handle.seek(20_000).unwrap();
    handle.write(b"4").unwrap();

    handle.seek(49_999).unwrap();
    handle.write(b"5").unwrap();

    assert_eq!(handle.size().unwrap(), 50_000);

    handle.seek(0).unwrap();

    let mut contents = vec![0u8; 50_000];
    assert_eq!(handle.read(&mut contents).unwrap(), 50_000);

    assert_eq!(contents[0], b'0');
    assert_eq!(contents[67], b'1');
    assert_eq!(contents[1023], b'2');
    assert_eq!(contents[1024], b'3');
    assert_eq!(contents[20_000], b'4');
    assert_eq!(contents[49_999], b'5');

    //  Everything around the patches is untouched

    assert_eq!(contents[1], b'*');
    assert_eq!(contents[66], b'*');
    assert_eq!(contents[1022], b'*');
    assert_eq!(contents[1025], b'*');
    assert_eq!(contents[49_998], b'*');

    handle.close().unwrap();
}

#[test]
fn appends_accumulate_and_update_the_entry_size() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-3", "APPEND");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("append testing").unwrap();

    let handle = directory
        .open_file("appended.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    let first = vec![b'a'; 700];
    let second = vec![b'b'; 900];

    handle.append(&first).unwrap();
    assert_eq!(handle.size().unwrap(), 700);

    handle.append(&second).unwrap();
    assert_eq!(handle.size().unwrap(), 1600);

    handle.seek(0).unwrap();

    let mut contents = vec![0u8; 1600];
    assert_eq!(handle.read(&mut contents).unwrap(), 1600);

    assert!(contents[..700].iter().all(|&byte| byte == b'a'));
    assert!(contents[700..].iter().all(|&byte| byte == b'b'));

    //  The on-disk entry carries the new size too

    handle.close().unwrap();

    let mut entry_size = None;

    directory
        .visit_directory(|entry| {
            if entry.name() == "appended.txt" {
                entry_size = Some(entry.size());
                return VisitOutcome::Finished;
            }
            VisitOutcome::Next
        })
        .unwrap();

    assert_eq!(entry_size, Some(1600));
}

#[test]
fn renaming_a_file_preserves_its_contents() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-4", "MVFILE");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("rename arena").unwrap();

    let reference: Vec<u8> = (0..4096u32).map(|value| (value % 251) as u8).collect();

    let handle = directory
        .open_file("file to rename.txt file", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    handle.append(&reference).unwrap();
    handle.append(&reference).unwrap();
    handle.close().unwrap();

    directory
        .rename_file("file to rename.txt file", "file after rename.text")
        .unwrap();

    let names = file_names(&directory);
    assert!(names.contains(&String::from("file after rename.text")));
    assert!(!names.contains(&String::from("file to rename.txt file")));

    let handle = directory
        .open_file("file after rename.text", FileMode::READ)
        .unwrap();

    assert_eq!(handle.size().unwrap(), 8192);

    let mut contents = vec![0u8; 8192];
    assert_eq!(handle.read(&mut contents).unwrap(), 8192);

    assert_eq!(&contents[..4096], &reference[..]);
    assert_eq!(&contents[4096..], &reference[..]);

    handle.close().unwrap();
}

#[test]
fn files_are_opened_exclusively_by_absolute_path() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-5", "EXCLUSIVE");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("exclusive testing").unwrap();

    let handle = directory
        .open_file("locked.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    assert_eq!(
        directory
            .open_file("locked.txt", FileMode::READ)
            .unwrap_err(),
        FilesystemError::FileAlreadyOpenedExclusively
    );

    //  Deleting an open file is refused as well

    assert_eq!(
        directory.delete_file("locked.txt").unwrap_err(),
        FilesystemError::FileAlreadyOpenedExclusively
    );

    handle.close().unwrap();

    let reopened = directory.open_file("locked.txt", FileMode::READ).unwrap();
    reopened.close().unwrap();

    directory.delete_file("locked.txt").unwrap();
}

#[test]
fn dropping_a_handle_closes_the_file() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-6", "DROPCLOSE");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("drop testing").unwrap();

    {
        let _handle = directory
            .open_file("dropped.txt", FileMode::READ_WRITE_APPEND_CREATE)
            .unwrap();

        assert!(file_map::is_file_open("/drop testing/dropped.txt"));
    }

    assert!(!file_map::is_file_open("/drop testing/dropped.txt"));

    //  And the file can be opened again

    let handle = directory.open_file("dropped.txt", FileMode::READ).unwrap();
    handle.close().unwrap();
}

#[test]
fn modes_gate_read_and_append() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-7", "MODES");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("mode testing").unwrap();

    let handle = directory
        .open_file("writer.txt", FileMode::WRITE | FileMode::CREATE)
        .unwrap();

    handle.write(b"write only").unwrap();

    let mut buffer = [0u8; 4];
    assert_eq!(
        handle.read(&mut buffer).unwrap_err(),
        FilesystemError::FileNotOpenedForRead
    );
    assert_eq!(
        handle.append(b"tail").unwrap_err(),
        FilesystemError::FileNotOpenedForAppend
    );

    handle.close().unwrap();
}

#[test]
fn opening_a_missing_file_without_create_fails() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-8", "NOCREATE");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("missing testing").unwrap();

    assert_eq!(
        directory
            .open_file("not there.txt", FileMode::READ)
            .unwrap_err(),
        FilesystemError::FileNotFound
    );

    assert_eq!(
        directory.delete_file("not there.txt").unwrap_err(),
        FilesystemError::FileNotFound
    );
}

#[test]
fn long_filenames_round_trip_through_their_lfn_slots() {
    let (disk, uuid) = common::mount_fresh_volume("file-disk-9", "LFNSLOTS");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("lfn arena").unwrap();

    let long_name = "A diam maecenas sed enim ut sem.Pellentesque";

    let handle = directory
        .open_file(long_name, FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();
    handle.close().unwrap();

    //  The reassembled name comes back exactly

    let names = file_names(&directory);
    assert!(names.contains(&String::from(long_name)));

    //  And the raw slots follow the on-disk layout: 4 LFN slots in
    //  reverse order in front of the standard entry, each carrying the
    //  checksum of the basis name ADIAMM~1.PEL.

    let cluster = common::cluster_bytes(&disk, directory.first_cluster().0);

    //  Slots 0 and 1 are '.' and '..'; the group starts at slot 2

    let leading = &cluster[2 * 32..3 * 32];
    assert_eq!(leading[0], 0x44); // sequence 4, first-LFN flag
    assert_eq!(leading[11], 0x0F); // long filename attribute
    assert_eq!(leading[13], 0x5C); // checksum of ADIAMM~1.PEL

    let trailing = &cluster[5 * 32..6 * 32];
    assert_eq!(trailing[0], 0x01); // sequence 1, not first
    assert_eq!(trailing[13], 0x5C);

    let standard = &cluster[6 * 32..7 * 32];
    assert_eq!(&standard[..11], b"ADIAMM~1PEL");

    directory.delete_file(long_name).unwrap();

    //  The LFN slots were scrubbed along with the standard entry

    let cluster = common::cluster_bytes(&disk, directory.first_cluster().0);

    for slot in 2..=6 {
        assert_eq!(cluster[slot * 32], 0xE5, "slot {slot} not scrubbed");
    }
}

#[test]
fn the_device_reports_full_when_the_fat_is_exhausted() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-10", "FULLDISK");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("full testing").unwrap();

    let handle = directory
        .open_file("filler.bin", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    //  The test volume has roughly a megabyte of clusters

    let oversized = vec![0xA5u8; 1_200_000];

    assert_eq!(
        handle.write(&oversized).unwrap_err(),
        FilesystemError::Fat32DeviceFull
    );

    handle.close().unwrap();
}

#[test]
fn device_write_failures_surface_through_the_fat_wrappers() {
    let (disk, uuid) = common::mount_fresh_volume("file-disk-12", "BADWRITE");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("bad write arena").unwrap();

    let handle = directory
        .open_file("unlucky.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();

    //  The first write allocates a cluster, whose FAT entry update is the
    //  first write request issued.

    disk.lock().simulate_write_error(0);

    assert_eq!(
        handle.write(b"doomed").unwrap_err(),
        FilesystemError::Fat32UnableToWriteFatTableSector
    );

    handle.close().unwrap();
}

#[test]
fn files_in_renamed_directories_stay_reachable() {
    let (_disk, uuid) = common::mount_fresh_volume("file-disk-11", "MVPARENT");
    let filesystem = common::filesystem(uuid);

    let root = filesystem.lock().get_root_directory();
    let directory = root.create_directory("before rename").unwrap();

    let handle = directory
        .open_file("survivor.txt", FileMode::READ_WRITE_APPEND_CREATE)
        .unwrap();
    handle.append(b"still here").unwrap();
    handle.close().unwrap();

    root.rename_directory("before rename", "after rename").unwrap();

    let renamed = filesystem.lock().get_directory("/after rename").unwrap();

    let handle = renamed.open_file("survivor.txt", FileMode::READ).unwrap();

    let mut contents = vec![0u8; 10];
    assert_eq!(handle.read(&mut contents).unwrap(), 10);
    assert_eq!(&contents, b"still here");

    handle.close().unwrap();
}
