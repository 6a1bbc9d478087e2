//! The FAT32 directory cluster engine.
//!
//! A directory is a cluster chain whose contents are a packed array of
//! 32-byte entries. Two cursor types walk that array: the cluster-entry
//! cursor exposes every raw slot and the directory-entry cursor groups long
//! filename slots with the standard entry that owns them. On top of the
//! cursors sit the find/create/remove operations and the bookkeeping they
//! need (empty-slot search, numeric-tail conflict resolution, chain
//! extension).

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use modular_bitfield::prelude::*;

use crate::errors::{CanFail, FilesystemError};
use crate::fs::fat32::blockio::Fat32BlockIoAdapter;
use crate::fs::fat32::datetime::{Fat32Date, Fat32Time, Fat32TimeHundredths};
use crate::fs::fat32::filenames::{
    Compact8Dot3Filename, LongFilename, ShortFilename,
};
use crate::fs::fat32::{
    ClusterIndex, FAT32_ENTRY_ALLOCATED_AND_EOF, FAT32_ENTRY_EOF_THRESHOLD, FAT32_ENTRY_FREE,
};
use crate::fs::{DirectoryEntry, DirectoryEntryInfo, EntryKind};
use crate::registry::ObjectUuid;
use crate::MAX_FAT32_SHORT_FILENAME_SEARCH_TABLE_SIZE;

/// First-byte sentinel of a slot that is unused and ends the directory.
pub const DIRECTORY_ENTRY_LAST_AND_UNUSED: u8 = 0x00;

/// First-byte sentinel of an unused (deleted) slot.
pub const DIRECTORY_ENTRY_UNUSED: u8 = 0xE5;

/// Attribute bits of a directory cluster entry.
pub mod attributes {
    pub const FILE: u8 = 0x00;
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;

    pub const LONG_FILENAME: u8 = READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID;
}

/// Maps a directory entry attribute byte onto the entry kind it describes.
pub fn kind_for_attributes(entry_attributes: u8) -> EntryKind {
    if entry_attributes & attributes::VOLUME_ID != 0 {
        return EntryKind::VOLUME_INFORMATION;
    }

    if entry_attributes & attributes::DIRECTORY != 0 {
        return EntryKind::DIRECTORY;
    }

    EntryKind::FILE
}

/// The address of a 32-byte slot: the cluster holding it and the slot index
/// within that cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryAddress {
    pub cluster: ClusterIndex,
    pub index: u32,
}

impl EntryAddress {
    pub fn new(cluster: ClusterIndex, index: u32) -> Self {
        Self { cluster, index }
    }
}

//
//  Directory entry - 32 bytes long on disk
//

/// A standard 32-byte directory entry.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct DirectoryClusterEntry {
    compact_name: Compact8Dot3Filename,
    attributes: u8,
    nt_reserved: u8,
    timestamp_hundredths: u8,
    timestamp_time: u16,
    timestamp_date: u16,
    last_access_date: u16,
    first_cluster_high_word: u16,
    time_of_last_write: u16,
    date_of_last_write: u16,
    first_cluster_low_word: u16,
    size: u32,
}

const _: () = assert!(core::mem::size_of::<DirectoryClusterEntry>() == 32);

impl DirectoryClusterEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        extension: &str,
        entry_attributes: u8,
        nt_reserved: u8,
        timestamp_hundredths: Fat32TimeHundredths,
        timestamp_time: Fat32Time,
        timestamp_date: Fat32Date,
        last_access_date: Fat32Date,
        first_cluster: ClusterIndex,
        time_of_last_write: Fat32Time,
        date_of_last_write: Fat32Date,
        size: u32,
    ) -> Self {
        Self {
            compact_name: Compact8Dot3Filename::new(name, extension),
            attributes: entry_attributes,
            nt_reserved,
            timestamp_hundredths: timestamp_hundredths.to_raw(),
            timestamp_time: timestamp_time.to_raw(),
            timestamp_date: timestamp_date.to_raw(),
            last_access_date: last_access_date.to_raw(),
            first_cluster_high_word: ((first_cluster.0 & 0xFFFF_0000) >> 16) as u16,
            time_of_last_write: time_of_last_write.to_raw(),
            date_of_last_write: date_of_last_write.to_raw(),
            first_cluster_low_word: (first_cluster.0 & 0x0000_FFFF) as u16,
            size,
        }
    }

    /// Overwrites the first name byte with one of the slot sentinels.
    pub fn set_directory_entry_flag(&mut self, flag: u8) {
        self.compact_name.name[0] = flag;
    }

    pub fn is_in_use(&self) -> bool {
        self.compact_name.first_char() != DIRECTORY_ENTRY_UNUSED
            && self.compact_name.first_char() != DIRECTORY_ENTRY_LAST_AND_UNUSED
    }

    pub fn is_unused(&self) -> bool {
        self.compact_name.first_char() == DIRECTORY_ENTRY_UNUSED
    }

    pub fn is_unused_and_end(&self) -> bool {
        self.compact_name.first_char() == DIRECTORY_ENTRY_LAST_AND_UNUSED
    }

    /// A standard entry is any in-use entry that is not a long filename
    /// slot.
    pub fn is_standard_entry(&self) -> bool {
        self.is_in_use() && self.attributes != attributes::LONG_FILENAME
    }

    pub fn is_long_filename_entry(&self) -> bool {
        self.is_in_use() && self.attributes == attributes::LONG_FILENAME
    }

    pub fn is_system_entry(&self) -> bool {
        self.is_in_use() && self.attributes & attributes::SYSTEM != 0
    }

    pub fn is_volume_information_entry(&self) -> bool {
        self.is_in_use() && self.attributes & attributes::VOLUME_ID != 0
    }

    pub fn is_directory_entry(&self) -> bool {
        self.is_in_use() && self.attributes & attributes::DIRECTORY != 0
    }

    pub fn is_file_entry(&self) -> bool {
        self.is_in_use()
            && self.attributes
                & (attributes::DIRECTORY | attributes::VOLUME_ID | attributes::SYSTEM)
                == 0
    }

    /// The kind of object the entry names, or `None` for slots that do not
    /// describe one.
    pub fn kind(&self) -> Option<EntryKind> {
        if self.is_file_entry() {
            Some(EntryKind::FILE)
        } else if self.is_directory_entry() {
            Some(EntryKind::DIRECTORY)
        } else if self.is_volume_information_entry() {
            Some(EntryKind::VOLUME_INFORMATION)
        } else {
            None
        }
    }

    pub fn compact_name(&self) -> &Compact8Dot3Filename {
        &self.compact_name
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    pub fn timestamp_hundredths(&self) -> Fat32TimeHundredths {
        Fat32TimeHundredths::from_raw(self.timestamp_hundredths)
    }

    pub fn timestamp_time(&self) -> Fat32Time {
        Fat32Time::from_raw(self.timestamp_time)
    }

    pub fn timestamp_date(&self) -> Fat32Date {
        Fat32Date::from_raw(self.timestamp_date)
    }

    pub fn last_access_date(&self) -> Fat32Date {
        Fat32Date::from_raw(self.last_access_date)
    }

    pub fn time_of_last_write(&self) -> Fat32Time {
        Fat32Time::from_raw(self.time_of_last_write)
    }

    pub fn date_of_last_write(&self) -> Fat32Date {
        Fat32Date::from_raw(self.date_of_last_write)
    }

    /// The first cluster of the object the entry references.
    ///
    /// When a `..` entry stores zero, the effective value is the root
    /// directory cluster; that is the on-disk convention for the parent of
    /// a top-level directory.
    pub fn first_cluster(&self, root_directory_cluster: ClusterIndex) -> ClusterIndex {
        let stored = (u32::from(self.first_cluster_high_word) << 16)
            | u32::from(self.first_cluster_low_word);

        if stored == 0 && self.compact_name.matches("..") {
            return root_directory_cluster;
        }

        ClusterIndex(stored)
    }

    pub fn set_first_cluster(&mut self, first_cluster: ClusterIndex) {
        self.first_cluster_high_word = ((first_cluster.0 & 0xFFFF_0000) >> 16) as u16;
        self.first_cluster_low_word = (first_cluster.0 & 0x0000_FFFF) as u16;
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_size(&mut self, new_size: u32) {
        self.size = new_size;
    }

    /// The entry's name as a working short filename.
    pub fn as_short_filename(&self) -> ShortFilename {
        ShortFilename::from_compact(&self.compact_name)
    }

    /// The `NAME.EXT` rendering of the compact name.
    pub fn compact_8_dot_3_filename(&self) -> String {
        self.compact_name.render()
    }

    /// The volume label held by a volume-information entry.
    pub fn volume_label(&self) -> String {
        self.compact_name.render_volume_label()
    }
}

impl core::fmt::Debug for DirectoryClusterEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let entry_attributes = self.attributes;
        let size = self.size;

        f.debug_struct("DirectoryClusterEntry")
            .field("name", &self.compact_name.render())
            .field("attributes", &entry_attributes)
            .field("size", &size)
            .finish()
    }
}

//
//  Long filename entry - 32 bytes long on disk, tagged by attribute 0x0F
//

/// The ordinal byte of a long filename slot: a five bit sequence number and
/// the flag marking the first (highest numbered) slot of a group.
#[bitfield(bits = 8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LfnSequenceNumber {
    pub sequence_number: B5,
    pub reserved_always_zero: B1,
    pub first_lfn_entry: B1,
    pub reserved: B1,
}

/// A long filename directory slot carrying 13 UCS-2 code units of the name.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct LfnClusterEntry {
    sequence_number: u8,
    name1: [u16; 5],
    attributes: u8,
    entry_type: u8,
    filename_checksum: u8,
    name2: [u16; 6],
    first_cluster: u16,
    name3: [u16; 2],
}

const _: () = assert!(core::mem::size_of::<LfnClusterEntry>() == 32);

impl LfnClusterEntry {
    /// Number of name characters stored by one slot.
    pub const CHARACTERS_IN_ENTRY: usize = 13;

    /// Builds a slot for one 13-character fragment of a long filename.
    ///
    /// Fragments shorter than 13 characters get a single 0x0000 terminator
    /// and 0xFFFF padding in the remaining positions.
    pub fn new(
        filename_fragment: &str,
        sequence_number: u32,
        first_entry: bool,
        checksum: u8,
    ) -> Self {
        let ordinal = LfnSequenceNumber::new()
            .with_sequence_number((sequence_number & 0x1F) as u8)
            .with_first_lfn_entry(u8::from(first_entry));

        let fragment = filename_fragment.as_bytes();

        let mut units = [0xFFFFu16; Self::CHARACTERS_IN_ENTRY];

        for index in 0..(fragment.len() + 1).min(Self::CHARACTERS_IN_ENTRY) {
            units[index] = if index < fragment.len() {
                u16::from(fragment[index])
            } else {
                0x0000
            };
        }

        let mut name1 = [0u16; 5];
        let mut name2 = [0u16; 6];
        let mut name3 = [0u16; 2];

        name1.copy_from_slice(&units[0..5]);
        name2.copy_from_slice(&units[5..11]);
        name3.copy_from_slice(&units[11..13]);

        Self {
            sequence_number: ordinal.into_bytes()[0],
            name1,
            attributes: attributes::LONG_FILENAME,
            entry_type: 0x00,
            filename_checksum: checksum,
            name2,
            first_cluster: 0x0000,
            name3,
        }
    }

    /// Decodes the ordinal byte.
    pub fn sequence_number(&self) -> LfnSequenceNumber {
        LfnSequenceNumber::from_bytes([self.sequence_number])
    }

    /// Returns `true` for the slot carrying the first-LFN flag, which is
    /// the highest numbered slot of its group.
    pub fn is_first_lfn_entry(&self) -> bool {
        self.sequence_number().first_lfn_entry() == 1
    }

    /// The checksum of the owning 8.3 name, repeated in every slot of a
    /// group.
    pub fn checksum(&self) -> u8 {
        self.filename_checksum
    }

    /// Appends this slot's fragment to `buffer`, stopping at the
    /// end-of-fragment markers.
    pub fn append_filename_part(&self, buffer: &mut String) {
        let name1 = self.name1;
        let name2 = self.name2;
        let name3 = self.name3;

        for unit in name1.iter().chain(name2.iter()).chain(name3.iter()) {
            match ucs2_to_ascii(*unit) {
                Some(current) => buffer.push(current),
                None => return,
            }
        }
    }
}

impl core::fmt::Debug for LfnClusterEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut fragment = String::new();
        self.append_filename_part(&mut fragment);

        f.debug_struct("LfnClusterEntry")
            .field("sequence", &self.sequence_number().sequence_number())
            .field("first", &self.is_first_lfn_entry())
            .field("fragment", &fragment)
            .finish()
    }
}

//  0x0000 and 0xFFFF end a fragment; anything outside the printable ASCII
//  range maps to an underscore.
fn ucs2_to_ascii(ucs2_char: u16) -> Option<char> {
    if ucs2_char == 0x0000 || ucs2_char == 0xFFFF {
        return None;
    }

    if (0x0020..=0x007E).contains(&ucs2_char) {
        return Some(ucs2_char as u8 as char);
    }

    Some('_')
}

fn cluster_entry_at(buffer: &[u8], index: u32) -> DirectoryClusterEntry {
    let offset = index as usize * core::mem::size_of::<DirectoryClusterEntry>();

    bytemuck::pod_read_unaligned(&buffer[offset..offset + 32])
}

fn lfn_entry_at(buffer: &[u8], index: u32) -> LfnClusterEntry {
    let offset = index as usize * core::mem::size_of::<LfnClusterEntry>();

    bytemuck::pod_read_unaligned(&buffer[offset..offset + 32])
}

fn write_cluster_entry(buffer: &mut [u8], index: u32, entry: &DirectoryClusterEntry) {
    let offset = index as usize * core::mem::size_of::<DirectoryClusterEntry>();

    buffer[offset..offset + 32].copy_from_slice(bytemuck::bytes_of(entry));
}

fn write_lfn_entry(buffer: &mut [u8], index: u32, entry: &LfnClusterEntry) {
    let offset = index as usize * core::mem::size_of::<LfnClusterEntry>();

    buffer[offset..offset + 32].copy_from_slice(bytemuck::bytes_of(entry));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Begin,
    Mid,
    End,
}

//  Shared cursor machinery: the position, the lazily refilled cluster
//  buffer, and the cluster-boundary crossing logic.
struct CursorState<'a> {
    adapter: &'a Fat32BlockIoAdapter,
    entries_per_cluster: u32,
    location: Location,
    buffer: Vec<u8>,
    buffer_is_empty: bool,
    current_entry: EntryAddress,
}

impl<'a> CursorState<'a> {
    fn new(
        adapter: &'a Fat32BlockIoAdapter,
        entries_per_cluster: u32,
        location: Location,
        current_entry: EntryAddress,
    ) -> Self {
        Self {
            adapter,
            entries_per_cluster,
            location,
            buffer: vec![0u8; adapter.bytes_per_cluster() as usize],
            buffer_is_empty: true,
            current_entry,
        }
    }

    fn read_buffer_if_empty(&mut self) -> CanFail<FilesystemError> {
        if self.buffer_is_empty {
            self.adapter
                .read_cluster(self.current_entry.cluster, &mut self.buffer)?;

            self.buffer_is_empty = false;
        }

        Ok(())
    }

    //  Steps to the next slot, following the FAT into the next cluster of
    //  the chain and stopping when the chain terminates.
    fn advance_current_entry(&mut self) -> CanFail<FilesystemError> {
        self.current_entry.index += 1;

        if self.current_entry.index >= self.entries_per_cluster {
            let next_cluster = self
                .adapter
                .next_cluster_in_chain(self.current_entry.cluster)?;

            if next_cluster == FAT32_ENTRY_ALLOCATED_AND_EOF {
                self.current_entry.index -= 1;
                self.location = Location::End;
                return Ok(());
            }

            self.current_entry.cluster = next_cluster;
            self.current_entry.index = 0;
            self.buffer_is_empty = true;
        }

        self.read_buffer_if_empty()
    }
}

/// Cursor over every 32-byte slot of a directory, in cluster order.
///
/// Does not interpret long filename groupings and does not stop at the
/// end-of-directory sentinel; it runs to the end of the cluster chain.
pub struct ClusterEntryCursor<'a> {
    state: CursorState<'a>,
}

impl<'a> ClusterEntryCursor<'a> {
    fn begin(adapter: &'a Fat32BlockIoAdapter, first_cluster: ClusterIndex) -> Self {
        let entries_per_cluster =
            adapter.bytes_per_cluster() / core::mem::size_of::<DirectoryClusterEntry>() as u32;

        Self {
            state: CursorState::new(
                adapter,
                entries_per_cluster,
                Location::Begin,
                EntryAddress::new(first_cluster, 0),
            ),
        }
    }

    /// Returns `true` once the cursor has stepped past the last slot.
    pub fn is_end(&self) -> bool {
        self.state.location == Location::End
    }

    /// Steps to the next slot.
    pub fn advance(&mut self) -> CanFail<FilesystemError> {
        match self.state.location {
            Location::Begin => {
                self.state.current_entry.index = 0;
                self.state.location = Location::Mid;
            }
            Location::Mid => self.state.advance_current_entry()?,
            Location::End => return Ok(()),
        }

        if self.state.location == Location::End {
            return Ok(());
        }

        self.state.read_buffer_if_empty()
    }

    /// Returns the slot under the cursor, positioning onto the first slot
    /// when the cursor has not moved yet.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32ClusterIteratorAtEnd`] past the last slot.
    pub fn as_cluster_entry(&mut self) -> Result<DirectoryClusterEntry, FilesystemError> {
        if self.state.location == Location::Begin {
            self.advance()?;
        }

        if self.state.location == Location::End {
            return Err(FilesystemError::Fat32ClusterIteratorAtEnd);
        }

        Ok(cluster_entry_at(
            &self.state.buffer,
            self.state.current_entry.index,
        ))
    }

    /// Returns the address of the slot under the cursor.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32ClusterIteratorAtEnd`] past the last slot.
    pub fn entry_address(&mut self) -> Result<EntryAddress, FilesystemError> {
        if self.state.location == Location::Begin {
            self.advance()?;
        }

        if self.state.location == Location::End {
            return Err(FilesystemError::Fat32ClusterIteratorAtEnd);
        }

        Ok(self.state.current_entry)
    }
}

/// Cursor over the directory entries of a directory: each step lands on a
/// standard entry, with the long filename slots preceding it accumulated
/// for name reassembly.
///
/// The cursor halts on a slot whose first byte is 0x00, the physical end of
/// the directory.
pub struct DirectoryEntryCursor<'a> {
    state: CursorState<'a>,
    filesystem_uuid: ObjectUuid,
    lfn_entries: Vec<LfnClusterEntry>,
}

impl<'a> DirectoryEntryCursor<'a> {
    fn begin(
        adapter: &'a Fat32BlockIoAdapter,
        filesystem_uuid: ObjectUuid,
        first_cluster: ClusterIndex,
    ) -> Self {
        let entries_per_cluster =
            adapter.bytes_per_cluster() / core::mem::size_of::<DirectoryClusterEntry>() as u32;

        Self {
            state: CursorState::new(
                adapter,
                entries_per_cluster,
                Location::Begin,
                EntryAddress::new(first_cluster, 0),
            ),
            filesystem_uuid,
            lfn_entries: Vec::new(),
        }
    }

    fn positioned(
        adapter: &'a Fat32BlockIoAdapter,
        filesystem_uuid: ObjectUuid,
        address: EntryAddress,
    ) -> Self {
        let entries_per_cluster =
            adapter.bytes_per_cluster() / core::mem::size_of::<DirectoryClusterEntry>() as u32;

        Self {
            state: CursorState::new(adapter, entries_per_cluster, Location::Mid, address),
            filesystem_uuid,
            lfn_entries: Vec::new(),
        }
    }

    /// Returns `true` once the cursor has reached the physical end of the
    /// directory.
    pub fn is_end(&self) -> bool {
        self.state.location == Location::End
    }

    /// Steps past the current entry group onto the next standard entry.
    pub fn advance(&mut self) -> CanFail<FilesystemError> {
        match self.state.location {
            Location::Begin => {
                self.state.current_entry.index = 0;
                self.state.location = Location::Mid;
            }
            Location::Mid => self.state.advance_current_entry()?,
            Location::End => return Ok(()),
        }

        if self.state.location == Location::End {
            return Ok(());
        }

        self.state.read_buffer_if_empty()?;

        self.lfn_entries.clear();

        //  Walk slots, accumulating long filename entries until a standard
        //  entry owns them. Any other slot in between resets the
        //  accumulator; the 0x00 sentinel ends the directory.

        while self.state.location != Location::End {
            let entry = cluster_entry_at(&self.state.buffer, self.state.current_entry.index);

            if entry.is_standard_entry() {
                self.state.location = Location::Mid;
                return Ok(());
            }

            if entry.is_long_filename_entry() {
                self.lfn_entries.push(lfn_entry_at(
                    &self.state.buffer,
                    self.state.current_entry.index,
                ));
            } else {
                self.lfn_entries.clear();
            }

            if entry.is_unused_and_end() {
                self.state.location = Location::End;
                break;
            }

            self.state.advance_current_entry()?;
        }

        Ok(())
    }

    /// Returns the standard entry under the cursor.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DirectoryIteratorAtEnd`] at the end of the
    /// directory.
    pub fn as_cluster_entry(&mut self) -> Result<DirectoryClusterEntry, FilesystemError> {
        if self.state.location == Location::Begin {
            self.advance()?;
        }

        if self.state.location == Location::End {
            return Err(FilesystemError::Fat32DirectoryIteratorAtEnd);
        }

        self.state.read_buffer_if_empty()?;

        Ok(cluster_entry_at(
            &self.state.buffer,
            self.state.current_entry.index,
        ))
    }

    /// Returns the address of the standard entry under the cursor.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DirectoryIteratorAtEnd`] at the end of the
    /// directory.
    pub fn entry_address(&mut self) -> Result<EntryAddress, FilesystemError> {
        if self.state.location == Location::Begin {
            self.advance()?;
        }

        if self.state.location == Location::End {
            return Err(FilesystemError::Fat32DirectoryIteratorAtEnd);
        }

        Ok(self.state.current_entry)
    }

    /// Builds the caller-facing [`DirectoryEntry`] for the entry under the
    /// cursor.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DirectoryIteratorAtEnd`] at the end of the
    /// directory.
    pub fn as_directory_entry(&mut self) -> Result<DirectoryEntry, FilesystemError> {
        let entry = self.as_cluster_entry()?;

        let name = self.reassembled_name(&entry);
        let extension = extension_of(&entry, &name);

        let info = DirectoryEntryInfo::Fat32 {
            entry_address: self.state.current_entry,
            root_directory_cluster: self.state.adapter.root_directory_cluster(),
            cluster_entry: entry,
        };

        Ok(DirectoryEntry::new(
            self.filesystem_uuid,
            entry.kind().unwrap_or(EntryKind::FILE),
            name,
            extension,
            entry.attributes(),
            entry.size(),
            info,
        ))
    }

    //  The long filename is held in the slots in front of the standard
    //  entry, highest sequence number first; the accumulator therefore
    //  replays in reverse to produce the name front to back. No accumulated
    //  slots means the entry only has its 8.3 name (or is the volume
    //  label).
    fn reassembled_name(&self, entry: &DirectoryClusterEntry) -> String {
        let mut name = String::new();

        for lfn_entry in self.lfn_entries.iter().rev() {
            lfn_entry.append_filename_part(&mut name);
        }

        if name.is_empty() {
            if entry.is_volume_information_entry() {
                name = entry.volume_label();
            } else {
                name = entry.compact_8_dot_3_filename();
            }
        }

        name
    }
}

fn extension_of(entry: &DirectoryClusterEntry, name: &str) -> String {
    if entry.is_file_entry() || entry.is_directory_entry() {
        if let Some(period_location) = name.rfind('.') {
            return String::from(&name[period_location + 1..]);
        }
    }

    String::new()
}

/// One directory of a FAT32 volume, addressed by its first cluster.
///
/// All slot-level operations live here; the directory object in
/// [`directory`](crate::fs::fat32::directory) drives them.
pub struct DirectoryCluster<'fs> {
    filesystem_uuid: ObjectUuid,
    adapter: &'fs mut Fat32BlockIoAdapter,
    first_cluster: ClusterIndex,
    entries_per_cluster: u32,
}

impl<'fs> DirectoryCluster<'fs> {
    pub fn new(
        filesystem_uuid: ObjectUuid,
        adapter: &'fs mut Fat32BlockIoAdapter,
        first_cluster: ClusterIndex,
    ) -> Self {
        let entries_per_cluster =
            adapter.bytes_per_cluster() / core::mem::size_of::<DirectoryClusterEntry>() as u32;

        Self {
            filesystem_uuid,
            adapter,
            first_cluster,
            entries_per_cluster,
        }
    }

    /// Repoints the object at a different directory.
    pub fn move_to_directory(&mut self, new_first_cluster: ClusterIndex) {
        self.first_cluster = new_first_cluster;
    }

    /// Returns a cursor over every raw slot.
    pub fn cluster_entries(&self) -> ClusterEntryCursor<'_> {
        ClusterEntryCursor::begin(self.adapter, self.first_cluster)
    }

    /// Returns a cursor over the directory entries.
    pub fn directory_entries(&self) -> DirectoryEntryCursor<'_> {
        DirectoryEntryCursor::begin(self.adapter, self.filesystem_uuid, self.first_cluster)
    }

    /// Finds a directory entry matching the kind filter and, when given,
    /// the name filter. Names compare case-insensitively against the
    /// reassembled long filename or the compact 8.3 name, whichever the
    /// entry carries.
    ///
    /// Returns the cursor positioned at the match, or at the end when
    /// nothing matched.
    pub fn find_directory_entry(
        &self,
        type_filter: EntryKind,
        name_filter: Option<&str>,
    ) -> Result<DirectoryEntryCursor<'_>, FilesystemError> {
        let mut cursor = self.directory_entries();

        while !cursor.is_end() {
            let entry = match cursor.as_cluster_entry() {
                Ok(entry) => entry,
                Err(FilesystemError::Fat32DirectoryIteratorAtEnd) => break,
                Err(code) => return Err(code),
            };

            let matches_kind = entry
                .kind()
                .map(|kind| type_filter.intersects(kind))
                .unwrap_or(false);

            if matches_kind {
                match name_filter {
                    Some(name_filter) => {
                        let name = cursor.reassembled_name(&entry);

                        if name.eq_ignore_ascii_case(name_filter) {
                            return Ok(cursor);
                        }
                    }
                    None => return Ok(cursor),
                }
            }

            cursor.advance()?;
        }

        Ok(cursor)
    }

    /// Creates a directory entry for `name`.
    ///
    /// The pipeline: validate the long filename, reject duplicates, derive
    /// the short name (directly for 8.3-compliant names, otherwise basis
    /// name plus numeric-tail conflict resolution and a long filename
    /// sequence), then write the slots.
    #[allow(clippy::too_many_arguments)]
    pub fn create_entry(
        &mut self,
        name: &str,
        entry_attributes: u8,
        timestamp_hundredths: Fat32TimeHundredths,
        timestamp_time: Fat32Time,
        timestamp_date: Fat32Date,
        last_access_date: Fat32Date,
        first_cluster: ClusterIndex,
        time_of_last_write: Fat32Time,
        date_of_last_write: Fat32Date,
        size: u32,
    ) -> Result<DirectoryEntry, FilesystemError> {
        let long_filename = LongFilename::new(name);

        long_filename.is_valid()?;

        {
            let existing = self.find_directory_entry(
                kind_for_attributes(entry_attributes),
                Some(long_filename.name()),
            )?;

            if !existing.is_end() {
                return Err(FilesystemError::FilenameAlreadyInUse);
            }
        }

        //  An 8.3-compliant long filename needs no LFN sequence; anything
        //  else gets the basis name, a conflict-free numeric tail and the
        //  LFN slots carrying the long name.

        let mut lfn_entries = Vec::new();

        let short_filename = match long_filename.as_8_dot_3() {
            Some(short_filename) => short_filename,
            None => {
                let mut short_filename = long_filename.basis_name();

                self.ensure_short_filename_does_not_conflict(&mut short_filename)?;

                lfn_entries =
                    create_lfn_sequence(&long_filename, short_filename.checksum());

                short_filename
            }
        };

        let cluster_entry = DirectoryClusterEntry::new(
            short_filename.name(),
            short_filename.extension(),
            entry_attributes,
            0,
            timestamp_hundredths,
            timestamp_time,
            timestamp_date,
            last_access_date,
            first_cluster,
            time_of_last_write,
            date_of_last_write,
            size,
        );

        self.write_lfn_sequence_and_cluster_entry(&cluster_entry, &lfn_entries)
    }

    /// Creates an entry with a new name and first cluster, copying every
    /// remaining field from an existing entry. This is the write half of a
    /// rename.
    pub fn create_entry_from_existing(
        &mut self,
        name: &str,
        first_cluster: ClusterIndex,
        existing_entry: &DirectoryClusterEntry,
    ) -> Result<DirectoryEntry, FilesystemError> {
        self.create_entry(
            name,
            existing_entry.attributes(),
            existing_entry.timestamp_hundredths(),
            existing_entry.timestamp_time(),
            existing_entry.timestamp_date(),
            existing_entry.last_access_date(),
            first_cluster,
            existing_entry.time_of_last_write(),
            existing_entry.date_of_last_write(),
            existing_entry.size(),
        )
    }

    /// Reads the slot at `address`.
    pub fn get_cluster_entry(
        &self,
        address: EntryAddress,
    ) -> Result<DirectoryClusterEntry, FilesystemError> {
        let mut buffer = vec![0u8; self.adapter.bytes_per_cluster() as usize];

        self.adapter.read_cluster(address.cluster, &mut buffer)?;

        Ok(cluster_entry_at(&buffer, address.index))
    }

    /// Removes the entry at `address`: marks the standard slot unused,
    /// clears its stored first cluster, then walks backward scrubbing the
    /// long filename slots of the group, crossing into the previous
    /// cluster of the chain when needed.
    pub fn remove_entry(&mut self, address: EntryAddress) -> CanFail<FilesystemError> {
        let mut buffer = vec![0u8; self.adapter.bytes_per_cluster() as usize];

        let mut current_entry = address;

        self.adapter.read_cluster(current_entry.cluster, &mut buffer)?;

        let mut entry = cluster_entry_at(&buffer, current_entry.index);

        entry.set_directory_entry_flag(DIRECTORY_ENTRY_UNUSED);
        entry.set_first_cluster(FAT32_ENTRY_FREE);
        write_cluster_entry(&mut buffer, current_entry.index, &entry);

        let mut still_deleting = true;
        let mut buffer_dirty = true;

        while still_deleting {
            if current_entry.index == 0 {
                //  Nothing precedes the very first slot of the directory

                if current_entry.cluster == self.first_cluster {
                    break;
                }

                //  Crossing into the previous cluster; flush changes first

                self.adapter.write_cluster(current_entry.cluster, &buffer)?;
                buffer_dirty = false;

                let previous_cluster = self
                    .adapter
                    .previous_cluster_in_chain(self.first_cluster, current_entry.cluster)?;

                current_entry.cluster = previous_cluster;
                current_entry.index = self.entries_per_cluster - 1;

                self.adapter.read_cluster(current_entry.cluster, &mut buffer)?;
            } else {
                current_entry.index -= 1;
            }

            let preceding = cluster_entry_at(&buffer, current_entry.index);

            if preceding.is_long_filename_entry() {
                still_deleting =
                    !lfn_entry_at(&buffer, current_entry.index).is_first_lfn_entry();

                let mut scrubbed = preceding;
                scrubbed.set_directory_entry_flag(DIRECTORY_ENTRY_UNUSED);
                write_cluster_entry(&mut buffer, current_entry.index, &scrubbed);

                buffer_dirty = true;
            } else {
                still_deleting = false;
            }
        }

        if buffer_dirty {
            self.adapter.write_cluster(current_entry.cluster, &buffer)?;
        }

        Ok(())
    }

    /// Writes a freshly initialized directory cluster: zeroed except for
    /// the `.` entry pointing at `cluster_index` and the `..` entry
    /// pointing at `dot_dot_cluster_index`. A `..` referring to the root
    /// directory stores zero, per the on-disk convention.
    pub fn write_empty_directory_cluster(
        &mut self,
        cluster_index: ClusterIndex,
        dot_dot_cluster_index: ClusterIndex,
    ) -> CanFail<FilesystemError> {
        let mut buffer = vec![0u8; self.adapter.bytes_per_cluster() as usize];

        let dot_dot_cluster_index = if dot_dot_cluster_index == self.adapter.root_directory_cluster()
        {
            ClusterIndex(0)
        } else {
            dot_dot_cluster_index
        };

        let dot_entry = DirectoryClusterEntry::new(
            ".",
            "",
            attributes::DIRECTORY,
            0,
            Fat32TimeHundredths::new(0),
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            Fat32Date::from_ymd(1980, 1, 1),
            cluster_index,
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            0,
        );

        let dot_dot_entry = DirectoryClusterEntry::new(
            "..",
            "",
            attributes::DIRECTORY,
            0,
            Fat32TimeHundredths::new(0),
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            Fat32Date::from_ymd(1980, 1, 1),
            dot_dot_cluster_index,
            Fat32Time::from_hms(0, 0, 0),
            Fat32Date::from_ymd(1980, 1, 1),
            0,
        );

        write_cluster_entry(&mut buffer, 0, &dot_entry);
        write_cluster_entry(&mut buffer, 1, &dot_dot_entry);

        self.adapter.write_cluster(cluster_index, &buffer)
    }

    /// Extends the directory by one cluster: finds a free cluster, zeroes
    /// it, links the current chain tail to it and marks it as the new end
    /// of the chain. A failure to mark the new cluster rolls the tail link
    /// back so the new cluster is not leaked into the chain.
    pub fn add_new_cluster(&mut self) -> CanFail<FilesystemError> {
        let next_empty_cluster = self.adapter.find_next_empty_cluster(FAT32_ENTRY_FREE)?;

        let zeroed = vec![0u8; self.adapter.bytes_per_cluster() as usize];

        self.adapter.write_cluster(next_empty_cluster, &zeroed)?;

        //  Walk the chain to its tail

        let mut current_entry = self.first_cluster;

        loop {
            let next_entry = self.adapter.next_cluster_in_chain(current_entry)?;

            if next_entry >= FAT32_ENTRY_EOF_THRESHOLD {
                break;
            }

            current_entry = next_entry;
        }

        self.adapter
            .update_fat_table_entry(current_entry, next_empty_cluster)?;

        if let Err(code) = self
            .adapter
            .update_fat_table_entry(next_empty_cluster, FAT32_ENTRY_ALLOCATED_AND_EOF)
        {
            debug!(
                "failed to mark new directory cluster {}, rolling back tail link from {}",
                next_empty_cluster.0, current_entry.0
            );

            self.adapter
                .update_fat_table_entry(current_entry, FAT32_ENTRY_ALLOCATED_AND_EOF)?;

            return Err(code);
        }

        Ok(())
    }

    //  Guarantees the short filename's numeric tail does not collide with
    //  any derivative already present. Tails are bucketed in fixed-size
    //  windows; the smallest unused tail of the first window with a free
    //  slot wins. Tail zero is never assigned.
    fn ensure_short_filename_does_not_conflict(
        &self,
        short_filename: &mut ShortFilename,
    ) -> CanFail<FilesystemError> {
        const WINDOW: u32 = MAX_FAT32_SHORT_FILENAME_SEARCH_TABLE_SIZE as u32;

        //  The derivative test requires a tail on both sides; seed one.

        if short_filename.numeric_tail().is_none() {
            short_filename.add_numeric_tail(1)?;
        }

        let mut offset = 0u32;

        loop {
            let mut index_in_use = [false; MAX_FAT32_SHORT_FILENAME_SEARCH_TABLE_SIZE];

            let mut cursor = self.directory_entries();

            while !cursor.is_end() {
                let entry = match cursor.as_cluster_entry() {
                    Ok(entry) => entry,
                    Err(FilesystemError::Fat32DirectoryIteratorAtEnd) => break,
                    Err(code) => return Err(code),
                };

                if entry.is_file_entry() || entry.is_directory_entry() {
                    let entry_short_filename = entry.as_short_filename();

                    if entry_short_filename.is_derivative_of_basis(short_filename) {
                        if let Some(tail) = entry_short_filename.numeric_tail() {
                            if tail >= offset && tail < offset + WINDOW {
                                index_in_use[(tail - offset) as usize] = true;
                            }
                        }
                    }
                }

                cursor.advance()?;
            }

            //  Tail zero is never used, so index zero of the first window
            //  is skipped.

            let first_candidate = if offset == 0 { 1 } else { 0 };

            for index in first_candidate..WINDOW {
                if !index_in_use[index as usize] {
                    return short_filename.add_numeric_tail(index + offset);
                }
            }

            offset += WINDOW;
        }
    }

    //  Searches for a contiguous run of empty slots, extending the
    //  directory by a cluster and retrying when none is found. The retry
    //  count is bounded so a request larger than two fresh clusters cannot
    //  loop forever.
    fn find_empty_block_of_entries(
        &mut self,
        num_entries_required: u32,
    ) -> Result<EntryAddress, FilesystemError> {
        debug!("searching for an empty block of {num_entries_required} directory entries");

        for _retry in 0..3 {
            let mut current_count = 0u32;
            let mut current_start_address = EntryAddress::default();

            {
                let mut cursor = self.cluster_entries();

                while !cursor.is_end() {
                    let entry = match cursor.as_cluster_entry() {
                        Ok(entry) => entry,
                        Err(FilesystemError::Fat32ClusterIteratorAtEnd) => break,
                        Err(code) => return Err(code),
                    };

                    if entry.is_unused() || entry.is_unused_and_end() {
                        if current_count == 0 {
                            current_start_address = cursor.entry_address()?;
                        }

                        current_count += 1;

                        if current_count >= num_entries_required {
                            return Ok(current_start_address);
                        }
                    } else {
                        current_count = 0;
                    }

                    cursor.advance()?;
                }
            }

            self.add_new_cluster()?;
        }

        Err(FilesystemError::Fat32UnableToFindEmptyBlockOfDirectoryEntries)
    }

    //  Writes the long filename slots followed by the standard slot. The
    //  group needs lfn count + 2 free slots: one for the standard entry and
    //  one slot of slack so the 0x00 end-of-directory sentinel can be
    //  pushed forward when the group lands on it.
    fn write_lfn_sequence_and_cluster_entry(
        &mut self,
        cluster_entry: &DirectoryClusterEntry,
        lfn_entries: &[LfnClusterEntry],
    ) -> Result<DirectoryEntry, FilesystemError> {
        let empty_block_address =
            self.find_empty_block_of_entries(lfn_entries.len() as u32 + 2)?;

        let mut buffer = vec![0u8; self.adapter.bytes_per_cluster() as usize];

        self.adapter
            .read_cluster(empty_block_address.cluster, &mut buffer)?;

        let mut is_end_of_directory_entries = false;

        let mut current_cluster = empty_block_address.cluster;
        let mut current_index = empty_block_address.index;

        for lfn_entry in lfn_entries {
            is_end_of_directory_entries |=
                cluster_entry_at(&buffer, current_index).is_unused_and_end();

            write_lfn_entry(&mut buffer, current_index, lfn_entry);
            current_index += 1;

            if current_index >= self.entries_per_cluster {
                self.adapter.write_cluster(current_cluster, &buffer)?;

                let next_cluster = self.adapter.next_cluster_in_chain(current_cluster)?;

                if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                    //  The empty block search guaranteed the chain holds
                    //  the whole group; the volume is corrupt otherwise.

                    return Err(FilesystemError::Fat32ClusterOutOfRange);
                }

                current_cluster = next_cluster;

                self.adapter.read_cluster(current_cluster, &mut buffer)?;
                current_index = 0;
            }
        }

        let directory_entry_address = EntryAddress::new(current_cluster, current_index);

        is_end_of_directory_entries |=
            cluster_entry_at(&buffer, current_index).is_unused_and_end();

        write_cluster_entry(&mut buffer, current_index, cluster_entry);
        current_index += 1;

        if current_index >= self.entries_per_cluster {
            self.adapter.write_cluster(current_cluster, &buffer)?;

            let next_cluster = self.adapter.next_cluster_in_chain(current_cluster)?;

            if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                return Err(FilesystemError::Fat32ClusterOutOfRange);
            }

            current_cluster = next_cluster;

            self.adapter.read_cluster(current_cluster, &mut buffer)?;
            current_index = 0;
        }

        //  If the group overwrote the end-of-directory sentinel, it has to
        //  be re-established one slot past the new entry.

        if is_end_of_directory_entries {
            buffer[current_index as usize * core::mem::size_of::<DirectoryClusterEntry>()] =
                DIRECTORY_ENTRY_LAST_AND_UNUSED;
        }

        self.adapter.write_cluster(current_cluster, &buffer)?;

        let mut new_entry_cursor = DirectoryEntryCursor::positioned(
            self.adapter,
            self.filesystem_uuid,
            directory_entry_address,
        );

        new_entry_cursor.as_directory_entry()
    }
}

//  Read/modify/write of a single 32-byte slot, used to persist size and
//  first-cluster updates from the file layer.
pub(crate) fn cluster_entry_at_address(
    adapter: &Fat32BlockIoAdapter,
    address: EntryAddress,
    mutate: impl FnOnce(&mut DirectoryClusterEntry),
) -> CanFail<FilesystemError> {
    let mut buffer = vec![0u8; adapter.bytes_per_cluster() as usize];

    adapter.read_cluster(address.cluster, &mut buffer)?;

    let mut entry = cluster_entry_at(&buffer, address.index);

    mutate(&mut entry);

    write_cluster_entry(&mut buffer, address.index, &entry);

    adapter.write_cluster(address.cluster, &buffer)
}

/// Splits a long filename into its LFN slots: ceil(len / 13) fragments,
/// emitted highest sequence number first with the first-LFN flag on the
/// leading slot.
pub fn create_lfn_sequence(filename: &LongFilename, checksum: u8) -> Vec<LfnClusterEntry> {
    let mut lfn_entries = Vec::new();

    let characters = LfnClusterEntry::CHARACTERS_IN_ENTRY;

    let mut num_entries = filename.len() / characters;

    if filename.len() % characters > 0 {
        num_entries += 1;
    }

    for index in (0..num_entries).rev() {
        let fragment_start = index * characters;
        let fragment_end = (fragment_start + characters).min(filename.len());
        let fragment = &filename.name()[fragment_start..fragment_end];

        lfn_entries.push(LfnClusterEntry::new(
            fragment,
            index as u32 + 1,
            index == num_entries - 1,
            checksum,
        ));
    }

    lfn_entries
}
