//! The FAT32 block I/O adapter.
//!
//! Within this module there are fields with `sector` in their name.
//! Functionally, `sector` and `block` are synonymous; `sector` is kept where
//! the Microsoft FAT documentation uses it so the code lines up with the
//! format specification. To the layers above, the unit of addressing is the
//! cluster, a run of consecutive sectors.

use alloc::string::String;
use alloc::vec;

use log::{debug, error};

use crate::devices::block::SharedBlockDevice;
use crate::errors::{CanFail, FilesystemError};
use crate::fs::fat32::bpb::BiosParameterBlock;
use crate::fs::fat32::{
    ClusterIndex, FAT32_ENTRY_DEFECTIVE, FAT32_ENTRY_EOF_THRESHOLD, FAT32_ENTRY_FREE,
};

/// Maps clusters onto sectors of a block device and owns every access to
/// the File Allocation Table.
///
/// FAT entries are read and updated one sector at a time; there is no
/// multi-sector atomicity and no retry at this layer.
pub struct Fat32BlockIoAdapter {
    io_device: SharedBlockDevice,
    device_name: String,
    block_size: u32,

    root_directory_cluster: ClusterIndex,
    logical_sectors_per_cluster: u32,
    bytes_per_sector: u32,

    sectors_per_fat: u32,

    first_lba_sector: u32,
    fat_lba: u32,
    data_lba: u32,

    fat32_entries_per_block: u32,

    last_empty_cluster_found: ClusterIndex,
}

impl Fat32BlockIoAdapter {
    /// Mounts a FAT32 volume that starts at `first_lba_sector` of the
    /// given device.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32UnableToReadFirstLogicalBlockAddressingSector`]
    /// when the first sector cannot be read, and the parameter block's own
    /// errors when it does not describe a FAT32 volume.
    pub fn mount(
        io_device: SharedBlockDevice,
        first_lba_sector: u32,
    ) -> Result<Self, FilesystemError> {
        let (device_name, block_size, bpb) = {
            let mut device = io_device.lock();

            let block_size = device.block_size();
            let mut first_sector = vec![0u8; block_size as usize];

            if device
                .read_blocks(&mut first_sector, first_lba_sector, 1)
                .is_err()
            {
                error!("unable to read the first sector of the FAT32 volume");
                return Err(
                    FilesystemError::Fat32UnableToReadFirstLogicalBlockAddressingSector,
                );
            }

            (
                String::from(device.name()),
                block_size,
                BiosParameterBlock::decode(&first_sector)?,
            )
        };

        //  Compute the sector offsets for the FAT and data regions

        let fat_lba = first_lba_sector + bpb.reserved_sectors();
        let data_lba = fat_lba + bpb.number_of_fats() * bpb.sectors_per_fat();

        debug!(
            "fat32 volume geometry: first_lba = {first_lba_sector}    fat_lba = {fat_lba}    data_lba = {data_lba}    root_cluster = {}",
            bpb.root_directory_cluster()
        );

        Ok(Self {
            io_device,
            device_name,
            block_size,
            root_directory_cluster: ClusterIndex(bpb.root_directory_cluster()),
            logical_sectors_per_cluster: bpb.logical_sectors_per_cluster(),
            bytes_per_sector: bpb.bytes_per_sector(),
            sectors_per_fat: bpb.sectors_per_fat(),
            first_lba_sector,
            fat_lba,
            data_lba,
            fat32_entries_per_block: block_size / core::mem::size_of::<u32>() as u32,
            last_empty_cluster_found: FAT32_ENTRY_FREE,
        })
    }

    /// Returns the name of the underlying I/O device.
    pub fn name(&self) -> &str {
        &self.device_name
    }

    /// Returns the block size of the underlying I/O device, in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Returns the number of FAT entries held by one block.
    pub fn fat_entries_per_block(&self) -> u32 {
        self.fat32_entries_per_block
    }

    /// Returns the number of logical sectors per cluster.
    pub fn logical_sectors_per_cluster(&self) -> u32 {
        self.logical_sectors_per_cluster
    }

    /// Returns the number of bytes per logical sector, from the parameter
    /// block.
    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    /// Returns the number of bytes per cluster.
    pub fn bytes_per_cluster(&self) -> u32 {
        self.block_size * self.logical_sectors_per_cluster
    }

    /// Returns the first cluster of the root directory.
    pub fn root_directory_cluster(&self) -> ClusterIndex {
        self.root_directory_cluster
    }

    /// Returns the number of sectors occupied by one FAT.
    pub fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    /// Returns the first sector of the volume.
    pub fn first_lba_sector(&self) -> u32 {
        self.first_lba_sector
    }

    /// Returns the largest cluster number addressable through the FAT.
    pub fn maximum_cluster_number(&self) -> ClusterIndex {
        ClusterIndex(self.sectors_per_fat * self.fat32_entries_per_block)
    }

    /// Reads one cluster into `buffer`, which must hold
    /// [`bytes_per_cluster`](Self::bytes_per_cluster) bytes.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DeviceReadError`] on a failed transfer.
    pub fn read_cluster(&self, cluster: ClusterIndex, buffer: &mut [u8]) -> CanFail<FilesystemError> {
        let sector = self.fat_cluster_to_sector(cluster);

        self.io_device
            .lock()
            .read_blocks(buffer, sector, self.logical_sectors_per_cluster)
            .map_err(|_| FilesystemError::Fat32DeviceReadError)?;

        Ok(())
    }

    /// Writes one cluster from `buffer`.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DeviceWriteError`] on a failed transfer.
    pub fn write_cluster(&self, cluster: ClusterIndex, buffer: &[u8]) -> CanFail<FilesystemError> {
        let sector = self.fat_cluster_to_sector(cluster);

        self.io_device
            .lock()
            .write_blocks(buffer, sector, self.logical_sectors_per_cluster)
            .map_err(|_| FilesystemError::Fat32DeviceWriteError)?;

        Ok(())
    }

    /// Returns the FAT entry for `cluster`, which is the next cluster in
    /// its chain or one of the reserved marker values.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32ClusterOutOfRange`] for an unaddressable
    /// cluster, [`FilesystemError::Fat32UnableToReadFatTableSector`] when
    /// the FAT sector cannot be read.
    pub fn next_cluster_in_chain(&self, cluster: ClusterIndex) -> Result<ClusterIndex, FilesystemError> {
        //  Do not try to read past the end of the FAT table

        if self.is_cluster_out_of_range(cluster) {
            return Err(FilesystemError::Fat32ClusterOutOfRange);
        }

        let mut fat_sector = vec![0u8; self.block_size as usize];

        self.read_fat_block(cluster, &mut fat_sector)?;

        let offset = cluster.0 % self.fat32_entries_per_block;

        Ok(fat_entry_at(&fat_sector, offset))
    }

    /// Walks the chain from `first_cluster` forward until it finds the
    /// cluster linking to `cluster`, and returns it.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32AlreadyAtFirstCluster`] when `cluster` is
    /// the chain head, [`FilesystemError::Fat32ClusterNotPresentInChain`]
    /// when the chain terminates without reaching `cluster`.
    pub fn previous_cluster_in_chain(
        &self,
        first_cluster: ClusterIndex,
        cluster: ClusterIndex,
    ) -> Result<ClusterIndex, FilesystemError> {
        if self.is_cluster_out_of_range(first_cluster) || self.is_cluster_out_of_range(cluster) {
            return Err(FilesystemError::Fat32ClusterOutOfRange);
        }

        //  We cannot move in front of the first cluster

        if cluster == first_cluster {
            return Err(FilesystemError::Fat32AlreadyAtFirstCluster);
        }

        //  No other way to do this than to start at the beginning and search
        //  for the cluster

        let mut current_cluster = first_cluster;

        loop {
            let next_cluster = self.next_cluster_in_chain(current_cluster)?;

            if next_cluster == cluster {
                return Ok(current_cluster);
            }

            if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                break;
            }

            current_cluster = next_cluster;
        }

        Err(FilesystemError::Fat32ClusterNotPresentInChain)
    }

    /// Updates the FAT entry of `cluster` with `new_value`. This is the
    /// single write path for the FAT: chains are extended by linking a new
    /// cluster and released by writing the free marker.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32ClusterOutOfRange`] when either argument is
    /// unaddressable (a zero `new_value` is permitted), and the FAT sector
    /// read/write wrappers on device failures.
    pub fn update_fat_table_entry(
        &self,
        cluster: ClusterIndex,
        new_value: ClusterIndex,
    ) -> CanFail<FilesystemError> {
        debug!(
            "updating FAT entry {} with value {:#010x}",
            cluster.0, new_value.0
        );

        //  Stay inside the bounds of the FAT table. Writing a zero value
        //  (the free marker) has to be permitted though.

        if self.is_cluster_out_of_range(cluster)
            || (new_value != FAT32_ENTRY_FREE && self.is_cluster_out_of_range(new_value))
        {
            return Err(FilesystemError::Fat32ClusterOutOfRange);
        }

        let sector = self.fat_lba + (cluster.0 / self.fat32_entries_per_block);
        let offset = cluster.0 % self.fat32_entries_per_block;

        let mut fat_sector = vec![0u8; self.block_size as usize];

        //  FAT entries are only one sector at a time - they are not clustered

        if self
            .io_device
            .lock()
            .read_blocks(&mut fat_sector, sector, 1)
            .is_err()
        {
            debug!("unable to load FAT32 sector {sector}");
            return Err(FilesystemError::Fat32UnableToReadFatTableSector);
        }

        set_fat_entry(&mut fat_sector, offset, new_value);

        if self
            .io_device
            .lock()
            .write_blocks(&fat_sector, sector, 1)
            .is_err()
        {
            debug!("unable to write FAT32 sector {sector}");
            return Err(FilesystemError::Fat32UnableToWriteFatTableSector);
        }

        Ok(())
    }

    /// Scans the FAT forward for the first free entry.
    ///
    /// A zero `starting_cluster` starts from the highest empty cluster
    /// found so far, or the root directory cluster when the hint is still
    /// cold.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32DeviceFull`] when the scan reaches the end
    /// of the FAT without finding a free entry.
    pub fn find_next_empty_cluster(
        &mut self,
        starting_cluster: ClusterIndex,
    ) -> Result<ClusterIndex, FilesystemError> {
        let mut starting_cluster = starting_cluster;

        if starting_cluster == FAT32_ENTRY_FREE {
            starting_cluster = if self.last_empty_cluster_found > self.root_directory_cluster {
                self.last_empty_cluster_found
            } else {
                self.root_directory_cluster
            };
        }

        if self.is_cluster_out_of_range(starting_cluster) {
            return Err(FilesystemError::Fat32ClusterOutOfRange);
        }

        //  From the starting cluster, move forward FAT entry by FAT entry
        //  until we find an empty one, rereading the FAT sector at each
        //  sector boundary.

        let mut current_cluster = starting_cluster.0;
        let mut fat_sector = vec![0u8; self.block_size as usize];

        self.read_fat_block(ClusterIndex(current_cluster), &mut fat_sector)?;

        loop {
            if current_cluster >= self.maximum_cluster_number().0 {
                return Err(FilesystemError::Fat32DeviceFull);
            }

            if fat_entry_at(&fat_sector, current_cluster % self.fat32_entries_per_block)
                == FAT32_ENTRY_FREE
            {
                break;
            }

            current_cluster += 1;

            if current_cluster % self.fat32_entries_per_block == 0 {
                debug!(
                    "advancing to FAT sector {}",
                    current_cluster / self.fat32_entries_per_block
                );
                self.read_fat_block(ClusterIndex(current_cluster), &mut fat_sector)?;
            }
        }

        //  This new cluster is likely to be used, so treat it as the high
        //  water mark for the next search.

        self.last_empty_cluster_found = ClusterIndex(
            self.last_empty_cluster_found.0.max(current_cluster),
        );

        Ok(ClusterIndex(current_cluster))
    }

    /// Releases a chain by writing the free marker into each FAT entry
    /// from `first_cluster` to the end-of-file terminator.
    pub fn release_chain(&self, first_cluster: ClusterIndex) -> CanFail<FilesystemError> {
        if self.is_cluster_out_of_range(first_cluster) {
            return Err(FilesystemError::Fat32ClusterOutOfRange);
        }

        let mut current_cluster = first_cluster;

        loop {
            let next_cluster = self.next_cluster_in_chain(current_cluster)?;

            self.update_fat_table_entry(current_cluster, FAT32_ENTRY_FREE)?;

            if next_cluster >= FAT32_ENTRY_EOF_THRESHOLD {
                break;
            }

            current_cluster = next_cluster;
        }

        Ok(())
    }

    /// Converts a cluster number to the sector it starts at.
    pub fn fat_cluster_to_sector(&self, cluster: ClusterIndex) -> u32 {
        (cluster.0 - 2) * self.logical_sectors_per_cluster + self.data_lba
    }

    /// Checks whether a cluster cannot be addressed: below the first data
    /// cluster, or above the FAT while below the reserved marker range
    /// (the markers themselves are accepted for traversal).
    pub fn is_cluster_out_of_range(&self, cluster: ClusterIndex) -> bool {
        cluster < ClusterIndex(2)
            || (cluster > self.maximum_cluster_number() && cluster < FAT32_ENTRY_DEFECTIVE)
    }

    fn read_fat_block(&self, cluster: ClusterIndex, buffer: &mut [u8]) -> CanFail<FilesystemError> {
        let sector = self.fat_lba + (cluster.0 / self.fat32_entries_per_block);

        //  FAT entries are only one sector at a time - they are not clustered

        if self
            .io_device
            .lock()
            .read_blocks(buffer, sector, 1)
            .is_err()
        {
            debug!("unable to load FAT32 sector {sector}");
            return Err(FilesystemError::Fat32UnableToReadFatTableSector);
        }

        Ok(())
    }
}

fn fat_entry_at(fat_sector: &[u8], entry_index: u32) -> ClusterIndex {
    let offset = entry_index as usize * 4;

    ClusterIndex(u32::from_le_bytes([
        fat_sector[offset],
        fat_sector[offset + 1],
        fat_sector[offset + 2],
        fat_sector[offset + 3],
    ]))
}

fn set_fat_entry(fat_sector: &mut [u8], entry_index: u32, value: ClusterIndex) {
    let offset = entry_index as usize * 4;

    fat_sector[offset..offset + 4].copy_from_slice(&value.0.to_le_bytes());
}
