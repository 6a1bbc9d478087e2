//! A RAM-backed block device.
//!
//! Used for initrd-style volumes and as the backing store for filesystem
//! tests. Read and write failures can be injected after a configurable
//! number of successful requests to exercise the engine's error paths.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::devices::block::{BlockDevice, BlockIoResult};
use crate::errors::BlockIoError;

/// An in-memory block device with a fixed 512-byte block size.
pub struct RamDisk {
    name: String,
    blocks: Vec<u8>,
    block_count: u32,
    current_offset: u64,

    simulate_read_error: bool,
    requests_before_read_error: u32,

    simulate_write_error: bool,
    requests_before_write_error: u32,
}

impl RamDisk {
    /// Block size of all RAM disks, in bytes.
    pub const BLOCK_SIZE_IN_BYTES: u32 = 512;

    /// Creates a zero-filled RAM disk of `block_count` blocks.
    pub fn new(name: &str, block_count: u32) -> Self {
        Self {
            name: String::from(name),
            blocks: vec![0u8; block_count as usize * Self::BLOCK_SIZE_IN_BYTES as usize],
            block_count,
            current_offset: 0,
            simulate_read_error: false,
            requests_before_read_error: 0,
            simulate_write_error: false,
            requests_before_write_error: 0,
        }
    }

    /// Creates a RAM disk holding a copy of an existing image. The image
    /// length must be a whole number of blocks.
    pub fn from_image(name: &str, image: &[u8]) -> Self {
        assert!(image.len() % Self::BLOCK_SIZE_IN_BYTES as usize == 0);

        Self {
            name: String::from(name),
            blocks: Vec::from(image),
            block_count: (image.len() / Self::BLOCK_SIZE_IN_BYTES as usize) as u32,
            current_offset: 0,
            simulate_read_error: false,
            requests_before_read_error: 0,
            simulate_write_error: false,
            requests_before_write_error: 0,
        }
    }

    /// Returns a copy of the full device image.
    pub fn image(&self) -> Vec<u8> {
        self.blocks.clone()
    }

    /// Fails the read request issued after `requests_before_error`
    /// successful reads.
    pub fn simulate_read_error(&mut self, requests_before_error: u32) {
        self.simulate_read_error = true;
        self.requests_before_read_error = requests_before_error;
    }

    /// Fails the write request issued after `requests_before_error`
    /// successful writes.
    pub fn simulate_write_error(&mut self, requests_before_error: u32) {
        self.simulate_write_error = true;
        self.requests_before_write_error = requests_before_error;
    }

    fn byte_range(&self, block_number: u32, block_count: u32) -> BlockIoResult<(usize, usize)> {
        let end_block = block_number as u64 + block_count as u64;

        if end_block > self.block_count as u64 {
            return Err(BlockIoError::InvalidStorageOffset);
        }

        let start = block_number as usize * Self::BLOCK_SIZE_IN_BYTES as usize;
        let length = block_count as usize * Self::BLOCK_SIZE_IN_BYTES as usize;

        Ok((start, start + length))
    }
}

impl BlockDevice for RamDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_size(&self) -> u32 {
        Self::BLOCK_SIZE_IN_BYTES
    }

    fn seek(&mut self, offset_in_blocks: u64) -> BlockIoResult<()> {
        if offset_in_blocks > self.block_count as u64 {
            return Err(BlockIoError::InvalidStorageOffset);
        }

        self.current_offset = offset_in_blocks;
        Ok(())
    }

    fn read_blocks(
        &mut self,
        buffer: &mut [u8],
        block_number: u32,
        blocks_to_read: u32,
    ) -> BlockIoResult<u32> {
        if self.simulate_read_error {
            if self.requests_before_read_error == 0 {
                return Err(BlockIoError::ReadFailed);
            }

            self.requests_before_read_error -= 1;
        }

        let (start, end) = self.byte_range(block_number, blocks_to_read)?;

        buffer[..end - start].copy_from_slice(&self.blocks[start..end]);
        Ok(blocks_to_read)
    }

    fn read_from_current_offset(
        &mut self,
        buffer: &mut [u8],
        blocks_to_read: u32,
    ) -> BlockIoResult<u32> {
        let block_number = self.current_offset as u32;

        let blocks_read = self.read_blocks(buffer, block_number, blocks_to_read)?;
        self.current_offset += blocks_read as u64;

        Ok(blocks_read)
    }

    fn write_blocks(
        &mut self,
        buffer: &[u8],
        block_number: u32,
        blocks_to_write: u32,
    ) -> BlockIoResult<u32> {
        if self.simulate_write_error {
            if self.requests_before_write_error == 0 {
                return Err(BlockIoError::WriteFailed);
            }

            self.requests_before_write_error -= 1;
        }

        let (start, end) = self.byte_range(block_number, blocks_to_write)?;

        self.blocks[start..end].copy_from_slice(&buffer[..end - start]);
        Ok(blocks_to_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_blocks() {
        let mut disk = RamDisk::new("ramdisk0", 8);

        let pattern = [0xA5u8; 1024];
        assert_eq!(disk.write_blocks(&pattern, 2, 2).unwrap(), 2);

        let mut readback = [0u8; 1024];
        assert_eq!(disk.read_blocks(&mut readback, 2, 2).unwrap(), 2);
        assert_eq!(readback, pattern);
    }

    #[test]
    fn rejects_out_of_range_requests() {
        let mut disk = RamDisk::new("ramdisk0", 4);
        let mut buffer = [0u8; 512];

        assert_eq!(
            disk.read_blocks(&mut buffer, 4, 1).unwrap_err(),
            BlockIoError::InvalidStorageOffset
        );
        assert_eq!(
            disk.write_blocks(&buffer, 3, 2).unwrap_err(),
            BlockIoError::InvalidStorageOffset
        );
    }

    #[test]
    fn injects_errors_after_countdown() {
        let mut disk = RamDisk::new("ramdisk0", 4);
        let mut buffer = [0u8; 512];

        disk.simulate_read_error(1);
        assert!(disk.read_blocks(&mut buffer, 0, 1).is_ok());
        assert_eq!(
            disk.read_blocks(&mut buffer, 0, 1).unwrap_err(),
            BlockIoError::ReadFailed
        );
    }

    #[test]
    fn sequential_reads_follow_the_seek_offset() {
        let mut disk = RamDisk::new("ramdisk0", 4);

        let pattern = [0x5Au8; 512];
        disk.write_blocks(&pattern, 3, 1).unwrap();

        disk.seek(3).unwrap();

        let mut readback = [0u8; 512];
        disk.read_from_current_offset(&mut readback, 1).unwrap();
        assert_eq!(readback, pattern);
    }
}
