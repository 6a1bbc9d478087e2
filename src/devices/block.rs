//! The block device trait.

use alloc::sync::Arc;

use crate::errors::BlockIoError;

/// Result type for block device operations. Successful reads and writes
/// report the number of blocks transferred.
pub type BlockIoResult<T> = Result<T, BlockIoError>;

/// A device shared between the filesystem layers.
///
/// The registry owns one `SharedBlockDevice` per device; adapters keep a
/// clone and lock it for the duration of each sector transfer.
pub type SharedBlockDevice = Arc<spin::Mutex<dyn BlockDevice + Send>>;

/// A trait to represent a device addressed in fixed-size blocks.
///
/// Functionally, `block` and `sector` are synonymous; `sector` shows up in
/// the FAT32 layers because that is the term the on-disk format
/// documentation uses.
pub trait BlockDevice {
    /// Returns the device name used for registry lookups and logging.
    fn name(&self) -> &str;

    /// Returns the size of one block, in bytes.
    fn block_size(&self) -> u32;

    /// Moves the device's internal offset to the given block.
    ///
    /// # Errors
    ///
    /// Devices without a repositionable offset return
    /// [`BlockIoError::SeekNotSupported`].
    fn seek(&mut self, offset_in_blocks: u64) -> BlockIoResult<()>;

    /// Reads `blocks_to_read` blocks starting at `block_number` into
    /// `buffer`, returning the number of blocks read.
    ///
    /// # Errors
    ///
    /// Returns [`BlockIoError::InvalidStorageOffset`] when the request runs
    /// past the end of the device and [`BlockIoError::ReadFailed`] on a
    /// transfer failure.
    fn read_blocks(
        &mut self,
        buffer: &mut [u8],
        block_number: u32,
        blocks_to_read: u32,
    ) -> BlockIoResult<u32>;

    /// Reads `blocks_to_read` blocks starting at the current internal
    /// offset, returning the number of blocks read.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`BlockDevice::read_blocks`].
    fn read_from_current_offset(
        &mut self,
        buffer: &mut [u8],
        blocks_to_read: u32,
    ) -> BlockIoResult<u32>;

    /// Writes `blocks_to_write` blocks from `buffer` starting at
    /// `block_number`, returning the number of blocks written.
    ///
    /// # Errors
    ///
    /// Returns [`BlockIoError::InvalidStorageOffset`] when the request runs
    /// past the end of the device and [`BlockIoError::WriteFailed`] on a
    /// transfer failure.
    fn write_blocks(
        &mut self,
        buffer: &[u8],
        block_number: u32,
        blocks_to_write: u32,
    ) -> BlockIoResult<u32>;
}
