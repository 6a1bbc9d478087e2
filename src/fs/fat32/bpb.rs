//! The FAT32 BIOS Parameter Block.
//!
//! Located on the first sector of the volume, which may be called the boot
//! sector. Only the fields the engine consumes get accessors; the rest are
//! carried so the structure stays bit-exact with the on-disk layout.

use crate::errors::FilesystemError;

/// The FAT32 variant of the `BiosParameterBlock` (DOS 7.1 extended form).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, bytemuck::NoUninit, bytemuck::AnyBitPattern)]
pub struct BiosParameterBlock {
    /// Jump instruction to boot code
    bs_jmpboot: [u8; 3],

    /// OEM Name Identifier
    bs_oemname: [u8; 8],

    //  DOS 2.0 Bios Parameter Block
    /// Count of bytes per logical sector
    bpb_byts_per_sec: u16,

    /// Number of logical sectors per allocation unit, a positive power of
    /// two
    bpb_sec_per_clus: u8,

    /// Number of reserved sectors in front of the FAT region
    bpb_rsvd_sec_cnt: u16,

    /// The count of File Allocation Tables on the volume, usually 2
    bpb_num_fats: u8,

    /// Count of root directory entries; always zero for FAT32
    bpb_root_ent_cnt: u16,

    /// 16-bit total sector count; always zero for FAT32
    bpb_tot_sec_16: u16,

    /// Media descriptor byte
    bpb_media: u8,

    /// 16-bit count of sectors per FAT; always zero for FAT32
    bpb_fat_sz_16: u16,

    //  DOS 3.31 BPB
    /// Sectors per track for interrupt 13h
    bpb_sec_per_trk: u16,

    /// Number of heads for interrupt 13h
    bpb_num_heads: u16,

    /// Count of hidden sectors preceding the partition
    bpb_hidd_sec: u32,

    /// 32-bit total count of sectors on the volume
    bpb_tot_sec_32: u32,

    //  FAT32 - DOS 7.1 BPB
    /// 32-bit count of sectors occupied by one FAT
    bpb_fat_sz_32: u32,

    /// Mirroring flags
    bpb_ext_flags: u16,

    /// Version number; high byte major, low byte minor
    bpb_fs_ver: u16,

    /// Cluster number of the first cluster of the root directory
    bpb_root_clus: u32,

    /// Sector number of the FSINFO structure in the reserved area
    bpb_fs_info: u16,

    /// Sector number of a copy of the boot record in the reserved area
    bpb_bk_boot_sec: u16,

    reserved: [u8; 12],

    /// Interrupt 13h drive number
    bs_drv_num: u8,

    reserved1: u8,

    /// Extended boot signature; 0x29 when the following three fields are
    /// present
    bs_boot_sig: u8,

    /// Volume serial number
    bs_vol_id: u32,

    /// Volume label, matching the volume-information entry in the root
    /// directory
    bs_vol_lab: [u8; 11],

    /// Informational string, usually `"FAT32   "`
    bs_fil_sys_type: [u8; 8],
}

const _: () = assert!(core::mem::size_of::<BiosParameterBlock>() == 90);

impl BiosParameterBlock {
    /// Decodes the parameter block from the first sector of a volume.
    ///
    /// # Errors
    ///
    /// [`FilesystemError::Fat32NotAFat32Filesystem`] when the sector is too
    /// small or the FAT32 invariants (16-bit FAT size and root entry count
    /// both zero, non-zero 32-bit FAT size) do not hold.
    pub fn decode(first_sector: &[u8]) -> Result<Self, FilesystemError> {
        if first_sector.len() < core::mem::size_of::<Self>() {
            return Err(FilesystemError::Fat32NotAFat32Filesystem);
        }

        let bpb: Self = bytemuck::pod_read_unaligned(
            &first_sector[..core::mem::size_of::<Self>()],
        );

        if bpb.bpb_fat_sz_16 != 0 || bpb.bpb_root_ent_cnt != 0 || bpb.bpb_fat_sz_32 == 0 {
            return Err(FilesystemError::Fat32NotAFat32Filesystem);
        }

        Ok(bpb)
    }

    /// Bytes per logical sector.
    pub fn bytes_per_sector(&self) -> u32 {
        u32::from(self.bpb_byts_per_sec)
    }

    /// Logical sectors per cluster.
    pub fn logical_sectors_per_cluster(&self) -> u32 {
        u32::from(self.bpb_sec_per_clus)
    }

    /// Reserved sectors in front of the FAT region.
    pub fn reserved_sectors(&self) -> u32 {
        u32::from(self.bpb_rsvd_sec_cnt)
    }

    /// Number of FATs on the volume.
    pub fn number_of_fats(&self) -> u32 {
        u32::from(self.bpb_num_fats)
    }

    /// Sectors occupied by one FAT.
    pub fn sectors_per_fat(&self) -> u32 {
        self.bpb_fat_sz_32
    }

    /// First cluster of the root directory.
    pub fn root_directory_cluster(&self) -> u32 {
        self.bpb_root_clus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_sector() -> [u8; 512] {
        let mut sector = [0u8; 512];

        sector[11..13].copy_from_slice(&512u16.to_le_bytes());
        sector[13] = 1; // sectors per cluster
        sector[14..16].copy_from_slice(&32u16.to_le_bytes()); // reserved
        sector[16] = 1; // number of FATs
        sector[36..40].copy_from_slice(&16u32.to_le_bytes()); // FAT size 32
        sector[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
        sector[510] = 0x55;
        sector[511] = 0xAA;

        sector
    }

    #[test]
    fn decodes_the_fat32_geometry_fields() {
        let bpb = BiosParameterBlock::decode(&reference_sector()).unwrap();

        assert_eq!(bpb.bytes_per_sector(), 512);
        assert_eq!(bpb.logical_sectors_per_cluster(), 1);
        assert_eq!(bpb.reserved_sectors(), 32);
        assert_eq!(bpb.number_of_fats(), 1);
        assert_eq!(bpb.sectors_per_fat(), 16);
        assert_eq!(bpb.root_directory_cluster(), 2);
    }

    #[test]
    fn rejects_non_fat32_parameter_blocks() {
        let mut fat16_like = reference_sector();
        fat16_like[22..24].copy_from_slice(&64u16.to_le_bytes()); // 16-bit FAT size

        assert_eq!(
            BiosParameterBlock::decode(&fat16_like).unwrap_err(),
            FilesystemError::Fat32NotAFat32Filesystem
        );

        assert_eq!(
            BiosParameterBlock::decode(&[0u8; 32]).unwrap_err(),
            FilesystemError::Fat32NotAFat32Filesystem
        );
    }
}
