/// Reference: https://www.nongnu.org/ext2-doc/ext2.html#superblock
use crate::UndeleteError;
use serde_json::{json, Value};
use std::convert::TryInto;

const EXT2_MAGIC: u16 = 0xEF53;

/// The superblock always lives at byte 1024, whatever the block size is.
pub const SUPERBLOCK_OFFSET: usize = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;

/// Byte offset of `s_free_blocks_count` inside the superblock. The restore
/// commit rewrites this counter in place.
pub const SB_FREE_BLOCKS_OFFSET: usize = 0x0C;

#[derive(Debug)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_blocks_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_rev_level: u32,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
}

impl Superblock {
    pub fn from_bytes(data: &[u8]) -> Result<Self, UndeleteError> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(UndeleteError::InvalidImage(
                "not enough bytes to parse the superblock".to_string(),
            ));
        }
        let le_u16 = |offset: usize| -> u16 {
            u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let le_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };
        let s_magic = le_u16(0x38);
        if s_magic != EXT2_MAGIC {
            return Err(UndeleteError::InvalidImage(format!(
                "bad superblock magic 0x{:04x}",
                s_magic
            )));
        }
        Ok(Self {
            s_inodes_count: le_u32(0x00),
            s_blocks_count: le_u32(0x04),
            s_free_blocks_count: le_u32(SB_FREE_BLOCKS_OFFSET),
            s_free_inodes_count: le_u32(0x10),
            s_first_data_block: le_u32(0x14),
            s_log_block_size: le_u32(0x18),
            s_blocks_per_group: le_u32(0x20),
            s_inodes_per_group: le_u32(0x28),
            s_mtime: le_u32(0x2C),
            s_wtime: le_u32(0x30),
            s_magic,
            s_state: le_u16(0x3A),
            s_rev_level: le_u32(0x4C),
            s_first_ino: le_u32(0x54),
            s_inode_size: le_u16(0x58),
        })
    }

    pub fn block_size(&self) -> usize {
        1024 << self.s_log_block_size
    }

    pub fn blocks_count(&self) -> u32 {
        self.s_blocks_count
    }

    pub fn inodes_count(&self) -> u32 {
        self.s_inodes_count
    }

    pub fn inodes_per_group(&self) -> usize {
        self.s_inodes_per_group as usize
    }

    /// Revision 0 images carry 0 here and always use 128-byte inodes.
    pub fn inode_size(&self) -> usize {
        if self.s_rev_level == 0 || self.s_inode_size == 0 {
            128
        } else {
            self.s_inode_size as usize
        }
    }

    pub fn print_sp_info(&self) {
        println!("{:#?}", self);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "inodes_count": self.s_inodes_count,
            "blocks_count": self.s_blocks_count,
            "free_blocks_count": self.s_free_blocks_count,
            "free_inodes_count": self.s_free_inodes_count,
            "first_data_block": self.s_first_data_block,
            "log_block_size": self.s_log_block_size,
            "block_size": self.block_size(),
            "blocks_per_group": self.s_blocks_per_group,
            "inodes_per_group": self.s_inodes_per_group,
            "inode_size": self.inode_size(),
            "first_ino": self.s_first_ino,
            "magic": format!("0x{:04x}", self.s_magic),
            "state": self.s_state,
        })
    }
}
