use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Classic 32-byte block group descriptor. The whole image has exactly one
/// group, so no 64-bit high halves and no descriptor-size games.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Byte offset of `bg_free_blocks_count` (u16) inside the descriptor,
/// mirrored from the superblock's counter on every commit.
pub const GD_FREE_BLOCKS_OFFSET: usize = 0x0C;

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupDescriptor {
    // Block number of the block allocation bitmap.
    pub bg_block_bitmap: u32,
    // Block number of the inode allocation bitmap.
    pub bg_inode_bitmap: u32,
    // First block of the inode table.
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
}

impl GroupDescriptor {
    /// Parses a group descriptor from a raw byte slice of at least
    /// `DESCRIPTOR_SIZE` bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let le_u16 = |offset: usize| -> u16 {
            u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let le_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };

        GroupDescriptor {
            bg_block_bitmap: le_u32(0x00),
            bg_inode_bitmap: le_u32(0x04),
            bg_inode_table: le_u32(0x08),
            bg_free_blocks_count: le_u16(GD_FREE_BLOCKS_OFFSET),
            bg_free_inodes_count: le_u16(0x0E),
            bg_used_dirs_count: le_u16(0x10),
        }
    }

    pub fn bg_inode_table(&self) -> u32 {
        self.bg_inode_table
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}
