use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

pub mod direntry;
pub mod groupdescriptor;
pub mod inode;
pub mod superblock;

use direntry::{DirEntry, DIRENT_HEADER_SIZE};
use groupdescriptor::{GroupDescriptor, DESCRIPTOR_SIZE, GD_FREE_BLOCKS_OFFSET};
use inode::{mode_to_string, Inode};
use superblock::{Superblock, SB_FREE_BLOCKS_OFFSET, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};

pub const ROOT_INO: u32 = 2;

/// Inode numbers below this are reserved by the filesystem and are never
/// restoration targets.
pub const FIRST_UNRESERVED_INO: u32 = 12;

#[derive(Debug, Error)]
pub enum UndeleteError {
    #[error("invalid filesystem image: {0}")]
    InvalidImage(String),
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("'{0}' is not a directory")]
    NotADirectory(String),
    #[error("no deleted entry named '{0}' in the parent directory")]
    EntryNotFound(String),
    #[error("the record at offset {offset} is the first of its block; its inode number was destroyed on deletion")]
    UnrecoverableSlot { offset: usize },
    #[error("directory record points at reserved inode {0}")]
    ReservedInode(u32),
    #[error("inode {0} has been reassigned to another file, can't restore")]
    InodeReassigned(u32),
    #[error("block {0} was overwritten, can't restore")]
    BlockOverwritten(u32),
    #[error("'{0}' is a directory; directory restoration needs the recursive mode")]
    UnsupportedDirectoryRestore(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

trait BitmapExt {
    fn is_bit_set(&self, bit_index: usize) -> bool;
    fn set_bit(&mut self, bit_index: usize);
}

impl BitmapExt for [u8] {
    #[inline]
    fn is_bit_set(&self, bit_index: usize) -> bool {
        let byte = self[bit_index / 8];
        let mask = 1u8 << (bit_index % 8);
        byte & mask != 0
    }

    #[inline]
    fn set_bit(&mut self, bit_index: usize) {
        self[bit_index / 8] |= 1u8 << (bit_index % 8);
    }
}

/// Result of a successful restoration.
#[derive(Debug, Serialize)]
pub struct RestoreReport {
    /// Normalized path of the entry the restoration was asked for.
    pub path: String,
    /// Inode number of the restored entry itself.
    pub inode: u32,
    /// Inodes re-marked allocated, including nested ones in recursive mode.
    pub inodes_restored: u32,
    /// Blocks re-marked allocated, in commit order.
    pub blocks_marked: Vec<u32>,
}

/// Trim trailing slashes and a leading "./" prefix.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.strip_prefix("./").unwrap_or(trimmed)
}

/// Split a normalized path into the parent directory path and the leaf name.
pub fn split_parent_name(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// An ext2 filesystem inside a mutable byte buffer, `memmap2::MmapMut` in
/// the binary and a plain `Vec<u8>` in tests. One block group; `offset` is
/// where the filesystem starts inside the buffer, and every block and
/// record offset in here is relative to it.
pub struct Ext2Fs<T> {
    pub superblock: Superblock,
    pub group: GroupDescriptor,
    block_size: usize,
    offset: usize,
    img: T,
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ext2Fs<T> {
    pub fn new(img: T, offset: usize) -> Result<Self, UndeleteError> {
        let data = img.as_ref().get(offset..).ok_or_else(|| {
            UndeleteError::InvalidImage("offset lies past the end of the image".to_string())
        })?;
        if data.len() < SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE {
            return Err(UndeleteError::InvalidImage(
                "image too small to hold a superblock".to_string(),
            ));
        }
        let superblock =
            Superblock::from_bytes(&data[SUPERBLOCK_OFFSET..SUPERBLOCK_OFFSET + SUPERBLOCK_SIZE])?;
        let block_size = superblock.block_size();

        // With 1 KiB blocks the descriptor sits at 2048; with larger blocks
        // it shares block 0 with nothing and starts at the next block.
        let gd_offset = if block_size == 1024 { 2048 } else { block_size };
        if data.len() < gd_offset + DESCRIPTOR_SIZE {
            return Err(UndeleteError::InvalidImage(
                "image too small to hold a group descriptor".to_string(),
            ));
        }
        let group = GroupDescriptor::from_bytes(&data[gd_offset..gd_offset + DESCRIPTOR_SIZE]);
        for block in [
            group.bg_block_bitmap,
            group.bg_inode_bitmap,
            group.bg_inode_table,
        ] {
            if block == 0
                || block >= superblock.blocks_count()
                || (block as usize + 1) * block_size > data.len()
            {
                return Err(UndeleteError::InvalidImage(format!(
                    "group descriptor points at out-of-range block {}",
                    block
                )));
            }
        }
        debug!(
            "group descriptor: block bitmap {}, inode bitmap {}, inode table {}",
            group.bg_block_bitmap, group.bg_inode_bitmap, group.bg_inode_table
        );

        Ok(Ext2Fs {
            superblock,
            group,
            block_size,
            offset,
            img,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Hand the underlying buffer back, e.g. to flush a mapping.
    pub fn into_inner(self) -> T {
        self.img
    }

    fn fs_bytes(&self) -> &[u8] {
        &self.img.as_ref()[self.offset..]
    }

    fn fs_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.img.as_mut()[self.offset..]
    }

    fn gd_offset(&self) -> usize {
        if self.block_size == 1024 {
            2048
        } else {
            self.block_size
        }
    }

    fn block_offset(&self, block: u32) -> usize {
        block as usize * self.block_size
    }

    /// Copy one filesystem block out of the image.
    pub fn read_block(&self, block: u32) -> Result<Vec<u8>, UndeleteError> {
        if block >= self.superblock.blocks_count() {
            return Err(UndeleteError::InvalidImage(format!(
                "requested block {} is out of range",
                block
            )));
        }
        let start = self.block_offset(block);
        let end = start + self.block_size;
        let data = self.fs_bytes();
        if end > data.len() {
            return Err(UndeleteError::InvalidImage(format!(
                "block {} lies past the end of the image",
                block
            )));
        }
        Ok(data[start..end].to_vec())
    }

    fn inode_offset(&self, ino: u32) -> usize {
        self.block_offset(self.group.bg_inode_table())
            + (ino as usize - 1) * self.superblock.inode_size()
    }

    /// Read a particular inode by number.
    pub fn get_inode(&self, ino: u32) -> Result<Inode, UndeleteError> {
        if ino < 1 || ino > self.superblock.inodes_count() {
            return Err(UndeleteError::InvalidImage(format!(
                "inode {} out of valid range",
                ino
            )));
        }
        let isz = self.superblock.inode_size();
        let start = self.inode_offset(ino);
        let data = self.fs_bytes();
        if start + isz > data.len() {
            return Err(UndeleteError::InvalidImage(format!(
                "inode {} lies past the end of the image",
                ino
            )));
        }
        Ok(Inode::from_bytes(ino, &data[start..start + isz]))
    }

    /// A unit is available iff its bitmap bit is 0. Inodes and blocks are
    /// both 1-indexed: the bit for unit k lives at byte (k-1)/8, bit (k-1)%8.
    pub fn is_inode_free(&self, ino: u32) -> bool {
        let off = self.block_offset(self.group.bg_inode_bitmap);
        !self.fs_bytes()[off..off + self.block_size].is_bit_set(ino as usize - 1)
    }

    pub fn is_block_free(&self, block: u32) -> bool {
        let off = self.block_offset(self.group.bg_block_bitmap);
        !self.fs_bytes()[off..off + self.block_size].is_bit_set(block as usize - 1)
    }

    /// File-type and permission bits of an inode, straight from the table.
    pub fn inode_mode(&self, ino: u32) -> Result<u16, UndeleteError> {
        Ok(self.get_inode(ino)?.mode())
    }

    fn mark_inode_allocated(&mut self, ino: u32) {
        let off = self.block_offset(self.group.bg_inode_bitmap);
        let bs = self.block_size;
        self.fs_bytes_mut()[off..off + bs].set_bit(ino as usize - 1);
    }

    /// Set the block's bitmap bit and take one off both free-block counters.
    fn mark_block_allocated(&mut self, block: u32) {
        let off = self.block_offset(self.group.bg_block_bitmap);
        let bs = self.block_size;
        let sb_count_off = SUPERBLOCK_OFFSET + SB_FREE_BLOCKS_OFFSET;
        let gd_count_off = self.gd_offset() + GD_FREE_BLOCKS_OFFSET;

        let data = self.fs_bytes_mut();
        data[off..off + bs].set_bit(block as usize - 1);

        let sb_free = LittleEndian::read_u32(&data[sb_count_off..sb_count_off + 4]).saturating_sub(1);
        LittleEndian::write_u32(&mut data[sb_count_off..sb_count_off + 4], sb_free);
        let gd_free = LittleEndian::read_u16(&data[gd_count_off..gd_count_off + 2]).saturating_sub(1);
        LittleEndian::write_u16(&mut data[gd_count_off..gd_count_off + 2], gd_free);

        self.superblock.s_free_blocks_count = sb_free;
        self.group.bg_free_blocks_count = gd_free;
    }

    /// List the live directory entries for a directory inode, walking its
    /// direct data blocks. Records with a zeroed inode field are skipped.
    pub fn list_dir(&self, inode: &Inode) -> Result<Vec<DirEntry>, UndeleteError> {
        if !inode.is_dir() {
            return Err(UndeleteError::NotADirectory(inode.i_num.to_string()));
        }
        let mut entries = Vec::new();
        for block in inode.direct_blocks() {
            let data = self.read_block(block)?;
            let mut offset = 0usize;
            while offset + DIRENT_HEADER_SIZE <= data.len() {
                let entry = match DirEntry::from_bytes(&data[offset..]) {
                    Some(entry) => entry,
                    None => break,
                };
                let rec_len = entry.rec_len as usize;
                if rec_len == 0 || offset + rec_len > data.len() {
                    break;
                }
                if entry.inode != 0 {
                    entries.push(entry);
                }
                offset += rec_len;
            }
        }
        Ok(entries)
    }

    /// Walk a slash-separated ancestor path from the root directory down to
    /// the deepest existing directory and return its inode number.
    pub fn resolve_parent(&self, parent_path: &str) -> Result<u32, UndeleteError> {
        let mut current = ROOT_INO;
        for part in parent_path.split('/').filter(|p| !p.is_empty()) {
            let inode = self.get_inode(current)?;
            if !inode.is_dir() {
                return Err(UndeleteError::NotADirectory(part.to_string()));
            }
            match self
                .list_dir(&inode)?
                .into_iter()
                .find(|entry| entry.name == part.as_bytes())
            {
                Some(entry) => current = entry.inode,
                None => return Err(UndeleteError::PathNotFound(parent_path.to_string())),
            }
        }
        Ok(current)
    }

    /// Restore the deleted entry named by `path`. Plain files only unless
    /// `recursive` is set, in which case directory subtrees are restored
    /// too. On success the image has been mutated in place and the report
    /// lists what was re-marked.
    pub fn restore_path(
        &mut self,
        path: &str,
        recursive: bool,
    ) -> Result<RestoreReport, UndeleteError> {
        let trimmed = normalize_path(path);
        let (parent_path, name) = split_parent_name(trimmed);
        if name.is_empty() {
            return Err(UndeleteError::EntryNotFound(path.to_string()));
        }

        let parent_ino = self.resolve_parent(parent_path)?;
        debug!("parent directory resolved to inode {}", parent_ino);
        let parent = self.get_inode(parent_ino)?;
        if !parent.is_dir() {
            return Err(UndeleteError::NotADirectory(parent_path.to_string()));
        }

        let mut report = RestoreReport {
            path: trimmed.to_string(),
            inode: 0,
            inodes_restored: 0,
            blocks_marked: Vec::new(),
        };
        self.restore_in_dir(&parent, name.as_bytes(), recursive, &mut report)?;
        info!(
            "restored '{}': inode {}, {} inode(s), {} block(s) re-marked",
            report.path,
            report.inode,
            report.inodes_restored,
            report.blocks_marked.len()
        );
        Ok(report)
    }

    /// Scan the parent directory's first data block for a gap hiding a
    /// deleted record with the requested name, restore it, then splice the
    /// chain by shrinking the predecessor to its minimal span so the
    /// restored record becomes reachable again.
    fn restore_in_dir(
        &mut self,
        parent: &Inode,
        name: &[u8],
        recursive: bool,
        report: &mut RestoreReport,
    ) -> Result<(), UndeleteError> {
        let block = parent.block_pointers()[0];
        if block == 0 {
            return Err(UndeleteError::InvalidImage(format!(
                "directory inode {} has no data block",
                parent.i_num
            )));
        }
        let data = self.read_block(block)?;
        let block_base = self.block_offset(block);

        let mut cur = 0usize;
        while cur < self.block_size {
            let rec = DirEntry::from_bytes(&data[cur..]).ok_or_else(|| {
                UndeleteError::InvalidImage(format!("truncated record in directory block {}", block))
            })?;
            let rec_len = rec.rec_len as usize;
            if rec_len == 0 {
                return Err(UndeleteError::InvalidImage(format!(
                    "zero-length record in directory block {}",
                    block
                )));
            }

            // "." never hides a deleted record; ".." can, as can every other
            // live entry whose declared span exceeds its minimal size.
            if !rec.is_dot() {
                let minimal = rec.minimal_size();
                if minimal != rec_len {
                    if let Some(candidate) =
                        data.get(cur + minimal..).and_then(DirEntry::from_bytes)
                    {
                        if candidate.name == name {
                            info!(
                                "found '{}' (inode {}) in the slack of '{}'",
                                candidate.name_lossy(),
                                candidate.inode,
                                rec.name_lossy()
                            );
                            report.inode = candidate.inode;
                            self.restore_entry(
                                &candidate,
                                block_base + cur + minimal,
                                recursive,
                                report,
                            )?;

                            // The restored record's own rec_len was never
                            // touched by the deletion and still covers the
                            // rest of the predecessor's old span.
                            let pred_rec_len_off = block_base + cur + 4;
                            let fs = self.fs_bytes_mut();
                            LittleEndian::write_u16(
                                &mut fs[pred_rec_len_off..pred_rec_len_off + 2],
                                minimal as u16,
                            );
                            return Ok(());
                        }
                    }
                }
            }

            // rec_len stays correct across a gap; minimal does not.
            cur += rec_len;
        }

        Err(UndeleteError::EntryNotFound(
            String::from_utf8_lossy(name).to_string(),
        ))
    }

    /// Validate and restore one candidate record. Checks run in order and
    /// each is a hard stop; nothing is mutated until all of them and the
    /// whole-blocks check phase have passed, so a rejected plain-file
    /// restoration leaves the image byte-identical.
    fn restore_entry(
        &mut self,
        entry: &DirEntry,
        entry_offset: usize,
        recursive: bool,
        report: &mut RestoreReport,
    ) -> Result<(), UndeleteError> {
        // The first record slot of a block has its inode field zeroed on
        // deletion; nothing reconstructable remains there.
        if entry_offset % self.block_size == 0 {
            return Err(UndeleteError::UnrecoverableSlot {
                offset: entry_offset,
            });
        }

        let ino = entry.inode;
        if ino < FIRST_UNRESERVED_INO {
            return Err(UndeleteError::ReservedInode(ino));
        }
        if ino > self.superblock.inodes_count() {
            return Err(UndeleteError::InvalidImage(format!(
                "inode {} out of valid range",
                ino
            )));
        }
        if !self.is_inode_free(ino) {
            return Err(UndeleteError::InodeReassigned(ino));
        }

        let inode = self.get_inode(ino)?;
        if !recursive && inode.is_dir() {
            return Err(UndeleteError::UnsupportedDirectoryRestore(
                entry.name_lossy().into_owned(),
            ));
        }

        // Check phase: every direct block must still be free before any
        // bitmap bit or counter moves.
        let blocks = inode.direct_blocks();
        for &block in &blocks {
            if block >= self.superblock.blocks_count() {
                return Err(UndeleteError::InvalidImage(format!(
                    "inode {} points at out-of-range block {}",
                    ino, block
                )));
            }
            if !self.is_block_free(block) {
                warn!("block {} of inode {} was overwritten", block, ino);
                return Err(UndeleteError::BlockOverwritten(block));
            }
        }

        info!(
            "restoring inode {} ({}, {} bytes, {} block(s))",
            ino,
            mode_to_string(inode.mode()),
            inode.size(),
            blocks.len()
        );

        // Commit phase.
        if inode.is_dir() {
            for &block in &blocks {
                self.restore_block(block, report)?;
                self.mark_block_allocated(block);
                report.blocks_marked.push(block);
            }
        } else {
            for &block in &blocks {
                self.mark_block_allocated(block);
                report.blocks_marked.push(block);
            }
        }

        self.mark_inode_allocated(ino);
        report.inodes_restored += 1;
        Ok(())
    }

    /// Recursively restore the entries of one directory data block. "." and
    /// ".." belong to the directory itself and are skipped; the first
    /// failing entry aborts the whole block.
    fn restore_block(
        &mut self,
        block: u32,
        report: &mut RestoreReport,
    ) -> Result<(), UndeleteError> {
        debug!("restoring directory block {}", block);
        let data = self.read_block(block)?;
        let block_base = self.block_offset(block);

        let mut cur = 0usize;
        while cur < self.block_size {
            let rec = DirEntry::from_bytes(&data[cur..]).ok_or_else(|| {
                UndeleteError::InvalidImage(format!("truncated record in directory block {}", block))
            })?;
            let rec_len = rec.rec_len as usize;
            if rec_len == 0 {
                return Err(UndeleteError::InvalidImage(format!(
                    "zero-length record in directory block {}",
                    block
                )));
            }
            if !rec.is_dot() && !rec.is_dot_dot() {
                self.restore_entry(&rec, block_base + cur, true, report)?;
            }
            cur += rec_len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_slashes_and_dot_prefix() {
        assert_eq!(normalize_path("./foo/bar/"), "foo/bar");
        assert_eq!(normalize_path("/foo/bar"), "/foo/bar");
        assert_eq!(normalize_path("bar.txt///"), "bar.txt");
        assert_eq!(normalize_path("/"), "");
    }

    #[test]
    fn split_parent_name_handles_flat_and_nested() {
        assert_eq!(split_parent_name("foo/bar"), ("foo", "bar"));
        assert_eq!(split_parent_name("/a/b/c.txt"), ("/a/b", "c.txt"));
        assert_eq!(split_parent_name("bar.txt"), ("", "bar.txt"));
        assert_eq!(split_parent_name("/bar.txt"), ("", "bar.txt"));
    }

    #[test]
    fn bitmap_bits_are_one_indexed_units() {
        let mut bmp = vec![0u8; 4];
        bmp.as_mut_slice().set_bit(11); // unit 12
        assert_eq!(bmp[1], 0b0000_1000);
        assert!(bmp.as_slice().is_bit_set(11));
        assert!(!bmp.as_slice().is_bit_set(10));
    }
}
