/// Reference: https://www.nongnu.org/ext2-doc/ext2.html#inode-table
use chrono::{TimeZone, Utc};
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Number of direct data-block pointers in `i_block`. The remaining three
/// slots hold the indirect pointers, which this tool never follows.
pub const DIRECT_POINTERS: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
pub struct Inode {
    pub i_num: u32,
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_atime_h: String,
    pub i_ctime_h: String,
    pub i_mtime_h: String,
    pub i_dtime_h: String,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks: u32,
    pub i_flags: u32,
    pub i_block: [u32; 15],
}

/// Render an ext mode (file-type plus permission bits) the way `ls -l`
/// prints it, e.g. "-rw-r--r--". Setuid/setgid/sticky are not rendered.
pub fn mode_to_string(mode: u16) -> String {
    let kind = match mode & 0o170000 {
        0o140000 => 's',
        0o120000 => 'l',
        0o100000 => '-',
        0o060000 => 'b',
        0o040000 => 'd',
        0o020000 => 'c',
        0o010000 => 'p',
        _ => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

impl Inode {
    /// Parse the classic 128-byte on-disk inode record.
    pub fn from_bytes(i_num: u32, data: &[u8]) -> Self {
        let le_u16 = |offset: usize| -> u16 {
            u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let le_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };

        let format_time = |seconds: u32| {
            Utc.timestamp_opt(seconds as i64, 0)
                .single()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default()
        };

        let i_atime = le_u32(0x08);
        let i_ctime = le_u32(0x0C);
        let i_mtime = le_u32(0x10);
        let i_dtime = le_u32(0x14);

        let mut i_block = [0u32; 15];
        for (i, slot) in i_block.iter_mut().enumerate() {
            *slot = le_u32(0x28 + i * 4);
        }

        Inode {
            i_num,
            i_mode: le_u16(0x00),
            i_uid: le_u16(0x02),
            i_size: le_u32(0x04),
            i_atime,
            i_ctime,
            i_mtime,
            i_dtime,
            i_atime_h: format_time(i_atime),
            i_ctime_h: format_time(i_ctime),
            i_mtime_h: format_time(i_mtime),
            i_dtime_h: format_time(i_dtime),
            i_gid: le_u16(0x18),
            i_links_count: le_u16(0x1A),
            i_blocks: le_u32(0x1C),
            i_flags: le_u32(0x20),
            i_block,
        }
    }

    pub fn size(&self) -> u32 {
        self.i_size
    }

    pub fn mode(&self) -> u16 {
        self.i_mode
    }

    /// Check if this inode is a directory (S_IFDIR).
    pub fn is_dir(&self) -> bool {
        (self.i_mode & 0o170000) == 0o040000
    }

    /// Check if this inode is a regular file (S_IFREG).
    pub fn is_regular_file(&self) -> bool {
        (self.i_mode & 0o170000) == 0o100000
    }

    /// Check if this inode is a symlink (S_IFLNK).
    pub fn is_symlink(&self) -> bool {
        (self.i_mode & 0o170000) == 0o120000
    }

    pub fn block_pointers(&self) -> &[u32; 15] {
        &self.i_block
    }

    /// The direct data blocks of this inode, in order, up to the first zero
    /// pointer. A zero pointer means no further block is defined.
    pub fn direct_blocks(&self) -> Vec<u32> {
        let mut blocks = Vec::new();
        for &b in &self.i_block[..DIRECT_POINTERS] {
            if b == 0 {
                break;
            }
            blocks.push(b);
        }
        blocks
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// String representation of an Inode using prettytable
    pub fn to_string(&self) -> String {
        let mut inode_table = Table::new();

        inode_table.add_row(Row::new(vec![
            Cell::new("Identifier"),
            Cell::new(&format!("{}", self.i_num)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Mode"),
            Cell::new(&mode_to_string(self.i_mode)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Dir?"),
            Cell::new(&format!("{}", self.is_dir())),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Regular?"),
            Cell::new(&format!("{}", self.is_regular_file())),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Symlink?"),
            Cell::new(&format!("{}", self.is_symlink())),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Links Count"),
            Cell::new(&format!("{}", self.i_links_count)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Size"),
            Cell::new(&format!("{}", self.i_size)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("UID / GID"),
            Cell::new(&format!("{} / {}", self.i_uid, self.i_gid)),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("atime (Access Time)"),
            Cell::new(&self.i_atime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("ctime (Change Time)"),
            Cell::new(&self.i_ctime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("mtime (Modification Time)"),
            Cell::new(&self.i_mtime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("dtime (Deletion Time)"),
            Cell::new(&self.i_dtime_h),
        ]));
        inode_table.add_row(Row::new(vec![
            Cell::new("Direct Blocks"),
            Cell::new(&format!("{:?}", self.direct_blocks())),
        ]));
        inode_table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_renders_like_ls() {
        assert_eq!(mode_to_string(0o100644), "-rw-r--r--");
        assert_eq!(mode_to_string(0o040755), "drwxr-xr-x");
        assert_eq!(mode_to_string(0o120777), "lrwxrwxrwx");
        assert_eq!(mode_to_string(0o100000), "----------");
    }

    #[test]
    fn type_helpers_follow_the_mode_bits() {
        let mut raw = vec![0u8; 128];
        raw[0..2].copy_from_slice(&0o100644u16.to_le_bytes());
        let file = Inode::from_bytes(12, &raw);
        assert!(file.is_regular_file());
        assert!(!file.is_dir());
        assert!(!file.is_symlink());

        raw[0..2].copy_from_slice(&0o040755u16.to_le_bytes());
        let dir = Inode::from_bytes(2, &raw);
        assert!(dir.is_dir());
        assert!(!dir.is_regular_file());

        raw[0..2].copy_from_slice(&0o120777u16.to_le_bytes());
        let link = Inode::from_bytes(13, &raw);
        assert!(link.is_symlink());
        assert!(!link.is_regular_file());
    }

    #[test]
    fn direct_blocks_stop_at_the_first_zero_pointer() {
        let mut raw = vec![0u8; 128];
        for (i, block) in [10u32, 11, 0, 13].iter().enumerate() {
            raw[0x28 + i * 4..0x28 + i * 4 + 4].copy_from_slice(&block.to_le_bytes());
        }
        let inode = Inode::from_bytes(12, &raw);
        assert_eq!(inode.direct_blocks(), vec![10, 11]);
    }
}
