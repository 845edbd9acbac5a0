use std::borrow::Cow;

/// Fixed header of a directory record: inode (4), rec_len (2), name_len (1),
/// file_type (1). The name bytes follow, and the record span is rounded up
/// to a 4-byte boundary.
pub const DIRENT_HEADER_SIZE: usize = 8;

/// Smallest span a record with a `name_len`-byte name can occupy.
pub fn padded_size(name_len: usize) -> usize {
    (DIRENT_HEADER_SIZE + name_len + 3) & !3
}

// Structure representing a directory entry
pub struct DirEntry {
    // Inode number associated with the directory entry
    pub inode: u32,
    // Length of this directory entry record
    pub rec_len: u16,
    // Type of the file described by this directory entry
    pub file_type: u8,
    // Raw name bytes; names are compared byte-exact, not as UTF-8
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Constructs a DirEntry from a byte slice starting at the record
    /// header. Returns `None` when the header or the name bytes would run
    /// past the end of the slice, which makes truncated slack candidates
    /// fall out as non-matches instead of panicking.
    pub fn from_bytes(data: &[u8]) -> Option<DirEntry> {
        if data.len() < DIRENT_HEADER_SIZE {
            return None;
        }
        let name_len = data[6] as usize;
        if data.len() < DIRENT_HEADER_SIZE + name_len {
            return None;
        }

        Some(DirEntry {
            inode: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            rec_len: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            file_type: data[7],
            name: data[DIRENT_HEADER_SIZE..DIRENT_HEADER_SIZE + name_len].to_vec(),
        })
    }

    /// The span this record needs for its own name, as opposed to the span
    /// `rec_len` declares. A record whose `rec_len` exceeds this carries a
    /// gap, and the gap may hold a deleted record's residual bytes.
    pub fn minimal_size(&self) -> usize {
        padded_size(self.name.len())
    }

    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    pub fn is_dot_dot(&self) -> bool {
        self.name == b".."
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}
