mod common;

use common::*;
use ext2_undelete::{Ext2Fs, UndeleteError};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn restores_deleted_file_and_splices_the_chain() {
    let image = image_with_deleted_file();
    assert_eq!(rec_len_sum(&image, ROOT_BLOCK), BLOCK_SIZE);
    let (free_before, _) = free_block_counters(&image);

    let mut fs = Ext2Fs::new(image, 0).unwrap();
    let report = fs.restore_path("/bar.txt", false).unwrap();
    assert_eq!(report.path, "/bar.txt");
    assert_eq!(report.inode, 12);
    assert_eq!(report.inodes_restored, 1);
    assert_eq!(report.blocks_marked, vec![10]);

    let after = fs.into_inner();
    assert!(inode_bit_set(&after, 12));
    assert!(block_bit_set(&after, 10));

    let (free_after, gd_free_after) = free_block_counters(&after);
    assert_eq!(free_after, free_before - 1);
    assert_eq!(gd_free_after as u32, free_after);

    // The predecessor shrank to its minimal span and the restored record's
    // untouched rec_len covers the remainder of the old span.
    assert_eq!(rec_len_at(&after, ROOT_BLOCK, 24), 12);
    assert_eq!(rec_len_at(&after, ROOT_BLOCK, 36), 988);
    assert_eq!(rec_len_sum(&after, ROOT_BLOCK), BLOCK_SIZE);
}

#[test]
fn restored_entry_is_reachable_through_list_dir() {
    let mut fs = Ext2Fs::new(image_with_deleted_file(), 0).unwrap();
    fs.restore_path("bar.txt", false).unwrap();

    let root = fs.get_inode(ROOT_INO).unwrap();
    let names: Vec<_> = fs
        .list_dir(&root)
        .unwrap()
        .iter()
        .map(|e| e.name_lossy().to_string())
        .collect();
    assert!(names.contains(&"foo".to_string()));
    assert!(names.contains(&"bar.txt".to_string()));
}

#[test]
fn rejects_when_inode_was_reassigned() {
    let mut builder_image = image_with_deleted_file();
    // Flip inode 12's bit: some other file owns it now.
    builder_image[INODE_BITMAP as usize * BLOCK_SIZE + 1] |= 1 << 3;
    let before = builder_image.clone();

    let mut fs = Ext2Fs::new(builder_image, 0).unwrap();
    let err = fs.restore_path("/bar.txt", false).unwrap_err();
    assert!(matches!(err, UndeleteError::InodeReassigned(12)));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn rejects_when_a_data_block_was_overwritten() {
    let mut image = image_with_deleted_file();
    {
        let mut b = ImageBuilder { bytes: image };
        b.mark_block(10);
        image = b.bytes;
    }
    let before = image.clone();

    let mut fs = Ext2Fs::new(image, 0).unwrap();
    let err = fs.restore_path("/bar.txt", false).unwrap_err();
    assert!(matches!(err, UndeleteError::BlockOverwritten(10)));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn rejects_directory_target_without_recursive() {
    let image = image_with_deleted_tree();
    let before = image.clone();

    let mut fs = Ext2Fs::new(image, 0).unwrap();
    // The candidate's mode carries directory file-type bits.
    assert_eq!(fs.inode_mode(14).unwrap() & 0o170000, 0o040000);
    let err = fs.restore_path("/docs", false).unwrap_err();
    assert!(matches!(err, UndeleteError::UnsupportedDirectoryRestore(_)));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn recursive_mode_restores_a_directory_subtree() {
    let image = image_with_deleted_tree();
    let (free_before, _) = free_block_counters(&image);

    let mut fs = Ext2Fs::new(image, 0).unwrap();
    let report = fs.restore_path("/docs", true).unwrap();
    assert_eq!(report.inode, 14);
    assert_eq!(report.inodes_restored, 2);
    // note.txt's data block commits while its parent's own block is still
    // being walked.
    assert_eq!(report.blocks_marked, vec![13, 12]);

    let after = fs.into_inner();
    assert!(inode_bit_set(&after, 14));
    assert!(inode_bit_set(&after, 15));
    assert!(block_bit_set(&after, 12));
    assert!(block_bit_set(&after, 13));

    let (free_after, gd_free_after) = free_block_counters(&after);
    assert_eq!(free_after, free_before - 2);
    assert_eq!(gd_free_after as u32, free_after);

    assert_eq!(rec_len_at(&after, ROOT_BLOCK, 24), 12);
    assert_eq!(rec_len_sum(&after, ROOT_BLOCK), BLOCK_SIZE);
}

#[test]
fn reports_path_not_found_for_missing_parent() {
    let image = image_with_deleted_file();
    let before = image.clone();

    let mut fs = Ext2Fs::new(image, 0).unwrap();
    let err = fs.restore_path("/nosuch/bar.txt", false).unwrap_err();
    assert!(matches!(err, UndeleteError::PathNotFound(_)));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn reports_entry_not_found_for_unknown_name() {
    let mut fs = Ext2Fs::new(image_with_deleted_file(), 0).unwrap();
    let err = fs.restore_path("/zzz.txt", false).unwrap_err();
    assert!(matches!(err, UndeleteError::EntryNotFound(_)));
}

#[test]
fn never_accepts_a_reserved_inode_number() {
    let mut b = ImageBuilder::new();
    b.write_inode(13, FILE_MODE, 0, &[]);
    b.mark_inode(13);
    b.write_dirent(ROOT_BLOCK, 0, ROOT_INO, 12, b".", 2);
    b.write_dirent(ROOT_BLOCK, 12, ROOT_INO, 12, b"..", 2);
    b.write_dirent(ROOT_BLOCK, 24, 13, 1000, b"foo", 1);
    // Residual record claims reserved inode 5.
    b.write_dirent(ROOT_BLOCK, 36, 5, 988, b"bar.txt", 1);
    let before = b.bytes.clone();

    let mut fs = Ext2Fs::new(b.bytes, 0).unwrap();
    let err = fs.restore_path("/bar.txt", false).unwrap_err();
    assert!(matches!(err, UndeleteError::ReservedInode(5)));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn first_record_of_a_block_is_unrecoverable() {
    // A deleted directory whose block starts with a regular record instead
    // of "."; the recursive walk must refuse that first slot.
    let mut b = ImageBuilder::new();
    b.write_inode(13, FILE_MODE, 0, &[]);
    b.mark_inode(13);
    b.write_inode(14, DIR_MODE, BLOCK_SIZE as u32, &[12]);
    b.write_inode(15, FILE_MODE, 20, &[13]);
    b.write_dirent(ROOT_BLOCK, 0, ROOT_INO, 12, b".", 2);
    b.write_dirent(ROOT_BLOCK, 12, ROOT_INO, 12, b"..", 2);
    b.write_dirent(ROOT_BLOCK, 24, 13, 1000, b"keep", 1);
    b.write_dirent(ROOT_BLOCK, 36, 14, 988, b"docs", 2);
    b.write_dirent(12, 0, 15, BLOCK_SIZE as u16, b"note.txt", 1);
    let before = b.bytes.clone();

    let mut fs = Ext2Fs::new(b.bytes, 0).unwrap();
    let err = fs.restore_path("/docs", true).unwrap_err();
    assert!(matches!(err, UndeleteError::UnrecoverableSlot { .. }));
    assert_eq!(fs.into_inner(), before);
}

#[test]
fn resolves_the_parent_through_subdirectories() {
    let mut fs = Ext2Fs::new(image_with_deleted_file_in_subdir(), 0).unwrap();
    let report = fs.restore_path("/sub/bar.txt", false).unwrap();
    assert_eq!(report.inode, 12);

    let after = fs.into_inner();
    assert!(inode_bit_set(&after, 12));
    assert!(block_bit_set(&after, 10));
    assert_eq!(rec_len_at(&after, 11, 24), 12);
    assert_eq!(rec_len_sum(&after, 11), BLOCK_SIZE);
}

#[test]
fn dotfiles_are_ordinary_restoration_targets() {
    let mut b = ImageBuilder::new();
    b.write_inode(13, FILE_MODE, 0, &[]);
    b.mark_inode(13);
    b.write_inode(12, FILE_MODE, 13, &[10]);
    b.write_dirent(ROOT_BLOCK, 0, ROOT_INO, 12, b".", 2);
    b.write_dirent(ROOT_BLOCK, 12, ROOT_INO, 12, b"..", 2);
    b.write_dirent(ROOT_BLOCK, 24, 13, 1000, b"foo", 1);
    b.write_dirent(ROOT_BLOCK, 36, 12, 988, b".hidden", 1);

    let mut fs = Ext2Fs::new(b.bytes, 0).unwrap();
    let report = fs.restore_path("/.hidden", false).unwrap();
    assert_eq!(report.inode, 12);
    assert!(inode_bit_set(&fs.into_inner(), 12));
}

#[test]
fn path_normalization_matches_the_command_surface() {
    let mut fs = Ext2Fs::new(image_with_deleted_file(), 0).unwrap();
    // Trailing slashes trimmed, leading "./" stripped.
    let report = fs.restore_path("./bar.txt/", false).unwrap();
    assert_eq!(report.path, "bar.txt");
    assert_eq!(report.inode, 12);
}

#[test]
fn works_when_the_filesystem_starts_at_an_offset() {
    let mut buf = vec![0u8; 4096];
    buf.extend_from_slice(&image_with_deleted_file());

    let mut fs = Ext2Fs::new(buf, 4096).unwrap();
    let report = fs.restore_path("/bar.txt", false).unwrap();
    assert_eq!(report.inode, 12);

    let after = fs.into_inner();
    assert!(inode_bit_set(&after[4096..], 12));
    assert!(block_bit_set(&after[4096..], 10));
}

#[test]
fn mutations_reach_the_mapped_image_file() {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(&image_with_deleted_file()).unwrap();
    temp.flush().unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(temp.path())
        .unwrap();
    let mmap = unsafe { MmapMut::map_mut(&file) }.unwrap();

    let mut fs = Ext2Fs::new(mmap, 0).unwrap();
    fs.restore_path("/bar.txt", false).unwrap();
    fs.into_inner().flush().unwrap();

    let on_disk = std::fs::read(temp.path()).unwrap();
    assert!(inode_bit_set(&on_disk, 12));
    assert!(block_bit_set(&on_disk, 10));
    assert_eq!(rec_len_at(&on_disk, ROOT_BLOCK, 24), 12);
}
