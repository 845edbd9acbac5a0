use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use ext2_undelete::{Ext2Fs, UndeleteError};
use log::error;
use memmap2::MmapMut;
use std::fs::OpenOptions;

/// Exit status when the path does not resolve or the entry cannot be
/// located or safely restored, mirroring errno ENOENT.
const EXIT_ENOENT: i32 = 2;

fn restore_file(
    image_path: &str,
    file_path: &str,
    offset: &u64,
    recursive: &bool,
    superblock: &bool,
    groupdesc: &bool,
    json: &bool,
    verbose: &bool,
) -> i32 {
    let file = match OpenOptions::new().read(true).write(true).open(image_path) {
        Ok(file) => file,
        Err(err) => {
            error!("cannot open image {}: {}", image_path, err);
            return 1;
        }
    };
    // Shared read-write mapping; mutations land in the image file itself.
    let mmap = match unsafe { MmapMut::map_mut(&file) } {
        Ok(mmap) => mmap,
        Err(err) => {
            error!("cannot map image {}: {}", image_path, err);
            return 1;
        }
    };

    let mut fs = match Ext2Fs::new(mmap, *offset as usize) {
        Ok(fs) => fs,
        Err(err) => {
            error!("{}", err);
            return 1;
        }
    };
    if *verbose {
        println!(
            "ext2 filesystem opened ({} byte blocks, {} blocks, {} inodes).",
            fs.block_size(),
            fs.superblock.blocks_count(),
            fs.superblock.inodes_count()
        );
    }

    if *superblock {
        if *json {
            println!(
                "{}",
                serde_json::to_string_pretty(&fs.superblock.to_json()).unwrap()
            );
        } else {
            fs.superblock.print_sp_info();
        }
    }

    if *groupdesc {
        if *json {
            println!(
                "{}",
                serde_json::to_string_pretty(&fs.group.to_json()).unwrap()
            );
        } else {
            println!("{:#?}", fs.group);
        }
    }

    match fs.restore_path(file_path, *recursive) {
        Ok(report) => {
            if *json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap());
            } else {
                match fs.get_inode(report.inode) {
                    Ok(inode) => println!("{}", inode.to_string()),
                    Err(err) => error!("{}", err),
                }
                println!(
                    "restored '{}' (inode {}, {} inode(s), {} block(s) re-marked)",
                    report.path,
                    report.inode,
                    report.inodes_restored,
                    report.blocks_marked.len()
                );
            }
            let mmap = fs.into_inner();
            if let Err(err) = mmap.flush() {
                error!("flushing the mapping failed: {}", err);
                return 1;
            }
            0
        }
        Err(err) => {
            eprintln!("{}", err);
            match err {
                UndeleteError::InvalidImage(_) | UndeleteError::Io(_) => 1,
                _ => EXIT_ENOENT,
            }
        }
    }
}

fn main() {
    env_logger::init();
    let matches = Command::new("ext2_undelete")
        .version("1.0")
        .author("ForensicXlab")
        .about("Restore a deleted file inside an ext2 disk image.")
        .arg(
            Arg::new("image")
                .short('i')
                .long("image")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the ext2 image to repair."),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Path of the deleted file inside the image."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(false)
                .help("The ext2 filesystem starts at address 0x...."),
        )
        .arg(
            Arg::new("recursive")
                .short('r')
                .long("recursive")
                .action(ArgAction::SetTrue)
                .help("Also restore directories, descending into their entries."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the superblock information."),
        )
        .arg(
            Arg::new("groupdesc")
                .short('g')
                .long("groupdesc")
                .action(ArgAction::SetTrue)
                .help("Display the group descriptor."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let image_path = matches.get_one::<String>("image").unwrap();
    let file_path = matches.get_one::<String>("path").unwrap();
    let offset = match matches.get_one::<u64>("offset") {
        Some(offset) => offset,
        None => &0u64,
    };
    let recursive = match matches.get_one::<bool>("recursive") {
        Some(recursive) => recursive,
        None => &false,
    };
    let superblock = match matches.get_one::<bool>("superblock") {
        Some(superblock) => superblock,
        None => &false,
    };
    let groupdesc = match matches.get_one::<bool>("groupdesc") {
        Some(groupdesc) => groupdesc,
        None => &false,
    };
    let verbose = match matches.get_one::<bool>("verbose") {
        Some(verbose) => verbose,
        None => &false,
    };
    let json = match matches.get_one::<bool>("json") {
        Some(json) => json,
        None => &false,
    };

    std::process::exit(restore_file(
        image_path, file_path, offset, recursive, superblock, groupdesc, json, verbose,
    ));
}
