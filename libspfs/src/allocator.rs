//! Finds free space on the flash, and classifies what each block is used for.
//!
//! Space is never reclaimed, the allocator only ever hands out blocks which
//! are still erased and moves its cursor past each reservation.

use alloc::{string::String, vec, vec::Vec};
use core::fmt::Display;
use log::debug;
use thiserror::Error;

use crate::{
    BLOCK_SIZE, Flash, FsVersion, Spfs, SpfsError, blocks_for,
    header::{BlockHeader, magic},
};

/// What a block was found to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    /// The filesystem header or file content.
    Used,
    UsedFile,
    UsedDir,
    /// Written to, but not part of any known region.
    Bad,
}

/// A summary of a filesystem and how full it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsInfo {
    pub name: String,
    pub version: FsVersion,
    pub address: u32,
    pub size: u32,
    pub blocks: u32,
    pub free: u32,
    pub used: u32,
    pub files: u32,
    pub directories: u32,
    pub bad: u32,
}

/// An error created when there's no room left for something new.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("no space left on the filesystem")]
    NoSpace,

    #[error("no space for new content in the directory")]
    DirectoryFull,
}

impl<F: Flash> Spfs<F> {
    /// Reserves a run of erased blocks large enough for `min_size` bytes,
    /// returning the index of the first block or `None` if there's no such run.
    pub fn find_free_space(&mut self, min_size: usize) -> Result<Option<u32>, SpfsError> {
        let Ok(needed) = u32::try_from(blocks_for(min_size).max(1)) else {
            debug!("spfs: {min_size} bytes can never fit");
            return Ok(None);
        };
        let end = self.block_count();
        let mut block = self.cursor.unwrap_or(1);

        while block.checked_add(needed).is_some_and(|last| last <= end) {
            let prefix = self.read_prefix(block)?;

            if BlockHeader::is_erased(prefix) {
                match self.first_written(block, needed)? {
                    None => {
                        self.cursor = Some(block + needed);
                        debug!("spfs: reserved {needed} blocks at block {block}");
                        return Ok(Some(block));
                    }
                    Some(written) if written == block => block += 1,
                    Some(written) => block = written, // nothing before it can fit
                }
                continue;
            }

            let header = BlockHeader::from_raw(prefix);
            block += match header.is_known() && header.blocks > 0 {
                true => header.blocks as u32,
                false => 1,
            };
        }

        debug!("spfs: no run of {needed} free blocks left");
        Ok(None)
    }

    /// Returns the first block in `block..block + count` which isn't fully erased.
    fn first_written(&self, block: u32, count: u32) -> Result<Option<u32>, SpfsError> {
        let run = self.read_blocks(block, count)?;
        Ok(run
            .chunks(BLOCK_SIZE)
            .position(|chunk| chunk.iter().any(|b| *b != 0xFF))
            .map(|idx| block + idx as u32))
    }

    /// Walks the whole filesystem, classifying every block.
    pub fn block_usage_map(&self) -> Result<Vec<BlockState>, SpfsError> {
        let count = self.block_count();
        let mut map = vec![BlockState::Free; count as usize];
        map[0] = BlockState::Used;

        let mut block = 1;
        while block < count {
            let prefix = self.read_prefix(block)?;
            if BlockHeader::is_erased(prefix) {
                if self.first_written(block, 1)?.is_some() {
                    map[block as usize] = BlockState::Bad;
                }
                block += 1;
                continue;
            }

            let header = BlockHeader::from_raw(prefix);
            let len = header.blocks as u32;
            if !header.is_known() || len == 0 || block + len > count {
                map[block as usize] = BlockState::Bad;
                block += 1;
                continue;
            }

            let state = match header.magic {
                magic::DIRECTORY | magic::DIRECTORY_EXTENSION => BlockState::UsedDir,
                magic::FILE => BlockState::UsedFile,
                _ => BlockState::Used,
            };
            map[block as usize..(block + len) as usize].fill(state);
            block += len;
        }

        Ok(map)
    }

    /// Returns a summary of the filesystem.
    pub fn info(&self) -> Result<FsInfo, SpfsError> {
        let map = self.block_usage_map()?;
        let count = |state| map.iter().filter(|s| **s == state).count() as u32;

        Ok(FsInfo {
            name: String::from(self.name()),
            version: self.version(),
            address: self.address(),
            size: self.size(),
            blocks: self.block_count(),
            free: count(BlockState::Free),
            used: count(BlockState::Used),
            files: count(BlockState::UsedFile),
            directories: count(BlockState::UsedDir),
            bad: count(BlockState::Bad),
        })
    }
}

impl Display for BlockState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let c = match self {
            BlockState::Free => '.',
            BlockState::Used => '#',
            BlockState::UsedFile => 'F',
            BlockState::UsedDir => 'D',
            BlockState::Bad => 'X',
        };
        write!(f, "{c}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RamFlash;

    fn new_fs() -> Spfs<RamFlash> {
        Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap()
    }

    /// Tests that reservations follow each other and never overlap.
    #[test]
    #[rustfmt::skip]
    fn reservations_are_sequential() {
        let mut fs = new_fs();
        assert_eq!( fs.find_free_space(1),     Ok(Some(2))  );
        assert_eq!( fs.find_free_space(600),   Ok(Some(3))  );
        assert_eq!( fs.find_free_space(256),   Ok(Some(6))  );
        assert_eq!( fs.find_free_space(0),     Ok(Some(7))  );
        assert_eq!( fs.find_free_space(8192),  Ok(None)     );
        assert_eq!( fs.find_free_space(24 * 256), Ok(Some(8)) );
        assert_eq!( fs.find_free_space(1),     Ok(None)     );
    }

    /// Tests that requests larger than any filesystem are refused without moving the cursor.
    #[test]
    #[rustfmt::skip]
    fn oversized_requests() {
        let mut fs = new_fs();
        assert_eq!( fs.find_free_space((1 << 32) * BLOCK_SIZE),        Ok(None)    );
        assert_eq!( fs.find_free_space(u32::MAX as usize * BLOCK_SIZE), Ok(None)    );
        assert_eq!( fs.find_free_space(usize::MAX),                     Ok(None)    );
        assert_eq!( fs.find_free_space(1),                              Ok(Some(2)) );
        assert_eq!( fs.find_free_space(1),                              Ok(Some(3)) );
    }

    /// Tests that a fresh mount skips over known regions using their stored size.
    #[test]
    fn scan_skips_regions() {
        let mut fs = new_fs();
        let root = fs.root();
        let mut file = root.create_file(&mut fs, "big").unwrap();
        file.write(&mut fs, &[7; 1000]).unwrap();

        let mut fs = Spfs::open(fs.into_flash(), 0, 8192, crate::SpfsConfig::default()).unwrap();
        // root, file header & 4 content blocks
        assert_eq!(fs.find_free_space(1), Ok(Some(7)));
    }

    /// Tests that written blocks inside an erased looking run aren't handed out.
    #[test]
    fn partially_written_runs_are_skipped() {
        let mut fs = new_fs();
        let mut junk = [0xFF; BLOCK_SIZE];
        junk[BLOCK_SIZE - 1] = 0x7F;
        fs.write_block(4, &junk).unwrap();

        assert_eq!(fs.find_free_space(3 * BLOCK_SIZE), Ok(Some(5)));
        assert_eq!(fs.find_free_space(BLOCK_SIZE), Ok(Some(8)));
    }

    /// Tests that the usage map classifies every kind of block.
    #[test]
    fn usage_map_classification() {
        let mut fs = new_fs();
        let root = fs.root();
        let mut file = root.create_file(&mut fs, "a.txt").unwrap();
        file.write(&mut fs, b"hello").unwrap();
        root.create_directory(&mut fs, "data").unwrap();

        let mut junk = [0xFF; BLOCK_SIZE];
        junk[..4].copy_from_slice(&[0x34, 0x12, 0x01, 0x00]);
        fs.write_block(6, &junk).unwrap();

        // a content header claiming to run off the end
        junk[..4].copy_from_slice(&[0xCD, 0x70, 0x10, 0x00]);
        fs.write_block(30, &junk).unwrap();

        let map = fs.block_usage_map().unwrap();
        let drawn: String = map.iter().map(|s| alloc::format!("{s}")).collect();
        assert_eq!(drawn, "#DF#D.X.......................X.");

        let info = fs.info().unwrap();
        assert_eq!((info.free, info.used, info.files, info.directories, info.bad), (25, 2, 1, 2, 2));
        assert_eq!(info.blocks, 32);
    }
}
