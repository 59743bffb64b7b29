/* ---------------------------------------------------------------------------
    libspfs - Sunflower flash filesystem library, sunflowerkernel.org
    Copyright (C) 2026 janicria

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
--------------------------------------------------------------------------- */

/*!
    libspfs/src/lib.rs

    Library root file

    SPFS lays directories, files and versioned file contents directly into a
    raw NOR flash region, which is accessed through the [`Flash`] trait.

    Filesystem layout:
    - Block 0 - Filesystem header, followed by the filesystem metadata & name
    - Block 1... - Directory, file & file content regions, each starting with a
      magic tagged block header and being one or more blocks long

    Blocks are 256 bytes in length and the filesystem must start on a 4 KiB sector.
    Every reference between regions is a block offset relative to the region
    holding it, so an image stays valid when mapped at a different address.

    Known limitations:
    - Directories hold a fixed number of entries, extension blocks aren't supported.
    - Removing an entry never frees the regions it referenced, and space is never reclaimed.
*/

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use thiserror::Error;

pub mod allocator;
pub mod config;
pub mod dir;
pub mod file;
pub mod flash;
pub mod header;
pub mod init;


pub use allocator::{AllocError, BlockState, FsInfo};
pub use config::SpfsConfig;
pub use dir::Directory;
pub use file::{File, ReadOnlyFile};
pub use flash::{Flash, FlashError, RamFlash};
pub use header::{FormatError, FsVersion};
pub use init::{FsId, Spfs};

/// The number of bytes in a block.
pub const BLOCK_SIZE: usize = 256;

/// The flash write granularity.
pub const PAGE_SIZE: u32 = 256;

/// The flash erase granularity, which the filesystem start must be aligned to.
pub const SECTOR_SIZE: u32 = 4096;

/// Names must be shorter than this many bytes.
pub const NAME_LIMIT: usize = 200;

/// The most blocks a filesystem may span, as relative offsets are 15 bits.
pub const MAX_BLOCKS: u32 = 0x7FFF;

/// The largest possible file content, as `0xFFFF` marks unfinished content.
pub const MAX_CONTENT: usize = 0xFFFE;

/// Returns the number of blocks needed to hold `bytes` bytes.
pub const fn blocks_for(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}

/// An error caused by the caller using the filesystem wrongly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("names must be shorter than 200 bytes, got {0} bytes")]
    NameTooLong(usize),

    #[error("names can't be empty")]
    EmptyName,

    #[error("an entry with that name already exists")]
    NameExists,

    #[error("no such file or directory")]
    NotFound,

    #[error("the directory already links to that entry")]
    AlreadyLinked,

    #[error("no content has been allocated for the file")]
    NotAllocated,

    #[error("content has already been allocated for the file")]
    AlreadyAllocated,

    #[error("{0} bytes is more than a file can hold")]
    ContentTooLarge(usize),

    #[error("appending {len} bytes would overrun the {capacity} bytes allocated")]
    Overflow { len: usize, capacity: usize },

    #[error("the file only has {count} versions, version {requested} doesn't exist")]
    NoSuchVersion { requested: usize, count: usize },

    #[error("offset {offset} is past the end of the {len} byte file")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("the filesystem region must be at least two blocks")]
    RegionTooSmall,

    #[error("the filesystem region doesn't fit in the flash or is too large")]
    RegionTooLarge,

    #[error("the filesystem region isn't aligned correctly")]
    Misaligned,

    #[error("the handle belongs to a different filesystem")]
    ForeignHandle,

    #[error("the file has no content to share")]
    EmptyFile,

    #[error("the file content isn't valid UTF-8")]
    InvalidUtf8,
}

/// Any error returned by the filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpfsError {
    #[error("flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<libutil::CodecError> for SpfsError {
    fn from(err: libutil::CodecError) -> Self {
        SpfsError::Format(err.into())
    }
}

/// Checks that `name` can be stored in a header.
pub(crate) fn check_name(name: &str) -> Result<(), ProtocolError> {
    match name.len() {
        0 => Err(ProtocolError::EmptyName),
        len if len >= NAME_LIMIT => Err(ProtocolError::NameTooLong(len)),
        _ => Ok(()),
    }
}
