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
    libspfs/src/header.rs

    The headers stored on flash, and how they're encoded.

    Everything is packed & little-endian. Headers are never cast from flash,
    each one is decoded into an owned value and encoded into a block sized
    buffer before being written back.
*/

use alloc::{string::String, vec::Vec};
use bitflags::bitflags;
use core::fmt::Display;
use libutil::{ByteReader, ByteWriter, CodecError, Crc16, Crc32};
use thiserror::Error;

use crate::{BLOCK_SIZE, MAX_BLOCKS, PAGE_SIZE};

/// The magic numbers identifying each structure.
pub mod magic {
    pub const FILESYSTEM: u32 = 0xA36C_A3FA;
    pub const METADATA: u16 = 0xB50E;
    pub const DIRECTORY: u16 = 0x9314;
    pub const DIRECTORY_EXTENSION: u16 = 0x85E5;
    pub const FILE: u16 = 0xB313;
    pub const FILE_CONTENT: u16 = 0x70CD;

    /// Directory entry tag for a subdirectory.
    pub const SUBDIR_ENTRY: u16 = 0xA498;

    /// Directory entry tag for a file.
    pub const FILE_ENTRY: u16 = 0xB313;

    /// Marks the end of a directory's entry table, as it's the erased value.
    pub const END_OF_TABLE: u16 = 0xFFFF;
}

/// A `u16` field which hasn't been written since the last erase.
pub const ERASED_U16: u16 = 0xFFFF;

/// A `u32` field which hasn't been written since the last erase.
pub const ERASED_U32: u32 = 0xFFFF_FFFF;

/// ANDed into an entry's tag to mark it deleted, only clearing bits so it can be done in place.
pub const DELETED_MASK: u16 = 0x0FFF;

/// The first block of the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemHeader {
    /// Should always be [`magic::FILESYSTEM`].
    pub magic: u32,
    pub version: FsVersion,

    /// The size of the filesystem, in bytes.
    pub size: u32,
    pub block_size: u16,
    pub page_size: u16,

    /// The byte offset from the start of the filesystem to its [`FilesystemMetadata`].
    pub meta_offset: u32,

    /// CRC-32 over the fields above, or [`ERASED_U32`] if the filesystem should be formatted.
    pub checksum: u32,
}

/// Represents the version a filesystem was made with.
/// - Bits 24-31 - major
/// - Bits 16-23 - minor
/// - Bits 8-15 - patch
/// - Bits 0-7 - build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FsVersion(u32);

/// The filesystem's name and where its root directory lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemMetadata {
    /// The block index of the root directory, relative to the start of the filesystem.
    pub root_block: u16,
    pub name: String,
    pub checksum: u16,
}

/// The prefix shared by every region, letting a scan skip over regions without knowing their type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u16,

    /// The length of the region, in blocks.
    pub blocks: u16,
}

/// A directory and its table of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHeader {
    pub blocks: u16,
    pub name: String,
    pub checksum: u16,

    /// Reserved for extension blocks, always [`ERASED_U16`].
    pub next: u16,

    /// Every used slot in the entry table, including deleted ones.
    pub entries: Vec<ContentEntry>,
}

/// A directory's reference to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentEntry {
    pub tag: u16,

    /// The child's block offset relative to the directory.
    pub block_offset: i16,
}

/// What a [`ContentEntry`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Deleted,
    End,
    Unknown,
}

/// A file's name and where its content chain starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub blocks: u16,
    pub name: String,
    pub checksum: u16,
    pub flags: FileFlags,

    /// The first content version, relative to the file header.
    pub content: RelOffset,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Describes how a file header came to be.
    pub struct FileFlags: u16 {
        /// Set if the header shares the content chain of another file.
        const HARDLINK = 1;

        const _ = !0;
    }
}

/// One version of a file's content, followed by the content itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContentHeader {
    /// The length of the region, in blocks.
    pub blocks: u16,

    /// The length of the content in bytes, [`ERASED_U16`] until the content is finished.
    pub len: u16,

    /// The byte offset from the start of the region to the content.
    pub data_offset: u16,
    pub checksum: u16,

    /// Reserved for content split over several regions, always [`ERASED_U16`].
    pub next_partition: u16,

    /// The next newer version, relative to this header.
    pub next_version: RelOffset,
}

/// A nullable signed-magnitude block offset.
/// - Bit 15 - set if the offset is negative
/// - Bits 0-14 - the magnitude
///
/// `0xFFFF` is null, so it can be filled in later without erasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RelOffset(u16);

/// An error created when a structure on flash is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("no filesystem was found")]
    NotFound,

    #[error("bad magic number, expected {expected:#x} but found {found:#x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("filesystem version {0} isn't supported")]
    UnsupportedVersion(FsVersion),

    #[error("the filesystem's block, page or total size isn't supported")]
    BadGeometry,

    #[error("checksum mismatch, stored {stored:#x} but computed {computed:#x}")]
    Checksum { stored: u32, computed: u32 },

    #[error("malformed header, {0}")]
    BadHeader(&'static str),

    #[error("a name isn't valid UTF-8")]
    BadName,

    #[error("header is truncated, {0}")]
    Truncated(#[from] CodecError),
}

/// Returns the value of the `name_size_meta_offset` field for a name.
/// - Bits 0-7 - the name's length
/// - Bits 8-15 - the offset of the metadata, the end of the name rounded up to 2 bytes
fn name_size_meta_offset(fixed: usize, name: &str) -> u16 {
    let meta = (fixed + name.len()).next_multiple_of(2);
    ((meta as u16) << 8) | name.len() as u16
}

/// Reads the name following a header's fixed fields, then seeks to the metadata.
fn read_name(r: &mut ByteReader, fixed: usize, packed: u16) -> Result<String, FormatError> {
    let len = (packed & 0xFF) as usize;
    let meta = (packed >> 8) as usize;
    if meta != (fixed + len).next_multiple_of(2) {
        return Err(FormatError::BadHeader("metadata offset doesn't follow the name"));
    }

    let name = r.bytes(len)?;
    let name = core::str::from_utf8(name).map_err(|_| FormatError::BadName)?;
    r.seek(meta)?;
    Ok(String::from(name))
}

/// Checks a region's magic number.
fn expect_magic(found: u16, expected: u16) -> Result<(), FormatError> {
    if found != expected {
        return Err(FormatError::BadMagic {
            expected: expected as u32,
            found: found as u32,
        });
    }
    Ok(())
}

/// Checks a stored CRC-16 against the computed one.
fn expect_checksum(stored: u16, computed: u16) -> Result<(), FormatError> {
    if stored != computed {
        return Err(FormatError::Checksum {
            stored: stored as u32,
            computed: computed as u32,
        });
    }
    Ok(())
}

impl FilesystemHeader {
    /// The length of the header, in bytes.
    pub const SIZE: usize = 24;

    /// The number of leading bytes covered by the checksum.
    const CHECKED: usize = 20;

    /// Creates a new header for a filesystem of `size` bytes.
    pub fn new(size: u32) -> Self {
        let mut header = FilesystemHeader {
            magic: magic::FILESYSTEM,
            version: FsVersion::CURRENT,
            size,
            block_size: BLOCK_SIZE as u16,
            page_size: PAGE_SIZE as u16,
            meta_offset: Self::SIZE as u32,
            checksum: ERASED_U32,
        };
        header.checksum = header.computed_checksum();
        header
    }

    /// Encodes the header to the start of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut w = ByteWriter::new(buf);
        w.put_u32(self.magic)?;
        w.put_u32(self.version.raw())?;
        w.put_u32(self.size)?;
        w.put_u32(((self.block_size as u32) << 16) | self.page_size as u32)?;
        w.put_u32(self.meta_offset)?;
        w.put_u32(self.checksum)
    }

    /// Decodes the header from the start of `buf` without validating it.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(buf);
        let magic = r.u32()?;
        let version = FsVersion::from_raw(r.u32()?);
        let size = r.u32()?;
        let sizes = r.u32()?;
        Ok(FilesystemHeader {
            magic,
            version,
            size,
            block_size: (sizes >> 16) as u16,
            page_size: sizes as u16,
            meta_offset: r.u32()?,
            checksum: r.u32()?,
        })
    }

    /// Returns the CRC-32 of the header's fields.
    pub fn computed_checksum(&self) -> u32 {
        let mut buf = [0; Self::SIZE];
        // can't fail, buf is exactly the header's size
        let _ = self.encode(&mut buf);
        Crc32::new().update(&buf[..Self::CHECKED]).finish()
    }

    /// Returns if the header was stamped with a magic number but never finished,
    /// meaning the filesystem should be formatted.
    pub fn is_unformatted(&self) -> bool {
        self.checksum == ERASED_U32
    }

    /// Checks the magic number and version.
    pub fn check_identity(&self, supported: FsVersion) -> Result<(), FormatError> {
        if self.magic != magic::FILESYSTEM {
            return Err(FormatError::BadMagic {
                expected: magic::FILESYSTEM,
                found: self.magic,
            });
        }

        if !self.version.is_compatible(supported) {
            return Err(FormatError::UnsupportedVersion(self.version));
        }

        Ok(())
    }

    /// Checks the checksum and geometry of a formatted header.
    pub fn check_integrity(&self) -> Result<(), FormatError> {
        let computed = self.computed_checksum();
        if self.checksum != computed {
            return Err(FormatError::Checksum {
                stored: self.checksum,
                computed,
            });
        }

        let blocks = self.size / BLOCK_SIZE as u32;
        if self.block_size as usize != BLOCK_SIZE
            || self.page_size as u32 != PAGE_SIZE
            || self.size % BLOCK_SIZE as u32 != 0
            || !(2..=MAX_BLOCKS).contains(&blocks)
            || self.meta_offset as usize + FilesystemMetadata::FIXED > BLOCK_SIZE
        {
            return Err(FormatError::BadGeometry);
        }

        Ok(())
    }
}

impl FsVersion {
    /// The version written by this library.
    pub const CURRENT: FsVersion = FsVersion::new(1, 0, 0, 0);

    /// Creates a new version.
    pub const fn new(major: u8, minor: u8, patch: u8, build: u8) -> Self {
        FsVersion(u32::from_be_bytes([major, minor, patch, build]))
    }

    pub const fn from_raw(raw: u32) -> Self {
        FsVersion(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Returns the `(major, minor, patch, build)` components of the version.
    pub const fn parts(&self) -> (u8, u8, u8, u8) {
        let [major, minor, patch, build] = self.0.to_be_bytes();
        (major, minor, patch, build)
    }

    /// Returns if a filesystem of this version can be used by `other`,
    /// only the major and minor components need to match.
    pub const fn is_compatible(&self, other: FsVersion) -> bool {
        (self.0 >> 16) == (other.0 >> 16)
    }
}

impl Display for FsVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (major, minor, patch, build) = self.parts();
        write!(f, "{major}.{minor}.{patch}.{build}")
    }
}

impl FilesystemMetadata {
    /// The length of the fields before the name, in bytes.
    pub const FIXED: usize = 8;

    /// Creates new metadata with a root directory which hasn't been created yet.
    pub fn new(name: &str) -> Self {
        let mut meta = FilesystemMetadata {
            root_block: ERASED_U16,
            name: String::from(name),
            checksum: ERASED_U16,
        };
        meta.checksum = meta.computed_checksum();
        meta
    }

    /// Returns the CRC-16 of the metadata, which excludes the root block as it's filled in later.
    pub fn computed_checksum(&self) -> u16 {
        Crc16::new()
            .update(&magic::METADATA.to_le_bytes())
            .update(&(self.name.len() as u16).to_le_bytes())
            .update(self.name.as_bytes())
            .finish()
    }

    /// Encodes the metadata at `offset` into `buf`.
    pub fn encode(&self, buf: &mut [u8], offset: usize) -> Result<(), CodecError> {
        let mut w = ByteWriter::new(buf);
        w.seek(offset)?;
        w.put_u16(magic::METADATA)?;
        w.put_u16(self.root_block)?;
        w.put_u16(self.name.len() as u16)?;
        w.put_u16(self.checksum)?;
        w.put_bytes(self.name.as_bytes())
    }

    /// Decodes and validates the metadata at `offset` in `buf`.
    pub fn decode(buf: &[u8], offset: usize) -> Result<Self, FormatError> {
        let mut r = ByteReader::at(buf, offset)?;
        expect_magic(r.u16()?, magic::METADATA)?;
        let root_block = r.u16()?;
        let len = r.u16()? as usize;
        let checksum = r.u16()?;
        let name = core::str::from_utf8(r.bytes(len)?).map_err(|_| FormatError::BadName)?;

        let meta = FilesystemMetadata {
            root_block,
            name: String::from(name),
            checksum,
        };
        expect_checksum(checksum, meta.computed_checksum())?;
        Ok(meta)
    }
}

impl BlockHeader {
    /// The length of the header, in bytes.
    pub const SIZE: usize = 4;

    /// Reads the header at the start of a region.
    pub fn from_raw(bytes: [u8; Self::SIZE]) -> Self {
        BlockHeader {
            magic: u16::from_le_bytes([bytes[0], bytes[1]]),
            blocks: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Returns if the bytes are still erased.
    pub fn is_erased(bytes: [u8; Self::SIZE]) -> bool {
        bytes == [0xFF; Self::SIZE]
    }

    /// Returns if the magic belongs to a region which can be skipped over.
    pub fn is_known(&self) -> bool {
        matches!(
            self.magic,
            magic::DIRECTORY | magic::DIRECTORY_EXTENSION | magic::FILE | magic::FILE_CONTENT
        )
    }
}

impl DirectoryHeader {
    /// The length of the fields before the name, in bytes.
    const FIXED: usize = 6;

    /// The length of the metadata fields before the entry table, in bytes.
    const META: usize = 4;

    /// The number of blocks a new directory takes up.
    pub const BLOCKS: u16 = 1;

    /// Creates a new, empty directory.
    pub fn new(name: &str) -> Self {
        let mut dir = DirectoryHeader {
            blocks: Self::BLOCKS,
            name: String::from(name),
            checksum: ERASED_U16,
            next: ERASED_U16,
            entries: Vec::new(),
        };
        dir.checksum = dir.computed_checksum();
        dir
    }

    /// Returns the byte offset of the directory's metadata.
    pub fn meta_offset(&self) -> usize {
        (Self::FIXED + self.name.len()).next_multiple_of(2)
    }

    /// Returns the number of entries which fit in the directory's table.
    pub fn capacity(&self) -> usize {
        Self::capacity_for(self.blocks, self.meta_offset())
    }

    fn capacity_for(blocks: u16, meta_offset: usize) -> usize {
        (blocks as usize * BLOCK_SIZE).saturating_sub(meta_offset + Self::META) / ContentEntry::SIZE
    }

    /// Returns the entries which haven't been deleted.
    pub fn live_entries(&self) -> impl Iterator<Item = &ContentEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind(), EntryKind::Directory | EntryKind::File))
    }

    /// Returns the CRC-16 of the directory's fixed fields and name.
    pub fn computed_checksum(&self) -> u16 {
        Crc16::new()
            .update(&magic::DIRECTORY.to_le_bytes())
            .update(&self.blocks.to_le_bytes())
            .update(&name_size_meta_offset(Self::FIXED, &self.name).to_le_bytes())
            .update(self.name.as_bytes())
            .finish()
    }

    /// Encodes the directory into `buf`, which should be erased beforehand.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(magic::DIRECTORY)?;
        w.put_u16(self.blocks)?;
        w.put_u16(name_size_meta_offset(Self::FIXED, &self.name))?;
        w.put_bytes(self.name.as_bytes())?;
        w.seek(self.meta_offset())?;
        w.put_u16(self.checksum)?;
        w.put_u16(self.next)?;

        if self.entries.len() > self.capacity() {
            let end = self.meta_offset() + Self::META + self.entries.len() * ContentEntry::SIZE;
            return Err(CodecError { offset: 0, len: end, size: self.blocks as usize * BLOCK_SIZE });
        }
        for entry in &self.entries {
            w.put_u16(entry.tag)?;
            w.put_i16(entry.block_offset)?;
        }
        Ok(())
    }

    /// Decodes and validates the directory at the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        expect_magic(r.u16()?, magic::DIRECTORY)?;
        let blocks = r.u16()?;
        if blocks == 0 {
            return Err(FormatError::BadHeader("directory is zero blocks long"));
        }

        let packed = r.u16()?;
        let name = read_name(&mut r, Self::FIXED, packed)?;
        let checksum = r.u16()?;
        let next = r.u16()?;
        let mut dir = DirectoryHeader {
            blocks,
            name,
            checksum,
            next,
            entries: Vec::new(),
        };
        expect_checksum(checksum, dir.computed_checksum())?;

        for _ in 0..dir.capacity() {
            let entry = ContentEntry {
                tag: r.u16()?,
                block_offset: r.i16()?,
            };
            if entry.kind() == EntryKind::End {
                break;
            }
            dir.entries.push(entry);
        }

        Ok(dir)
    }
}

impl ContentEntry {
    /// The length of an entry, in bytes.
    pub const SIZE: usize = 4;

    /// Returns what the entry refers to.
    pub fn kind(&self) -> EntryKind {
        match self.tag {
            magic::SUBDIR_ENTRY => EntryKind::Directory,
            magic::FILE_ENTRY => EntryKind::File,
            magic::END_OF_TABLE => EntryKind::End,
            tag if tag & !DELETED_MASK == 0 => EntryKind::Deleted,
            _ => EntryKind::Unknown,
        }
    }

    /// Returns the block index the entry refers to, given the directory's block index.
    pub fn target(&self, dir_block: u32) -> Option<u32> {
        u32::try_from(dir_block as i64 + self.block_offset as i64).ok()
    }
}

impl FileHeader {
    /// The length of the fields before the name, in bytes.
    const FIXED: usize = 6;

    /// The length of the metadata fields, in bytes.
    const META: usize = 6;

    /// The number of blocks a new file header takes up.
    pub const BLOCKS: u16 = 1;

    /// Creates a new file header, optionally sharing an existing content chain.
    pub fn new(name: &str, flags: FileFlags, content: RelOffset) -> Self {
        let mut file = FileHeader {
            blocks: Self::BLOCKS,
            name: String::from(name),
            checksum: ERASED_U16,
            flags,
            content,
        };
        file.checksum = file.computed_checksum();
        file
    }

    /// Returns the byte offset of the file's metadata.
    pub fn meta_offset(&self) -> usize {
        (Self::FIXED + self.name.len()).next_multiple_of(2)
    }

    /// Returns the length of the header, in bytes.
    pub fn len(&self) -> usize {
        self.meta_offset() + Self::META
    }

    /// Returns the CRC-16 of the file's fields, excluding the content link which is filled in later.
    pub fn computed_checksum(&self) -> u16 {
        Crc16::new()
            .update(&magic::FILE.to_le_bytes())
            .update(&self.blocks.to_le_bytes())
            .update(&name_size_meta_offset(Self::FIXED, &self.name).to_le_bytes())
            .update(self.name.as_bytes())
            .update(&self.flags.bits().to_le_bytes())
            .finish()
    }

    /// Encodes the file header into `buf`, which should be erased beforehand.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(magic::FILE)?;
        w.put_u16(self.blocks)?;
        w.put_u16(name_size_meta_offset(Self::FIXED, &self.name))?;
        w.put_bytes(self.name.as_bytes())?;
        w.seek(self.meta_offset())?;
        w.put_u16(self.checksum)?;
        w.put_u16(self.flags.bits())?;
        w.put_u16(self.content.raw())
    }

    /// Decodes and validates the file header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        expect_magic(r.u16()?, magic::FILE)?;
        let blocks = r.u16()?;
        if blocks == 0 {
            return Err(FormatError::BadHeader("file is zero blocks long"));
        }

        let packed = r.u16()?;
        let name = read_name(&mut r, Self::FIXED, packed)?;
        let file = FileHeader {
            blocks,
            name,
            checksum: r.u16()?,
            flags: FileFlags::from_bits_retain(r.u16()?),
            content: RelOffset::from_raw(r.u16()?),
        };
        expect_checksum(file.checksum, file.computed_checksum())?;
        Ok(file)
    }
}

impl FileContentHeader {
    /// The length of the header, in bytes.
    pub const SIZE: usize = 14;

    /// Where content starts in the region, the header's end aligned up to 8 bytes.
    pub const DATA_OFFSET: u16 = (Self::SIZE as u16 + 7) & !7;

    /// Creates a header for a region of `blocks` blocks whose content isn't known yet.
    pub fn provisional(blocks: u16) -> Self {
        FileContentHeader {
            blocks,
            len: ERASED_U16,
            data_offset: Self::DATA_OFFSET,
            checksum: ERASED_U16,
            next_partition: ERASED_U16,
            next_version: RelOffset::NONE,
        }
    }

    /// Returns the header once `len` bytes of content have been written.
    pub fn finished(self, len: u16) -> Self {
        let mut header = FileContentHeader { len, ..self };
        header.checksum = header.computed_checksum();
        header
    }

    /// Returns the most content the region can hold.
    pub fn capacity(&self) -> usize {
        (self.blocks as usize * BLOCK_SIZE).saturating_sub(self.data_offset as usize)
    }

    /// Returns the CRC-16 of the header, excluding the links which are filled in later.
    pub fn computed_checksum(&self) -> u16 {
        Crc16::new()
            .update(&magic::FILE_CONTENT.to_le_bytes())
            .update(&self.blocks.to_le_bytes())
            .update(&self.len.to_le_bytes())
            .update(&self.data_offset.to_le_bytes())
            .finish()
    }

    /// Encodes the header to the start of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut w = ByteWriter::new(buf);
        w.put_u16(magic::FILE_CONTENT)?;
        w.put_u16(self.blocks)?;
        w.put_u16(self.len)?;
        w.put_u16(self.data_offset)?;
        w.put_u16(self.checksum)?;
        w.put_u16(self.next_partition)?;
        w.put_u16(self.next_version.raw())
    }

    /// Decodes the header at the start of `buf`, only checking its magic.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        let mut r = ByteReader::new(buf);
        expect_magic(r.u16()?, magic::FILE_CONTENT)?;
        Ok(FileContentHeader {
            blocks: r.u16()?,
            len: r.u16()?,
            data_offset: r.u16()?,
            checksum: r.u16()?,
            next_partition: r.u16()?,
            next_version: RelOffset::from_raw(r.u16()?),
        })
    }

    /// Checks that the content was finished and that the header is intact.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.len == ERASED_U16 {
            return Err(FormatError::BadHeader("content was never finished"));
        }
        expect_checksum(self.checksum, self.computed_checksum())?;

        if (self.data_offset as usize) < Self::SIZE || self.len as usize > self.capacity() {
            return Err(FormatError::BadHeader("content doesn't fit in its region"));
        }
        Ok(())
    }
}

impl RelOffset {
    /// The null offset.
    pub const NONE: RelOffset = RelOffset(ERASED_U16);

    /// Set if the offset is negative.
    const NEGATIVE: u16 = 0x8000;

    /// The largest magnitude an offset can have without being mistaken for null.
    const MAX: u32 = 0x7FFE;

    pub const fn from_raw(raw: u16) -> Self {
        RelOffset(raw)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    pub const fn is_none(&self) -> bool {
        self.0 == ERASED_U16
    }

    /// Creates the offset leading from block `from` to block `to`.
    pub fn between(from: u32, to: u32) -> Option<Self> {
        let magnitude = from.abs_diff(to);
        if magnitude > Self::MAX {
            return None;
        }

        let magnitude = magnitude as u16;
        Some(if to < from { RelOffset(Self::NEGATIVE | magnitude) } else { RelOffset(magnitude) })
    }

    /// Returns the block the offset leads to from block `from`.
    pub fn resolve(&self, from: u32) -> Option<u32> {
        if self.is_none() {
            return None;
        }

        let magnitude = (self.0 & !Self::NEGATIVE) as u32;
        if self.0 & Self::NEGATIVE != 0 {
            from.checked_sub(magnitude)
        } else {
            from.checked_add(magnitude)
        }
    }
}

impl Display for RelOffset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.is_none() {
            true => write!(f, "null offset"),
            false if self.0 & Self::NEGATIVE != 0 => write!(f, "-{}", self.0 & !Self::NEGATIVE),
            false => write!(f, "+{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that a fresh filesystem header has the right layout and validates.
    #[test]
    fn filesystem_header_layout() {
        let header = FilesystemHeader::new(8192);
        let mut buf = [0xFF; BLOCK_SIZE];
        header.encode(&mut buf).unwrap();

        assert_eq!(&buf[0..4], &[0xFA, 0xA3, 0x6C, 0xA3]);
        assert_eq!(&buf[4..8], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&buf[8..12], &8192u32.to_le_bytes());
        assert_eq!(&buf[12..16], &((256u32 << 16) | 256).to_le_bytes());
        assert_eq!(&buf[16..20], &24u32.to_le_bytes());
        assert_eq!(buf[24], 0xFF);

        let decoded = FilesystemHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.check_identity(FsVersion::CURRENT).is_ok());
        assert!(decoded.check_integrity().is_ok());
        assert!(!decoded.is_unformatted());
    }

    /// Tests that filesystem headers are rejected for each kind of damage.
    #[test]
    fn filesystem_header_rejections() {
        let good = FilesystemHeader::new(8192);

        let wrong_magic = FilesystemHeader { magic: 0x1234, ..good.clone() };
        assert!(matches!(wrong_magic.check_identity(FsVersion::CURRENT), Err(FormatError::BadMagic { .. })));

        let newer = FilesystemHeader { version: FsVersion::new(1, 1, 0, 0), ..good.clone() };
        assert!(matches!(newer.check_identity(FsVersion::CURRENT), Err(FormatError::UnsupportedVersion(_))));

        let patched = FilesystemHeader { version: FsVersion::new(1, 0, 7, 3), ..good.clone() };
        assert!(patched.check_identity(FsVersion::CURRENT).is_ok());

        let resized = FilesystemHeader { size: 4096, ..good.clone() };
        assert!(matches!(resized.check_integrity(), Err(FormatError::Checksum { .. })));

        let mut tiny = FilesystemHeader { size: 256, ..good.clone() };
        tiny.checksum = tiny.computed_checksum();
        assert_eq!(tiny.check_integrity(), Err(FormatError::BadGeometry));

        let stamped = FilesystemHeader { checksum: ERASED_U32, ..good };
        assert!(stamped.is_unformatted());
    }

    /// Tests that versions are ordered and displayed by their components.
    #[test]
    #[rustfmt::skip]
    fn fs_version_components() {
        assert_eq!(      FsVersion::CURRENT.raw(),                    0x0100_0000     );
        assert_eq!(      FsVersion::new(1, 2, 3, 4).parts(),          (1, 2, 3, 4)    );
        assert!(         FsVersion::new(2, 0, 0, 0) > FsVersion::new(1, 9, 9, 9)      );
        assert!(         FsVersion::new(1, 0, 0, 0) < FsVersion::new(1, 0, 0, 1)      );
        assert_eq!(      alloc::format!("{}", FsVersion::new(1, 2, 3, 4)), "1.2.3.4" );
    }

    /// Tests that the metadata's root block is outside of it's checksum, so it can be filled in later.
    #[test]
    fn metadata_root_block_is_unchecked() {
        let mut meta = FilesystemMetadata::new("TestFS");
        let mut buf = [0xFF; BLOCK_SIZE];
        meta.encode(&mut buf, FilesystemHeader::SIZE).unwrap();
        assert_eq!(FilesystemMetadata::decode(&buf, FilesystemHeader::SIZE), Ok(meta.clone()));

        meta.root_block = 1;
        meta.encode(&mut buf, FilesystemHeader::SIZE).unwrap();
        assert_eq!(FilesystemMetadata::decode(&buf, FilesystemHeader::SIZE).unwrap().root_block, 1);

        buf[FilesystemHeader::SIZE + FilesystemMetadata::FIXED] ^= 0x20; // 'T' -> 't'
        assert!(matches!(
            FilesystemMetadata::decode(&buf, FilesystemHeader::SIZE),
            Err(FormatError::Checksum { .. })
        ));
    }

    /// Tests the layout of a directory and its entry table.
    #[test]
    fn directory_layout() {
        let mut dir = DirectoryHeader::new("root");
        assert_eq!(dir.meta_offset(), 10);
        assert_eq!(dir.capacity(), (256 - 10 - 4) / 4);

        dir.entries.push(ContentEntry { tag: magic::SUBDIR_ENTRY, block_offset: 1 });
        dir.entries.push(ContentEntry { tag: magic::FILE_ENTRY, block_offset: -3 });
        let mut buf = [0xFF; BLOCK_SIZE];
        dir.encode(&mut buf).unwrap();

        assert_eq!(&buf[0..6], &[0x14, 0x93, 0x01, 0x00, 0x04, 0x0A]);
        assert_eq!(&buf[6..10], b"root");
        assert_eq!(&buf[14..18], &[0x98, 0xA4, 0x01, 0x00]);
        assert_eq!(&buf[18..22], &[0x13, 0xB3, 0xFD, 0xFF]);
        assert_eq!(&buf[22..24], &[0xFF, 0xFF]);
        assert_eq!(DirectoryHeader::decode(&buf), Ok(dir));
    }

    /// Tests that odd length names are padded and that a full table has no end marker.
    #[test]
    fn directory_full_table() {
        let name = "a".repeat(crate::NAME_LIMIT - 1);
        let mut dir = DirectoryHeader::new(&name);
        assert_eq!(dir.meta_offset(), 206);
        assert_eq!(dir.capacity(), 11);

        for offset in 0..dir.capacity() as i16 {
            dir.entries.push(ContentEntry { tag: magic::FILE_ENTRY, block_offset: offset + 1 });
        }
        let mut buf = [0xFF; BLOCK_SIZE];
        dir.encode(&mut buf).unwrap();
        assert_eq!(DirectoryHeader::decode(&buf).unwrap().entries.len(), dir.capacity());

        dir.entries.push(ContentEntry { tag: magic::FILE_ENTRY, block_offset: 99 });
        assert!(dir.encode(&mut [0xFF; BLOCK_SIZE]).is_err());
    }

    /// Tests that deleting an entry in place only clears bits and is recognised.
    #[test]
    #[rustfmt::skip]
    fn entry_kinds() {
        let entry = |tag| ContentEntry { tag, block_offset: 1 };
        assert_eq!( entry(magic::SUBDIR_ENTRY).kind(),               EntryKind::Directory );
        assert_eq!( entry(magic::FILE_ENTRY).kind(),                 EntryKind::File      );
        assert_eq!( entry(magic::END_OF_TABLE).kind(),               EntryKind::End       );
        assert_eq!( entry(magic::SUBDIR_ENTRY & DELETED_MASK).kind(), EntryKind::Deleted   );
        assert_eq!( entry(magic::FILE_ENTRY & DELETED_MASK).kind(),   EntryKind::Deleted   );
        assert_eq!( entry(0x1234).kind(),                            EntryKind::Unknown   );
        assert_eq!( entry(0).target(4),                              Some(5)              );
        assert_eq!( ContentEntry { tag: 0, block_offset: -5 }.target(4), None             );
    }

    /// Tests that a corrupted directory name is caught by the checksum.
    #[test]
    fn directory_checksum_covers_name() {
        let mut buf = [0xFF; BLOCK_SIZE];
        DirectoryHeader::new("data").encode(&mut buf).unwrap();
        buf[7] ^= 0x01;
        assert!(matches!(DirectoryHeader::decode(&buf), Err(FormatError::Checksum { .. })));

        let mut buf = [0xFF; BLOCK_SIZE];
        DirectoryHeader::new("data").encode(&mut buf).unwrap();
        buf[5] = 0x0C; // metadata offset no longer follows the name
        assert!(matches!(DirectoryHeader::decode(&buf), Err(FormatError::BadHeader(_))));
    }

    /// Tests that a file header's content link can be filled in after it's written.
    #[test]
    fn file_header_late_content_link() {
        let mut file = FileHeader::new("a.txt", FileFlags::empty(), RelOffset::NONE);
        assert_eq!(file.meta_offset(), 12);
        assert_eq!(file.len(), 18);

        let mut buf = [0xFF; BLOCK_SIZE];
        file.encode(&mut buf).unwrap();
        assert_eq!(&buf[16..18], &[0xFF, 0xFF]);

        file.content = RelOffset::between(3, 5).unwrap();
        file.encode(&mut buf).unwrap();
        let decoded = FileHeader::decode(&buf).unwrap();
        assert_eq!(decoded.content.resolve(3), Some(5));
        assert_eq!(decoded, file);

        buf[14] ^= 0x01; // flags are checked
        assert!(matches!(FileHeader::decode(&buf), Err(FormatError::Checksum { .. })));
    }

    /// Tests that content headers are only valid once finished.
    #[test]
    fn content_header_lifecycle() {
        let provisional = FileContentHeader::provisional(2);
        assert_eq!(provisional.data_offset, 16);
        assert_eq!(provisional.capacity(), 2 * BLOCK_SIZE - 16);
        assert!(provisional.validate().is_err());

        let mut buf = [0xFF; BLOCK_SIZE];
        provisional.encode(&mut buf).unwrap();
        assert_eq!(FileContentHeader::decode(&buf), Ok(provisional));

        let finished = provisional.finished(5);
        finished.encode(&mut buf).unwrap();
        let decoded = FileContentHeader::decode(&buf).unwrap();
        assert_eq!(decoded.len, 5);
        assert!(decoded.validate().is_ok());

        let oversized = FileContentHeader::provisional(1).finished(250);
        assert!(matches!(oversized.validate(), Err(FormatError::BadHeader(_))));
    }

    /// Tests signed-magnitude offsets in both directions and their limits.
    #[test]
    #[rustfmt::skip]
    fn rel_offsets() {
        assert_eq!( RelOffset::between(10, 14).unwrap().raw(),    4                  );
        assert_eq!( RelOffset::between(14, 10).unwrap().raw(),    0x8004             );
        assert_eq!( RelOffset::between(14, 10).unwrap().resolve(14), Some(10)        );
        assert_eq!( RelOffset::between(0, 0x7FFE).unwrap().resolve(0), Some(0x7FFE)  );
        assert_eq!( RelOffset::between(0x7FFF, 0),                None               );
        assert_eq!( RelOffset::NONE.resolve(3),                   None               );
        assert_eq!( RelOffset::from_raw(0x8005).resolve(3),       None               );
    }
}
