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
    libspfs/src/init.rs

    Finding, mounting and formatting filesystems.

    A [`Spfs`] owns the flash it lives on and is passed explicitly into every
    [`Directory`] and [`File`](crate::File) operation, handles only store the
    id of the filesystem they came from and the block they start at.
*/

use alloc::{vec, vec::Vec};
use core::sync::atomic::{AtomicU32, Ordering};
use log::{debug, info, warn};

use crate::{
    AllocError, BLOCK_SIZE, Directory, File, Flash, FlashError, MAX_BLOCKS, ProtocolError,
    SECTOR_SIZE, SpfsConfig, SpfsError, blocks_for, check_name,
    header::{
        BlockHeader, DirectoryHeader, FileFlags, FileHeader, FilesystemHeader, FilesystemMetadata,
        FormatError, FsVersion, RelOffset, magic,
    },
};

/// The id given to the next mounted filesystem.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a mounted filesystem, so handles can't be used with another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsId(u32);

impl FsId {
    #[cfg(target_has_atomic = "32")]
    fn next() -> Self {
        FsId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Cores like the Cortex-M0+ can only load & store atomically, which is
    /// enough as filesystems are only ever mounted from one thread there.
    #[cfg(not(target_has_atomic = "32"))]
    fn next() -> Self {
        let id = NEXT_ID.load(Ordering::Relaxed);
        NEXT_ID.store(id.wrapping_add(1), Ordering::Relaxed);
        FsId(id)
    }
}

/// A mounted filesystem.
#[derive(Debug)]
pub struct Spfs<F: Flash> {
    id: FsId,
    flash: F,

    /// The byte address of block 0 on the flash.
    address: u32,
    header: FilesystemHeader,
    metadata: FilesystemMetadata,

    /// Where the allocator resumes scanning, `None` until the first allocation.
    pub(crate) cursor: Option<u32>,
    config: SpfsConfig,
}

impl<F: Flash> Spfs<F> {
    /// Scans every sector in `start..end` for a filesystem, and mounts the first one found.
    pub fn search_filesystem(flash: F, start: u32, end: u32, config: SpfsConfig) -> Result<Self, SpfsError> {
        let end = end.min(flash.capacity());
        let Some(mut address) = start.checked_next_multiple_of(SECTOR_SIZE) else {
            return Err(FormatError::NotFound.into());
        };

        while address.saturating_add(FilesystemHeader::SIZE as u32) <= end {
            let mut found = [0; 4];
            flash.read(address, &mut found)?;
            if u32::from_le_bytes(found) == magic::FILESYSTEM {
                debug!("spfs: found filesystem magic at {address:#x}");
                return Self::open(flash, address, end, config);
            }
            address = match address.checked_add(SECTOR_SIZE) {
                Some(next) => next,
                None => break,
            };
        }

        Err(FormatError::NotFound.into())
    }

    /// Mounts the filesystem at `address`, formatting it if it was only stamped with a magic number.
    ///
    /// `limit` is the end of the flash the filesystem may occupy.
    pub fn open(flash: F, address: u32, limit: u32, config: SpfsConfig) -> Result<Self, SpfsError> {
        if address % SECTOR_SIZE != 0 {
            return Err(ProtocolError::Misaligned.into());
        }

        let limit = limit.min(flash.capacity());
        let mut raw = [0; FilesystemHeader::SIZE];
        flash.read(address, &mut raw)?;
        let header = FilesystemHeader::decode(&raw)?;
        header.check_identity(config.version)?;

        if header.is_unformatted() {
            let size = unformatted_size(&header, address, limit);
            warn!("spfs: filesystem at {address:#x} was never formatted, formatting {size} bytes");
            let (fs_name, root_name) = (config.fs_name.clone(), config.root_name.clone());
            return Self::create_with(flash, address, size, &fs_name, &root_name, config);
        }

        header.check_integrity()?;
        if address.checked_add(header.size).is_none_or(|end| end > limit) {
            return Err(ProtocolError::RegionTooLarge.into());
        }

        let mut block = [0; BLOCK_SIZE];
        flash.read(address, &mut block)?;
        let metadata = FilesystemMetadata::decode(&block, header.meta_offset as usize)?;

        let fs = Spfs {
            id: FsId::next(),
            flash,
            address,
            header,
            metadata,
            cursor: None,
            config,
        };

        // Make sure the root is reachable before handing the filesystem out
        let root = fs.metadata.root_block as u32;
        if root == 0 || root >= fs.block_count() {
            return Err(FormatError::BadHeader("root directory is outside of the filesystem").into());
        }
        fs.root().header(&fs)?;

        info!(
            "spfs: mounted '{}' (v{}) at {address:#x}, {} blocks",
            fs.metadata.name,
            fs.header.version,
            fs.block_count()
        );
        Ok(fs)
    }

    /// Erases the sectors `address..address + size` lie in, and writes a new filesystem of `size` bytes there.
    pub fn create_new_filesystem(
        flash: F,
        address: u32,
        size: u32,
        fs_name: &str,
        root_name: &str,
    ) -> Result<Self, SpfsError> {
        Self::create_with(flash, address, size, fs_name, root_name, SpfsConfig::new(fs_name, root_name))
    }

    fn create_with(
        mut flash: F,
        address: u32,
        size: u32,
        fs_name: &str,
        root_name: &str,
        config: SpfsConfig,
    ) -> Result<Self, SpfsError> {
        check_name(fs_name)?;
        check_name(root_name)?;
        let erase = check_region(&flash, address, size)?;
        flash.erase(address, erase)?;

        let mut fs = Spfs {
            id: FsId::next(),
            flash,
            address,
            header: FilesystemHeader::new(size),
            metadata: FilesystemMetadata::new(fs_name),
            cursor: None,
            config,
        };
        fs.write_filesystem(root_name)?;

        info!("spfs: created '{fs_name}' at {address:#x}, {} blocks", fs.block_count());
        Ok(fs)
    }

    /// Erases the whole filesystem and creates it again with the same size and names.
    ///
    /// Handles to the old filesystem are no longer accepted afterwards.
    pub fn format(&mut self) -> Result<Directory, SpfsError> {
        let size = self.header.size;
        let root_name = self.root().name(self)?;
        let erase = sector_span(size).ok_or(ProtocolError::RegionTooLarge)?;
        info!("spfs: formatting '{}' ({size} bytes)", self.metadata.name);
        self.flash.erase(self.address, erase)?;

        self.id = FsId::next();
        self.header = FilesystemHeader::new(size);
        self.metadata = FilesystemMetadata::new(&self.metadata.name);
        self.cursor = None;
        self.write_filesystem(&root_name)?;
        Ok(self.root())
    }

    /// Writes block 0, then creates the root directory and links it into the metadata.
    fn write_filesystem(&mut self, root_name: &str) -> Result<(), SpfsError> {
        let mut block = [0xFF; BLOCK_SIZE];
        self.header.encode(&mut block)?;
        self.metadata.encode(&mut block, self.header.meta_offset as usize)?;
        self.write_block(0, &block)?;

        // Keep trying further along if something was already written where the root should go
        let root = loop {
            let candidate = self
                .find_free_space(DirectoryHeader::BLOCKS as usize * BLOCK_SIZE)?
                .ok_or(AllocError::NoSpace)?;

            match self.write_header(candidate, |buf| DirectoryHeader::new(root_name).encode(buf)) {
                Ok(()) => break candidate,
                Err(SpfsError::Flash(FlashError::VerifyFailed { address })) => {
                    warn!("spfs: block {candidate} isn't usable for the root ({address:#x}), trying the next one");
                }
                Err(e) => return Err(e),
            }
        };

        self.metadata.root_block = root as u16;
        self.metadata.encode(&mut block, self.header.meta_offset as usize)?;
        self.write_block(0, &block)?;
        debug!("spfs: root directory '{root_name}' is at block {root}");
        Ok(())
    }

    /// Returns the filesystem's root directory.
    pub fn root(&self) -> Directory {
        Directory::at(self.id, self.metadata.root_block as u32)
    }

    pub fn id(&self) -> FsId {
        self.id
    }

    /// Returns the filesystem's display name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> FsVersion {
        self.header.version
    }

    /// Returns the size of the filesystem in bytes.
    pub fn size(&self) -> u32 {
        self.header.size
    }

    /// Returns the byte address of the filesystem on the flash.
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn block_count(&self) -> u32 {
        self.header.size / BLOCK_SIZE as u32
    }

    pub fn config(&self) -> &SpfsConfig {
        &self.config
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Unmounts the filesystem, giving back the flash.
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Checks that a handle came from this filesystem.
    pub(crate) fn check(&self, id: FsId) -> Result<(), ProtocolError> {
        match id == self.id {
            true => Ok(()),
            false => Err(ProtocolError::ForeignHandle),
        }
    }

    /// Returns the flash address of `block`, if it lies within the filesystem.
    fn block_address(&self, block: u32, blocks: u32) -> Result<u32, SpfsError> {
        match block.checked_add(blocks) {
            Some(end) if end <= self.block_count() => Ok(self.address + block * BLOCK_SIZE as u32),
            _ => Err(FormatError::BadHeader("region runs outside of the filesystem").into()),
        }
    }

    /// Reads the [`BlockHeader`] prefix of `block`.
    pub(crate) fn read_prefix(&self, block: u32) -> Result<[u8; BlockHeader::SIZE], SpfsError> {
        let mut prefix = [0; BlockHeader::SIZE];
        self.flash.read(self.block_address(block, 1)?, &mut prefix)?;
        Ok(prefix)
    }

    pub(crate) fn read_block(&self, block: u32) -> Result<[u8; BLOCK_SIZE], SpfsError> {
        let mut buf = [0; BLOCK_SIZE];
        self.flash.read(self.block_address(block, 1)?, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn read_blocks(&self, block: u32, blocks: u32) -> Result<Vec<u8>, SpfsError> {
        let mut buf = vec![0; blocks as usize * BLOCK_SIZE];
        self.flash.read(self.block_address(block, blocks)?, &mut buf)?;
        Ok(buf)
    }

    /// Reads a whole region, using the length stored in its header.
    pub(crate) fn read_region(&self, block: u32) -> Result<Vec<u8>, SpfsError> {
        let header = BlockHeader::from_raw(self.read_prefix(block)?);
        self.read_blocks(block, (header.blocks as u32).max(1))
    }

    /// Reads bytes from `offset` bytes into `block`.
    pub(crate) fn read_at(&self, block: u32, offset: usize, buf: &mut [u8]) -> Result<(), SpfsError> {
        let blocks = blocks_for(offset + buf.len()).max(1) as u32;
        let address = self.block_address(block, blocks)? + offset as u32;
        self.flash.read(address, buf)?;
        Ok(())
    }

    /// Returns `len` bytes from `offset` bytes into `block`, if the flash is memory mapped.
    pub(crate) fn mapped_at(&self, block: u32, offset: usize, len: usize) -> Option<&[u8]> {
        let blocks = blocks_for(offset + len).max(1) as u32;
        let start = self.block_address(block, blocks).ok()? as usize + offset;
        self.flash.mapped()?.get(start..start + len)
    }

    /// Programs whole blocks starting at `block`, then reads them back to make sure they stuck.
    pub(crate) fn write_blocks(&mut self, block: u32, data: &[u8]) -> Result<(), SpfsError> {
        let address = self.block_address(block, blocks_for(data.len()) as u32)?;
        self.flash.write(address, data)?;

        let mut check = vec![0; data.len()];
        self.flash.read(address, &mut check)?;
        if let Some(bad) = check.iter().zip(data).position(|(a, b)| a != b) {
            return Err(FlashError::VerifyFailed { address: address + bad as u32 }.into());
        }
        Ok(())
    }

    pub(crate) fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) -> Result<(), SpfsError> {
        self.write_blocks(block, data)
    }

    /// Encodes a one block header into an erased buffer and writes it to `block`.
    fn write_header(
        &mut self,
        block: u32,
        encode: impl FnOnce(&mut [u8]) -> Result<(), libutil::CodecError>,
    ) -> Result<(), SpfsError> {
        let mut buf = [0xFF; BLOCK_SIZE];
        encode(&mut buf[..])?;
        self.write_block(block, &buf)
    }

    /// Allocates and writes a new directory header, which the caller must link into a directory.
    pub fn create_directory(&mut self, name: &str) -> Result<Directory, SpfsError> {
        check_name(name)?;
        let block = self
            .find_free_space(DirectoryHeader::BLOCKS as usize * BLOCK_SIZE)?
            .ok_or(AllocError::NoSpace)?;

        self.write_header(block, |buf| DirectoryHeader::new(name).encode(buf))?;
        debug!("spfs: created directory '{name}' at block {block}");
        Ok(Directory::at(self.id, block))
    }

    /// Allocates and writes a new, empty file header, which the caller must link into a directory.
    pub fn create_file(&mut self, name: &str) -> Result<File, SpfsError> {
        check_name(name)?;
        let block = self
            .find_free_space(FileHeader::BLOCKS as usize * BLOCK_SIZE)?
            .ok_or(AllocError::NoSpace)?;

        self.write_header(block, |buf| {
            FileHeader::new(name, FileFlags::empty(), RelOffset::NONE).encode(buf)
        })?;
        debug!("spfs: created file '{name}' at block {block}");
        Ok(File::at(self.id, block))
    }

    /// Allocates a file header sharing the content chain starting at `content_block`.
    pub(crate) fn create_linked_file(&mut self, name: &str, content_block: u32) -> Result<File, SpfsError> {
        check_name(name)?;
        let block = self
            .find_free_space(FileHeader::BLOCKS as usize * BLOCK_SIZE)?
            .ok_or(AllocError::NoSpace)?;
        let content = RelOffset::between(block, content_block)
            .ok_or(FormatError::BadHeader("content is out of reach of the new header"))?;

        self.write_header(block, |buf| FileHeader::new(name, FileFlags::HARDLINK, content).encode(buf))?;
        debug!("spfs: created hardlink '{name}' at block {block} to content at block {content_block}");
        Ok(File::at(self.id, block))
    }
}

/// Returns the number of bytes in the sectors `size` bytes take up.
fn sector_span(size: u32) -> Option<u32> {
    size.checked_next_multiple_of(SECTOR_SIZE)
}

/// Checks that a new filesystem can be placed at `address`, returning how many bytes need erasing.
fn check_region(flash: &impl Flash, address: u32, size: u32) -> Result<u32, ProtocolError> {
    if address % SECTOR_SIZE != 0 || size % BLOCK_SIZE as u32 != 0 {
        return Err(ProtocolError::Misaligned);
    }

    let blocks = size / BLOCK_SIZE as u32;
    if blocks < 2 {
        return Err(ProtocolError::RegionTooSmall);
    }

    // Whole sectors are erased, so the last one must be on the flash too
    let erase = sector_span(size).ok_or(ProtocolError::RegionTooLarge)?;
    if blocks > MAX_BLOCKS || address.checked_add(erase).is_none_or(|end| end > flash.capacity()) {
        return Err(ProtocolError::RegionTooLarge);
    }

    Ok(erase)
}

/// Returns the size an unformatted filesystem should be given, using the
/// stamped size if it's plausible and otherwise everything up to `limit`.
fn unformatted_size(header: &FilesystemHeader, address: u32, limit: u32) -> u32 {
    let available = limit.saturating_sub(address);
    let available = available - available % SECTOR_SIZE;
    let plausible = header.size % BLOCK_SIZE as u32 == 0
        && header.size >= 2 * BLOCK_SIZE as u32
        && header.size <= available;

    let size = if plausible { header.size } else { available };
    let size = size.min(MAX_BLOCKS * BLOCK_SIZE as u32);
    size - size % BLOCK_SIZE as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RamFlash;

    /// Flash with a stuck bit in block 1, so nothing written there reads back the same.
    struct StuckBitFlash(RamFlash);

    impl StuckBitFlash {
        const STUCK: u32 = BLOCK_SIZE as u32 + 100;
    }

    impl Flash for StuckBitFlash {
        fn capacity(&self) -> u32 {
            self.0.capacity()
        }

        fn read(&self, address: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
            self.0.read(address, buf)
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, FlashError> {
            let mut data = data.to_vec();
            if let Some(byte) = Self::STUCK.checked_sub(address).and_then(|idx| data.get_mut(idx as usize)) {
                *byte &= 0xFE;
            }
            self.0.write(address, &data)
        }

        fn erase(&mut self, address: u32, size: u32) -> Result<(), FlashError> {
            self.0.erase(address, size)
        }
    }

    /// Tests that a new filesystem puts its root directly after the header block.
    #[test]
    fn create_places_root_in_block_one() {
        let fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        assert_eq!(fs.root().block(), 1);
        assert_eq!(fs.name(), "TestFS");
        assert_eq!(fs.block_count(), 32);
        assert_eq!(fs.root().name(&fs).unwrap(), "root");
    }

    /// Tests that the root directory moves on from a block which doesn't keep what's written to it.
    #[test]
    fn create_skips_bad_blocks() {
        let fs = Spfs::create_new_filesystem(StuckBitFlash(RamFlash::new(8192)), 0, 8192, "TestFS", "root").unwrap();
        assert_eq!(fs.root().block(), 2);
        assert_eq!(fs.root().name(&fs).unwrap(), "root");
    }

    /// Tests that creating a filesystem over an old one erases it first.
    #[test]
    fn create_over_used_region() {
        let mut flash = RamFlash::new(16384);
        {
            let mut fs = Spfs::create_new_filesystem(&mut flash, 0, 8192, "OldFS", "old_root").unwrap();
            let mut file = fs.root().create_file(&mut fs, "a.txt").unwrap();
            file.write(&mut fs, b"old content").unwrap();
        }
        flash.write(8192, &[0; BLOCK_SIZE]).unwrap(); // outside of the new filesystem

        let fs = Spfs::create_new_filesystem(&mut flash, 0, 4608, "NewFS", "new_root").unwrap();
        assert_eq!(fs.root().block(), 1);
        assert_eq!(fs.root().name(&fs).unwrap(), "new_root");
        assert_eq!(fs.root().list_files(&fs).unwrap().len(), 0);
        drop(fs);

        // the new filesystem's last sector is erased whole, anything after it is left alone
        let mut rest = [0; BLOCK_SIZE];
        flash.read(4608, &mut rest).unwrap();
        assert_eq!(rest, [0xFF; BLOCK_SIZE]);
        flash.read(8192, &mut rest).unwrap();
        assert_eq!(rest, [0; BLOCK_SIZE]);
    }

    /// Tests that every mounted filesystem gets it's own id.
    #[test]
    fn ids_are_unique() {
        let a = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "A", "root").unwrap();
        let b = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "B", "root").unwrap();
        let c = Spfs::open(a.into_flash(), 0, 8192, SpfsConfig::default()).unwrap();
        assert_ne!(b.id(), c.id());
        assert_ne!(b.root(), c.root());
    }

    /// Tests the checks made on a new filesystem's region and names.
    #[test]
    #[rustfmt::skip]
    fn create_rejections() {
        let create = |address, size, name: &str| {
            Spfs::create_new_filesystem(RamFlash::new(16384), address, size, name, "root").map(|_| ())
        };
        let long = "x".repeat(200);
        assert_eq!( create(0, 256, "fs"),       Err(ProtocolError::RegionTooSmall.into())  );
        assert_eq!( create(0, 300, "fs"),       Err(ProtocolError::Misaligned.into())      );
        assert_eq!( create(256, 8192, "fs"),    Err(ProtocolError::Misaligned.into())      );
        assert_eq!( create(8192, 16384, "fs"),  Err(ProtocolError::RegionTooLarge.into())  );
        assert_eq!( create(0, 0xFFFF_FF00, "fs"), Err(ProtocolError::RegionTooLarge.into()) );
        assert_eq!( create(0, 8192, &long),     Err(ProtocolError::NameTooLong(200).into()) );
        assert_eq!( create(0, 8192, ""),        Err(ProtocolError::EmptyName.into())       );
        assert_eq!( create(4096, 512, "fs"),    Ok(())                                     );
    }

    /// Tests that search finds a filesystem which doesn't start at the beginning of the flash.
    #[test]
    fn search_finds_later_sector() {
        let fs = Spfs::create_new_filesystem(RamFlash::new(32768), 12288, 8192, "Later", "root").unwrap();
        let flash = fs.into_flash();

        let fs = Spfs::search_filesystem(flash, 0, 32768, SpfsConfig::default()).unwrap();
        assert_eq!(fs.address(), 12288);
        assert_eq!(fs.name(), "Later");

        let empty = Spfs::search_filesystem(RamFlash::new(8192), 0, 8192, SpfsConfig::default());
        assert_eq!(empty.err(), Some(FormatError::NotFound.into()));
    }

    /// Tests that searching near the end of the address space finds nothing instead of overflowing.
    #[test]
    fn search_at_end_of_address_space() {
        let search = |start| Spfs::search_filesystem(RamFlash::new(8192), start, u32::MAX, SpfsConfig::default()).err();
        assert_eq!(search(u32::MAX - 10), Some(FormatError::NotFound.into()));
        assert_eq!(search(u32::MAX), Some(FormatError::NotFound.into()));
        assert_eq!(search(4097), Some(FormatError::NotFound.into()));
    }

    /// Tests that a region stamped with only a magic number is formatted with the configured names.
    #[test]
    fn stamped_region_is_auto_formatted() {
        let mut flash = RamFlash::new(16384);
        let mut stamp = [0xFF; BLOCK_SIZE];
        stamp[..4].copy_from_slice(&magic::FILESYSTEM.to_le_bytes());
        stamp[4..8].copy_from_slice(&FsVersion::CURRENT.raw().to_le_bytes());
        stamp[8..12].copy_from_slice(&8192u32.to_le_bytes());
        stamp[200] = 0x00; // junk which must be erased
        flash.write(0, &stamp).unwrap();

        let config = SpfsConfig::new("Seeded", "top");
        let fs = Spfs::search_filesystem(flash, 0, 16384, config).unwrap();
        assert_eq!(fs.size(), 8192);
        assert_eq!(fs.name(), "Seeded");
        assert_eq!(fs.root().name(&fs).unwrap(), "top");
    }

    /// Tests that a stamped region ending part way through a sector is formatted in whole sectors.
    #[test]
    fn stamped_region_with_unaligned_end() {
        let mut flash = RamFlash::new(16384);
        let mut stamp = [0xFF; BLOCK_SIZE];
        stamp[..4].copy_from_slice(&magic::FILESYSTEM.to_le_bytes());
        stamp[4..8].copy_from_slice(&FsVersion::CURRENT.raw().to_le_bytes());
        flash.write(0, &stamp).unwrap();

        // no plausible size was stamped, so everything up to the search end is used
        let fs = Spfs::search_filesystem(flash, 0, 10000, SpfsConfig::default()).unwrap();
        assert_eq!(fs.size(), 8192);
        assert_eq!(fs.root().block(), 1);
    }

    /// Tests that a filesystem from a newer minor version is refused.
    #[test]
    fn newer_version_is_refused() {
        let fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        let flash = fs.into_flash();

        let config = SpfsConfig {
            version: FsVersion::new(1, 1, 0, 0),
            ..SpfsConfig::default()
        };
        let err = Spfs::open(flash, 0, 8192, config).err();
        assert_eq!(err, Some(FormatError::UnsupportedVersion(FsVersion::CURRENT).into()));
    }

    /// Tests that formatting erases everything and invalidates old handles.
    #[test]
    fn format_invalidates_handles() {
        let mut fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        let old_root = fs.root();
        old_root.create_directory(&mut fs, "data").unwrap();

        let root = fs.format().unwrap();
        assert_eq!(root.list_directories(&fs).unwrap().len(), 0);
        assert_eq!(old_root.name(&fs), Err(ProtocolError::ForeignHandle.into()));
        assert_eq!(fs.name(), "TestFS");
    }

    /// Tests that written blocks are verified against what's on the flash.
    #[test]
    fn write_verification() {
        let mut fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        let mut block = [0xFF; BLOCK_SIZE];
        block[3] = 0x0F;
        fs.write_block(5, &block).unwrap();

        block[3] = 0xF0;
        assert_eq!(
            fs.write_block(5, &block),
            Err(FlashError::VerifyFailed { address: 5 * BLOCK_SIZE as u32 + 3 }.into())
        );
        assert!(fs.read_blocks(31, 2).is_err());
    }
}
