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
    libspfs/src/file.rs

    Files and their versioned content.

    Every write creates a new content region which is chained after the
    previous one, so older versions stay readable. Since a field can only be
    written once, the chain runs from the first version to the newest:
    - File header `content` -> version 1 `next_version` -> version 2 ... -> newest

    Writing goes through three steps so content can be streamed in without
    knowing it's final length:
    1. [`File::allocate_content_size`] reserves a region and writes a provisional header
    2. [`File::append`] copies data in, as many times as needed
    3. [`File::finish_content`] stores the length & checksum and links the region into the chain
*/

use alloc::{string::String, vec, vec::Vec};
use log::debug;

use crate::{
    AllocError, BLOCK_SIZE, Flash, FsId, MAX_CONTENT, ProtocolError, Spfs, SpfsError, blocks_for,
    header::{ERASED_U16, FileContentHeader, FileFlags, FileHeader, FormatError, RelOffset},
};

/// A handle to a file on a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    fs: FsId,
    block: u32,

    /// The content region being written, if any.
    pending: Option<PendingContent>,
}

/// A content region which has been reserved but not linked in yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingContent {
    block: u32,
    blocks: u16,

    /// The number of bytes appended so far.
    written: usize,
}

/// One finished version of a file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyFile {
    fs: FsId,
    file_block: u32,
    content_block: u32,

    /// How many versions older than the newest one this is.
    version: usize,
    len: usize,
    data_offset: usize,

    /// The length of the content region, in blocks.
    blocks: u16,
}

impl File {
    pub(crate) const fn at(fs: FsId, block: u32) -> Self {
        File { fs, block, pending: None }
    }

    pub(crate) fn fs(&self) -> FsId {
        self.fs
    }

    /// Returns the block the file's header is at.
    pub fn block(&self) -> u32 {
        self.block
    }

    /// Reads and validates the file's header.
    pub fn header<F: Flash>(&self, fs: &Spfs<F>) -> Result<FileHeader, SpfsError> {
        fs.check(self.fs)?;
        Ok(FileHeader::decode(&fs.read_region(self.block)?)?)
    }

    pub fn name<F: Flash>(&self, fs: &Spfs<F>) -> Result<String, SpfsError> {
        Ok(self.header(fs)?.name)
    }

    /// Returns if the file shares it's content with another file header.
    pub fn is_hardlink<F: Flash>(&self, fs: &Spfs<F>) -> Result<bool, SpfsError> {
        Ok(self.header(fs)?.flags.contains(FileFlags::HARDLINK))
    }

    /// Returns if content has been allocated but not finished yet.
    pub fn is_writing(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns every version's block & header, oldest first.
    pub fn content_chain<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<(u32, FileContentHeader)>, SpfsError> {
        let header = self.header(fs)?;
        let mut chain = Vec::new();
        let mut next = header.content.resolve(self.block);

        while let Some(block) = next {
            if chain.len() as u32 >= fs.block_count() {
                return Err(FormatError::BadHeader("content chain loops back on itself").into());
            }

            let content = FileContentHeader::decode(&fs.read_block(block)?)?;
            content.validate()?;
            fs.read_blocks(block, content.blocks as u32)?; // must lie within the filesystem
            chain.push((block, content));
            next = content.next_version.resolve(block);
        }

        Ok(chain)
    }

    /// Returns the number of versions the file has.
    pub fn version_count<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.content_chain(fs)?.len())
    }

    /// Returns the number of versions before the newest one.
    pub fn version<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.version_count(fs)?.saturating_sub(1))
    }

    /// Opens the `n`th newest version, with 0 being the newest.
    pub fn open_version<F: Flash>(&self, fs: &Spfs<F>, n: usize) -> Result<ReadOnlyFile, SpfsError> {
        let chain = self.content_chain(fs)?;
        let count = chain.len();
        let Some(idx) = count.checked_sub(n + 1) else {
            return Err(ProtocolError::NoSuchVersion { requested: n, count }.into());
        };

        let (block, content) = chain[idx];
        Ok(ReadOnlyFile {
            fs: self.fs,
            file_block: self.block,
            content_block: block,
            version: n,
            len: content.len as usize,
            data_offset: content.data_offset as usize,
            blocks: content.blocks,
        })
    }

    /// Opens the newest version, if the file has any content.
    pub fn current<F: Flash>(&self, fs: &Spfs<F>) -> Result<Option<ReadOnlyFile>, SpfsError> {
        match self.open_version(fs, 0) {
            Ok(file) => Ok(Some(file)),
            Err(SpfsError::Protocol(ProtocolError::NoSuchVersion { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the length of the newest version in bytes.
    pub fn size<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.current(fs)?.map_or(0, |c| c.size()))
    }

    /// Returns the number of bytes taken up by the header and every version.
    pub fn size_on_disk<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        let header = self.header(fs)?.blocks as usize;
        let content: usize = self.content_chain(fs)?.iter().map(|(_, c)| c.blocks as usize).sum();
        Ok((header + content) * BLOCK_SIZE)
    }

    /// Reads the newest version, which is empty if the file has no content.
    pub fn read_as_vec<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<u8>, SpfsError> {
        match self.current(fs)? {
            Some(current) => current.read_as_vec(fs),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_as_string<F: Flash>(&self, fs: &Spfs<F>) -> Result<String, SpfsError> {
        String::from_utf8(self.read_as_vec(fs)?).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Reads up to `size` bytes of the newest version, starting at `offset`.
    pub fn read_bytes<F: Flash>(&self, fs: &Spfs<F>, offset: usize, size: usize) -> Result<Vec<u8>, SpfsError> {
        match self.current(fs)? {
            Some(current) => current.read_bytes(fs, offset, size),
            None if offset == 0 => Ok(Vec::new()),
            None => Err(ProtocolError::OffsetOutOfRange { offset, len: 0 }.into()),
        }
    }

    /// Returns the newest version straight from the flash, if it's memory mapped.
    pub fn memory_mapped<'a, F: Flash>(&self, fs: &'a Spfs<F>) -> Result<Option<&'a [u8]>, SpfsError> {
        Ok(self.current(fs)?.and_then(|current| current.memory_mapped(fs)))
    }

    /// Replaces the file's content with `data`, keeping the old content as an older version.
    pub fn write<F: Flash>(&mut self, fs: &mut Spfs<F>, data: &[u8]) -> Result<(), SpfsError> {
        self.allocate_content_size(fs, data.len())?;

        let res = self.append(fs, data).and_then(|_| self.finish_content(fs));
        if res.is_err() {
            // the reserved region is left orphaned
            self.pending = None;
        }
        res
    }

    /// Reserves a region for `size` bytes of new content.
    pub fn allocate_content_size<F: Flash>(&mut self, fs: &mut Spfs<F>, size: usize) -> Result<(), SpfsError> {
        fs.check(self.fs)?;
        if self.pending.is_some() {
            return Err(ProtocolError::AlreadyAllocated.into());
        }
        if size > MAX_CONTENT {
            return Err(ProtocolError::ContentTooLarge(size).into());
        }
        self.header(fs)?;

        let bytes = FileContentHeader::DATA_OFFSET as usize + size;
        let blocks = blocks_for(bytes) as u16;
        let block = fs.find_free_space(bytes)?.ok_or(AllocError::NoSpace)?;

        let mut buf = [0xFF; BLOCK_SIZE];
        FileContentHeader::provisional(blocks).encode(&mut buf)?;
        fs.write_block(block, &buf)?;

        debug!("spfs: reserved {blocks} content blocks at block {block} for file at block {}", self.block);
        self.pending = Some(PendingContent { block, blocks, written: 0 });
        Ok(())
    }

    /// Copies `data` after whatever has already been appended.
    pub fn append<F: Flash>(&mut self, fs: &mut Spfs<F>, data: &[u8]) -> Result<(), SpfsError> {
        fs.check(self.fs)?;
        let Some(mut pending) = self.pending else {
            return Err(ProtocolError::NotAllocated.into());
        };

        let capacity = FileContentHeader::provisional(pending.blocks).capacity().min(MAX_CONTENT);
        let remaining = capacity - pending.written;
        if data.len() > remaining {
            return Err(ProtocolError::Overflow { len: data.len(), capacity: remaining }.into());
        }

        // Partial blocks must keep the bytes around them, so each block is read, patched & written back
        let mut pos = FileContentHeader::DATA_OFFSET as usize + pending.written;
        let mut rest = data;
        while !rest.is_empty() {
            let block = pending.block + (pos / BLOCK_SIZE) as u32;
            let start = pos % BLOCK_SIZE;
            let len = rest.len().min(BLOCK_SIZE - start);

            let mut buf = fs.read_block(block)?;
            buf[start..start + len].copy_from_slice(&rest[..len]);
            fs.write_block(block, &buf)?;

            pos += len;
            rest = &rest[len..];
        }

        pending.written += data.len();
        self.pending = Some(pending);
        Ok(())
    }

    /// Finishes the content being written and makes it the newest version.
    pub fn finish_content<F: Flash>(&mut self, fs: &mut Spfs<F>) -> Result<(), SpfsError> {
        fs.check(self.fs)?;
        let Some(pending) = self.pending else {
            return Err(ProtocolError::NotAllocated.into());
        };

        // A clone of this handle may have finished the same region already
        let mut buf = fs.read_block(pending.block)?;
        let chain = self.content_chain(fs)?;
        let reserved = FileContentHeader::decode(&buf)?;
        if reserved.len != ERASED_U16 || chain.iter().any(|&(block, _)| block == pending.block) {
            self.pending = None;
            return Err(ProtocolError::NotAllocated.into());
        }

        let header = FileContentHeader::provisional(pending.blocks).finished(pending.written as u16);
        header.encode(&mut buf)?;
        fs.write_block(pending.block, &buf)?;

        match chain.last() {
            Some(&(tail, mut previous)) => {
                previous.next_version = relative(tail, pending.block)?;
                let mut buf = fs.read_block(tail)?;
                previous.encode(&mut buf)?;
                fs.write_block(tail, &buf)?;
            }
            None => {
                let mut file = self.header(fs)?;
                file.content = relative(self.block, pending.block)?;
                let mut buf = fs.read_region(self.block)?;
                file.encode(&mut buf)?;
                fs.write_blocks(self.block, &buf)?;
            }
        }

        debug!(
            "spfs: finished version {} of file at block {} ({} bytes)",
            chain.len(),
            self.block,
            pending.written
        );
        self.pending = None;
        Ok(())
    }
}

/// Returns the offset leading from block `from` to block `to`.
fn relative(from: u32, to: u32) -> Result<RelOffset, FormatError> {
    RelOffset::between(from, to).ok_or(FormatError::BadHeader("content is out of reach"))
}

impl ReadOnlyFile {
    /// Returns how many versions older than the newest this is.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Returns the length of the content in bytes.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Returns the block of the file header this version was opened through.
    pub fn file_block(&self) -> u32 {
        self.file_block
    }

    /// Returns the block of the content region.
    pub fn block(&self) -> u32 {
        self.content_block
    }

    /// Returns the name of the file header this version was opened through.
    pub fn name<F: Flash>(&self, fs: &Spfs<F>) -> Result<String, SpfsError> {
        File::at(self.fs, self.file_block).name(fs)
    }

    /// Returns the number of bytes this version's region takes up.
    pub fn size_on_disk(&self) -> usize {
        self.blocks as usize * BLOCK_SIZE
    }

    pub fn read_as_vec<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<u8>, SpfsError> {
        self.read_bytes(fs, 0, self.len)
    }

    pub fn read_as_string<F: Flash>(&self, fs: &Spfs<F>) -> Result<String, SpfsError> {
        String::from_utf8(self.read_as_vec(fs)?).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Reads up to `size` bytes starting at `offset`, stopping at the end of the content.
    pub fn read_bytes<F: Flash>(&self, fs: &Spfs<F>, offset: usize, size: usize) -> Result<Vec<u8>, SpfsError> {
        fs.check(self.fs)?;
        if offset > self.len {
            return Err(ProtocolError::OffsetOutOfRange { offset, len: self.len }.into());
        }

        let len = size.min(self.len - offset);
        let start = self.data_offset + offset;
        if let Some(mapped) = fs.mapped_at(self.content_block, start, len) {
            return Ok(mapped.to_vec());
        }

        let mut buf = vec![0; len];
        fs.read_at(self.content_block, start, &mut buf)?;
        Ok(buf)
    }

    /// Returns the content straight from the flash, if it's memory mapped.
    pub fn memory_mapped<'a, F: Flash>(&self, fs: &'a Spfs<F>) -> Option<&'a [u8]> {
        fs.check(self.fs).ok()?;
        fs.mapped_at(self.content_block, self.data_offset, self.len)
    }
}
