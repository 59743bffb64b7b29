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
    libspfs/src/dir.rs

    Directories and their tables of entries.

    An entry is a tag and a block offset relative to the directory. Entries are
    only ever appended, removing one clears bits in it's tag so the slot stays
    taken until the filesystem is formatted.
*/

use alloc::{string::String, vec, vec::Vec};
use log::{debug, warn};

use crate::{
    AllocError, BLOCK_SIZE, File, Flash, FsId, ProtocolError, Spfs, SpfsError, check_name,
    header::{ContentEntry, DELETED_MASK, DirectoryHeader, EntryKind, FormatError, magic},
};

/// A handle to a directory on a mounted filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    fs: FsId,
    block: u32,
}

impl Directory {
    pub(crate) const fn at(fs: FsId, block: u32) -> Self {
        Directory { fs, block }
    }

    /// Returns the block the directory's header starts at.
    pub fn block(&self) -> u32 {
        self.block
    }

    /// Reads and validates the directory's header.
    pub fn header<F: Flash>(&self, fs: &Spfs<F>) -> Result<DirectoryHeader, SpfsError> {
        fs.check(self.fs)?;
        Ok(DirectoryHeader::decode(&fs.read_region(self.block)?)?)
    }

    pub fn name<F: Flash>(&self, fs: &Spfs<F>) -> Result<String, SpfsError> {
        Ok(self.header(fs)?.name)
    }

    /// Returns the number of entries the directory can ever hold, including removed ones.
    pub fn capacity<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.header(fs)?.capacity())
    }

    /// Returns the number of files & subdirectories in the directory.
    pub fn entry_count<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.header(fs)?.live_entries().count())
    }

    /// Returns the number of bytes the directory's header takes up.
    pub fn size_on_disk<F: Flash>(&self, fs: &Spfs<F>) -> Result<usize, SpfsError> {
        Ok(self.header(fs)?.blocks as usize * BLOCK_SIZE)
    }

    /// Returns the names and handles of every readable subdirectory.
    pub fn list_directories<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<(String, Directory)>, SpfsError> {
        let mut dirs = Vec::new();
        for block in self.targets(fs, EntryKind::Directory)? {
            let dir = Directory::at(self.fs, block);
            match dir.header(fs) {
                Ok(header) => dirs.push((header.name, dir)),
                Err(e) => warn!("spfs: skipping subdirectory at block {block}: {e}"),
            }
        }
        Ok(dirs)
    }

    /// Returns the names and handles of every readable file.
    pub fn list_files<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<(String, File)>, SpfsError> {
        let mut files = Vec::new();
        for block in self.targets(fs, EntryKind::File)? {
            let file = File::at(self.fs, block);
            match file.header(fs) {
                Ok(header) => files.push((header.name, file)),
                Err(e) => warn!("spfs: skipping file at block {block}: {e}"),
            }
        }
        Ok(files)
    }

    pub fn subdirectories<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<Directory>, SpfsError> {
        Ok(self.list_directories(fs)?.into_iter().map(|(_, dir)| dir).collect())
    }

    pub fn files<F: Flash>(&self, fs: &Spfs<F>) -> Result<Vec<File>, SpfsError> {
        Ok(self.list_files(fs)?.into_iter().map(|(_, file)| file).collect())
    }

    /// Returns the blocks referenced by live entries of `kind`.
    fn targets<F: Flash>(&self, fs: &Spfs<F>, kind: EntryKind) -> Result<Vec<u32>, SpfsError> {
        let header = self.header(fs)?;
        let mut blocks = Vec::new();
        for entry in header.live_entries().filter(|e| e.kind() == kind) {
            match entry.target(self.block) {
                Some(block) if block > 0 && block < fs.block_count() => blocks.push(block),
                _ => warn!("spfs: '{}' has an entry pointing outside of the filesystem", header.name),
            }
        }
        Ok(blocks)
    }

    pub fn open_subdirectory<F: Flash>(&self, fs: &Spfs<F>, name: &str) -> Result<Option<Directory>, SpfsError> {
        Ok(self.list_directories(fs)?.into_iter().find(|(n, _)| n == name).map(|(_, dir)| dir))
    }

    pub fn open_file<F: Flash>(&self, fs: &Spfs<F>, name: &str) -> Result<Option<File>, SpfsError> {
        Ok(self.list_files(fs)?.into_iter().find(|(n, _)| n == name).map(|(_, file)| file))
    }

    /// Returns if a file or subdirectory called `name` exists.
    pub fn contains<F: Flash>(&self, fs: &Spfs<F>, name: &str) -> Result<bool, SpfsError> {
        Ok(self.open_subdirectory(fs, name)?.is_some() || self.open_file(fs, name)?.is_some())
    }

    /// Follows `path` down from this directory, returning every directory passed through,
    /// this one first, or `None` if part of it doesn't exist.
    ///
    /// Components are separated by `/`, with `..` stepping back along the path taken so far.
    pub fn walk<F: Flash>(&self, fs: &Spfs<F>, path: &str) -> Result<Option<Vec<Directory>>, SpfsError> {
        let mut trail = vec![*self];
        for name in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            if name == ".." {
                if trail.len() > 1 {
                    trail.pop();
                }
                continue;
            }

            let current = trail[trail.len() - 1];
            match current.open_subdirectory(fs, name)? {
                Some(dir) => trail.push(dir),
                None => return Ok(None),
            }
        }
        Ok(Some(trail))
    }

    /// Joins the names of the directories in `trail` into the last one's full path, e.g. `root/data/logs`.
    ///
    /// Directories don't know their parents, so `trail` is the way taken from the root,
    /// as returned by [`Directory::walk`].
    pub fn full_path<F: Flash>(fs: &Spfs<F>, trail: &[Directory]) -> Result<String, SpfsError> {
        let mut path = String::new();
        for dir in trail {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&dir.name(fs)?);
        }
        Ok(path)
    }

    /// Creates a new subdirectory.
    pub fn create_directory<F: Flash>(&self, fs: &mut Spfs<F>, name: &str) -> Result<Directory, SpfsError> {
        self.check_new_entry(fs, name)?;
        let dir = fs.create_directory(name)?;
        self.add_content(fs, magic::SUBDIR_ENTRY, dir.block)?;
        Ok(dir)
    }

    /// Creates a new, empty file.
    pub fn create_file<F: Flash>(&self, fs: &mut Spfs<F>, name: &str) -> Result<File, SpfsError> {
        self.check_new_entry(fs, name)?;
        let file = fs.create_file(name)?;
        self.add_content(fs, magic::FILE_ENTRY, file.block())?;
        Ok(file)
    }

    pub fn open_or_create_directory<F: Flash>(&self, fs: &mut Spfs<F>, name: &str) -> Result<Directory, SpfsError> {
        match self.open_subdirectory(fs, name)? {
            Some(dir) => Ok(dir),
            None => self.create_directory(fs, name),
        }
    }

    pub fn open_or_create_file<F: Flash>(&self, fs: &mut Spfs<F>, name: &str) -> Result<File, SpfsError> {
        match self.open_file(fs, name)? {
            Some(file) => Ok(file),
            None => self.create_file(fs, name),
        }
    }

    /// Adds an entry for `file` to this directory.
    ///
    /// Without a name the entry points at `file`'s own header, otherwise a new
    /// header called `name` is created sharing `file`'s content.
    pub fn create_hardlink<F: Flash>(
        &self,
        fs: &mut Spfs<F>,
        file: &File,
        name: Option<&str>,
    ) -> Result<File, SpfsError> {
        fs.check(file.fs())?;
        let header = file.header(fs)?;

        let Some(name) = name else {
            if self.links_to(fs, EntryKind::File, file.block())? {
                return Err(ProtocolError::AlreadyLinked.into());
            }
            self.check_new_entry(fs, &header.name)?;
            self.add_content(fs, magic::FILE_ENTRY, file.block())?;
            return Ok(File::at(self.fs, file.block()));
        };

        self.check_new_entry(fs, name)?;
        let content = header.content.resolve(file.block()).ok_or(ProtocolError::EmptyFile)?;
        let link = fs.create_linked_file(name, content)?;
        self.add_content(fs, magic::FILE_ENTRY, link.block())?;
        Ok(link)
    }

    /// Adds an entry for `dir` to this directory, so it appears in both places.
    pub fn link_directory<F: Flash>(&self, fs: &mut Spfs<F>, dir: &Directory) -> Result<(), SpfsError> {
        fs.check(dir.fs)?;
        if dir.block == self.block || self.links_to(fs, EntryKind::Directory, dir.block)? {
            return Err(ProtocolError::AlreadyLinked.into());
        }

        let name = dir.name(fs)?;
        self.check_new_entry(fs, &name)?;
        self.add_content(fs, magic::SUBDIR_ENTRY, dir.block)
    }

    /// Removes `file`'s entry from this directory, leaving it's blocks in place.
    pub fn remove_file<F: Flash>(&self, fs: &mut Spfs<F>, file: &File) -> Result<(), SpfsError> {
        fs.check(file.fs())?;
        self.remove_content(fs, EntryKind::File, file.block())
    }

    /// Removes `dir`'s entry from this directory, leaving it and everything in it in place.
    pub fn remove_directory<F: Flash>(&self, fs: &mut Spfs<F>, dir: &Directory) -> Result<(), SpfsError> {
        fs.check(dir.fs)?;
        self.remove_content(fs, EntryKind::Directory, dir.block)
    }

    /// Returns if a live entry of `kind` already points at `block`.
    fn links_to<F: Flash>(&self, fs: &Spfs<F>, kind: EntryKind, block: u32) -> Result<bool, SpfsError> {
        Ok(self
            .header(fs)?
            .live_entries()
            .any(|e| e.kind() == kind && e.target(self.block) == Some(block)))
    }

    /// Checks that an entry called `name` could be added, before anything is allocated for it.
    fn check_new_entry<F: Flash>(&self, fs: &Spfs<F>, name: &str) -> Result<(), SpfsError> {
        check_name(name)?;
        let header = self.header(fs)?;
        if header.entries.len() >= header.capacity() {
            return Err(AllocError::DirectoryFull.into());
        }

        if self.contains(fs, name)? {
            return Err(ProtocolError::NameExists.into());
        }
        Ok(())
    }

    /// Appends an entry to the table, rewriting the directory's blocks.
    fn add_content<F: Flash>(&self, fs: &mut Spfs<F>, tag: u16, target: u32) -> Result<(), SpfsError> {
        let mut header = self.header(fs)?;
        if header.entries.len() >= header.capacity() {
            return Err(AllocError::DirectoryFull.into());
        }

        let block_offset = i16::try_from(target as i64 - self.block as i64)
            .map_err(|_| FormatError::BadHeader("entry is out of reach of the directory"))?;
        header.entries.push(ContentEntry { tag, block_offset });
        self.rewrite(fs, &header)?;

        debug!("spfs: linked block {target} into '{}' ({tag:#x})", header.name);
        Ok(())
    }

    /// Masks the tag of the entry of `kind` pointing at `target`.
    fn remove_content<F: Flash>(&self, fs: &mut Spfs<F>, kind: EntryKind, target: u32) -> Result<(), SpfsError> {
        let mut header = self.header(fs)?;
        let entry = header
            .entries
            .iter_mut()
            .find(|e| e.kind() == kind && e.target(self.block) == Some(target))
            .ok_or(ProtocolError::NotFound)?;

        entry.tag &= DELETED_MASK;
        self.rewrite(fs, &header)?;

        debug!("spfs: unlinked block {target} from '{}'", header.name);
        Ok(())
    }

    /// Encodes `header` into erased blocks and writes them over the directory.
    fn rewrite<F: Flash>(&self, fs: &mut Spfs<F>, header: &DirectoryHeader) -> Result<(), SpfsError> {
        let mut buf = vec![0xFF; header.blocks as usize * BLOCK_SIZE];
        header.encode(&mut buf)?;
        fs.write_blocks(self.block, &buf)
    }
}
