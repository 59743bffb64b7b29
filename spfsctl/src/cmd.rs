//! The commands spfsctl can run on a flash image.

use libspfs::{BlockState, Directory, File, Flash, RamFlash, Spfs, SpfsError};
use log::{debug, info};
use std::{
    fs,
    io::{self, Write},
};
use thiserror::Error;

use crate::config::Config;

/// The number of blocks drawn per line of the block usage map.
const MAP_WIDTH: usize = 64;

/// An error created while running a command.
#[derive(Error, Debug)]
pub enum CtlError {
    #[error("{0}")]
    Spfs(#[from] SpfsError),

    #[error("failed accessing `{0}`, {1}")]
    Io(String, io::Error),

    #[error("failed writing output, {0}")]
    Output(#[from] io::Error),

    #[error("failed parsing the config file, {0}")]
    Config(#[from] toml::de::Error),

    #[error("`{0}` doesn't exist")]
    NotFound(String),

    #[error("`{0}` is a directory")]
    IsADirectory(String),

    #[error("`{0}` needs a file or directory name")]
    NoName(String),

    #[error("the image is {found} bytes, but the config says the flash is {expected} bytes")]
    ImageTooLarge { found: usize, expected: u32 },
}

/// A flash image loaded into memory.
pub struct Image {
    path: String,
    flash: RamFlash,
}

impl Image {
    /// Loads the image from the config's path, starting with an erased flash if it doesn't exist yet.
    pub fn load(config: &Config) -> Result<Self, CtlError> {
        let path = config.image.path.clone();
        let size = config.image.size;

        let flash = match fs::read(&path) {
            Ok(mut buf) => {
                if buf.len() > size as usize {
                    return Err(CtlError::ImageTooLarge { found: buf.len(), expected: size });
                }
                // Anything past the end of the file is treated as erased
                buf.resize(size as usize, 0xFF);
                RamFlash::from_image(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("`{path}` doesn't exist, starting with erased flash");
                RamFlash::new(size)
            }
            Err(e) => return Err(CtlError::Io(path, e)),
        };

        debug!("loaded {size} byte flash image from `{path}`");
        Ok(Image { path, flash })
    }

    /// Writes the image back to where it was loaded from.
    pub fn save(&self) -> Result<(), CtlError> {
        fs::write(&self.path, self.flash.image()).map_err(|e| CtlError::Io(self.path.clone(), e))?;
        debug!("saved flash image to `{}`", self.path);
        Ok(())
    }

    /// Mounts the filesystem at or after the configured offset.
    pub fn mount(&mut self, config: &Config) -> Result<Spfs<&mut RamFlash>, CtlError> {
        let end = self.flash.capacity();
        Ok(Spfs::search_filesystem(&mut self.flash, config.image.offset, end, config.spfs_config())?)
    }
}

/// Splits a path into the components separated by `/`.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Walks from the root to the directory at `path`, returning every directory on the way.
fn resolve_trail<F: Flash>(fs: &Spfs<F>, path: &str) -> Result<Vec<Directory>, CtlError> {
    fs.root().walk(fs, path)?.ok_or_else(|| CtlError::NotFound(path.to_string()))
}

/// Walks from the root to the directory at `path`.
fn resolve_dir<F: Flash>(fs: &Spfs<F>, path: &str) -> Result<Directory, CtlError> {
    let trail = resolve_trail(fs, path)?;
    Ok(trail.last().copied().unwrap_or_else(|| fs.root()))
}

/// Splits `path` into it's parent directory and final component.
fn resolve_parent<'a, F: Flash>(fs: &Spfs<F>, path: &'a str) -> Result<(Directory, &'a str), CtlError> {
    let mut parts = components(path);
    let name = parts.pop().ok_or_else(|| CtlError::NoName(path.to_string()))?;
    Ok((resolve_dir(fs, &parts.join("/"))?, name))
}

/// Opens the file at `path`.
fn resolve_file<F: Flash>(fs: &Spfs<F>, path: &str) -> Result<File, CtlError> {
    let (parent, name) = resolve_parent(fs, path)?;
    match parent.open_file(fs, name)? {
        Some(file) => Ok(file),
        None if parent.open_subdirectory(fs, name)?.is_some() => Err(CtlError::IsADirectory(path.to_string())),
        None => Err(CtlError::NotFound(path.to_string())),
    }
}

/// Creates a new filesystem, erasing whatever was in it's region.
pub fn mkfs(config: &Config, size: Option<u32>, name: Option<&str>, root: Option<&str>) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let size = size.unwrap_or(config.image.fs_size);
    let name = name.unwrap_or(config.filesystem.name.as_str());
    let root = root.unwrap_or(config.filesystem.root.as_str());
    let offset = config.image.offset;

    let fs = Spfs::create_new_filesystem(&mut image.flash, offset, size, name, root)?;
    println!("Created filesystem `{}` ({} blocks) at {offset:#x}", fs.name(), fs.block_count());
    drop(fs);

    image.save()
}

/// Lists the contents of a directory.
pub fn dir(config: &Config, path: &str) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let fs = image.mount(config)?;
    let trail = resolve_trail(&fs, path)?;
    list(&fs, &trail, &mut io::stdout().lock())
}

/// Writes the listing of the last directory in `trail` to `out`.
fn list<F: Flash>(fs: &Spfs<F>, trail: &[Directory], out: &mut impl Write) -> Result<(), CtlError> {
    let dir = trail.last().copied().unwrap_or_else(|| fs.root());
    let files = dir.list_files(fs)?;

    // The directory's own header counts towards the space used on disk
    let (mut total, mut on_disk) = (0, dir.size_on_disk(fs)?);
    for (_, file) in &files {
        total += file.size(fs)?;
        on_disk += file.size_on_disk(fs)?;
    }

    writeln!(out, "Directory of {}", Directory::full_path(fs, trail)?)?;
    writeln!(out, "{} files, {total} bytes, {on_disk} bytes on disk", files.len())?;
    for (name, sub) in dir.list_directories(fs)? {
        writeln!(out, "  <DIR>            {name} ({} entries)", sub.entry_count(fs)?)?;
    }
    for (name, file) in &files {
        let (size, version) = (file.size(fs)?, file.version(fs)?);
        writeln!(out, "  {size:>8} v{version:<6} {name}")?;
    }

    let (used, capacity) = (dir.header(fs)?.entries.len(), dir.capacity(fs)?);
    writeln!(out, "{used}/{capacity} entries used")?;
    Ok(())
}

/// Creates a directory, along with any missing parents when `parents` is set.
pub fn md(config: &Config, path: &str, parents: bool) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let mut fs = image.mount(config)?;

    if parents {
        let mut dir = fs.root();
        for name in components(path) {
            dir = dir.open_or_create_directory(&mut fs, name)?;
        }
    } else {
        let (parent, name) = resolve_parent(&fs, path)?;
        parent.create_directory(&mut fs, name)?;
    }

    drop(fs);
    image.save()
}

/// Prints a file, or an older version of it.
pub fn cat(config: &Config, path: &str, version: usize) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let fs = image.mount(config)?;
    let file = resolve_file(&fs, path)?;

    let content = match file.current(&fs)? {
        None if version == 0 => Vec::new(),
        _ => file.open_version(&fs, version)?.read_as_vec(&fs)?,
    };
    io::stdout().lock().write_all(&content)?;
    Ok(())
}

/// Stores a host file into the filesystem, adding a new version if it already exists.
pub fn store(config: &Config, source: &str, path: &str) -> Result<(), CtlError> {
    let content = fs::read(source).map_err(|e| CtlError::Io(source.to_string(), e))?;
    let mut image = Image::load(config)?;
    let mut fs = image.mount(config)?;

    let (parent, name) = resolve_parent(&fs, path)?;
    let mut file = parent.open_or_create_file(&mut fs, name)?;
    file.write(&mut fs, &content)?;
    println!("Stored {} bytes as version {} of `{path}`", content.len(), file.version(&fs)?);

    drop(fs);
    image.save()
}

/// Removes a file or directory's entry from it's parent.
pub fn rm(config: &Config, path: &str) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let mut fs = image.mount(config)?;

    let (parent, name) = resolve_parent(&fs, path)?;
    if let Some(file) = parent.open_file(&fs, name)? {
        parent.remove_file(&mut fs, &file)?;
    } else if let Some(dir) = parent.open_subdirectory(&fs, name)? {
        parent.remove_directory(&mut fs, &dir)?;
    } else {
        return Err(CtlError::NotFound(path.to_string()));
    }

    drop(fs);
    image.save()
}

/// Links an existing file or directory into another directory.
pub fn ln(config: &Config, target: &str, dest: &str, name: Option<&str>) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let mut fs = image.mount(config)?;
    let dest = resolve_dir(&fs, dest)?;

    let (parent, leaf) = resolve_parent(&fs, target)?;
    if let Some(file) = parent.open_file(&fs, leaf)? {
        dest.create_hardlink(&mut fs, &file, name)?;
    } else if let Some(dir) = parent.open_subdirectory(&fs, leaf)? {
        dest.link_directory(&mut fs, &dir)?;
    } else {
        return Err(CtlError::NotFound(target.to_string()));
    }

    drop(fs);
    image.save()
}

/// Lists every version of a file, newest first.
pub fn versions(config: &Config, path: &str) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let fs = image.mount(config)?;
    let file = resolve_file(&fs, path)?;
    let mut out = io::stdout().lock();

    for n in 0..file.version_count(&fs)? {
        let version = file.open_version(&fs, n)?;
        writeln!(out, "  {n:>4}  {:>8} bytes  block {}", version.size(), version.block())?;
    }
    writeln!(out, "{} bytes on disk", file.size_on_disk(&fs)?)?;
    Ok(())
}

/// Prints a summary of the filesystem, and optionally a map of every block.
pub fn fsinfo(config: &Config, map: bool) -> Result<(), CtlError> {
    let mut image = Image::load(config)?;
    let fs = image.mount(config)?;
    let info = fs.info()?;
    let mut out = io::stdout().lock();

    writeln!(out, "Name:        {}", info.name)?;
    writeln!(out, "Version:     {}", info.version)?;
    writeln!(out, "Address:     {:#x}", info.address)?;
    writeln!(out, "Size:        {} bytes ({} blocks)", info.size, info.blocks)?;
    writeln!(out, "Free:        {} blocks", info.free)?;
    writeln!(out, "Directories: {} blocks", info.directories)?;
    writeln!(out, "Files:       {} blocks", info.files)?;
    writeln!(out, "Other:       {} blocks", info.used)?;
    writeln!(out, "Bad:         {} blocks", info.bad)?;

    if map {
        let states: Vec<BlockState> = fs.block_usage_map()?;
        for (line, chunk) in states.chunks(MAP_WIDTH).enumerate() {
            let drawn: String = chunk.iter().map(|s| s.to_string()).collect();
            writeln!(out, "{:>6} {drawn}", line * MAP_WIDTH)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that paths are split into their components.
    #[test]
    #[rustfmt::skip]
    fn path_components() {
        assert_eq!( components("/data/a.txt"),   ["data", "a.txt"] );
        assert_eq!( components("data//./logs/"), ["data", "logs"]  );
        assert!(    components("/").is_empty()                     );
    }

    /// Tests that paths are resolved relative to the root.
    #[test]
    fn path_resolution() {
        let mut fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        let data = fs.root().create_directory(&mut fs, "data").unwrap();
        let file = data.create_file(&mut fs, "a.txt").unwrap();

        assert_eq!(resolve_dir(&fs, "/").unwrap(), fs.root());
        assert_eq!(resolve_dir(&fs, "/data/").unwrap(), data);
        assert_eq!(resolve_file(&fs, "data/a.txt").unwrap(), file);
        assert!(matches!(resolve_file(&fs, "/data"), Err(CtlError::IsADirectory(_))));
        assert!(matches!(resolve_file(&fs, "/data/b.txt"), Err(CtlError::NotFound(_))));
        assert!(matches!(resolve_parent(&fs, "/"), Err(CtlError::NoName(_))));
        assert_eq!(resolve_dir(&fs, "/data/../data").unwrap(), data);
    }

    /// Tests that a listing shows the full path and what everything takes up on disk.
    #[test]
    fn directory_listing() {
        let mut fs = Spfs::create_new_filesystem(RamFlash::new(8192), 0, 8192, "TestFS", "root").unwrap();
        let data = fs.root().create_directory(&mut fs, "data").unwrap();
        let logs = data.create_directory(&mut fs, "logs").unwrap();
        logs.create_file(&mut fs, "boot.log").unwrap();

        let mut file = data.create_file(&mut fs, "a.txt").unwrap();
        file.write(&mut fs, b"hello").unwrap();
        file.write(&mut fs, &[b'x'; 300]).unwrap();

        let mut out = Vec::new();
        list(&fs, &resolve_trail(&fs, "/data").unwrap(), &mut out).unwrap();

        // directory header, file header and 1 + 2 content blocks
        let expected = [
            "Directory of root/data",
            "1 files, 300 bytes, 1280 bytes on disk",
            "  <DIR>            logs (1 entries)",
            "       300 v1      a.txt",
            "2/60 entries used",
        ];
        assert_eq!(String::from_utf8(out).unwrap(), expected.join("\n") + "\n");
    }
}
