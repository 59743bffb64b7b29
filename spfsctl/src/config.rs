//! The optional `spfs.toml` file.

use serde::Deserialize;
use std::{fs, io, path::Path};

use crate::cmd::CtlError;

/// The config file read when no other one is given.
pub const DEFAULT_CONFIG: &str = "spfs.toml";

/// The parsed config file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub image: Image,
    pub filesystem: Filesystem,
}

/// Where the flash image is and how it's laid out.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Image {
    /// The flash image file.
    pub path: String,

    /// The capacity of the flash, in bytes.
    pub size: u32,

    /// The byte address the filesystem starts at, which must be sector aligned.
    pub offset: u32,

    /// The size of filesystems created by `mkfs`, in bytes.
    pub fs_size: u32,
}

/// What new filesystems are called.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Filesystem {
    pub name: String,
    pub root: String,
}

impl Default for Image {
    fn default() -> Self {
        Image {
            path: String::from("flash.img"),
            size: 2 * 1024 * 1024,
            offset: 0,
            fs_size: 64 * 1024,
        }
    }
}

impl Default for Filesystem {
    fn default() -> Self {
        Filesystem {
            name: String::from("SPFS"),
            root: String::from("root"),
        }
    }
}

impl Config {
    /// Reads the config at `path`, or [`DEFAULT_CONFIG`] if no path is given.
    ///
    /// A missing default config just gives the default settings.
    pub fn load(path: Option<&str>) -> Result<Self, CtlError> {
        let (path, required) = match path {
            Some(path) => (path, true),
            None => (DEFAULT_CONFIG, false),
        };

        match fs::read_to_string(path) {
            Ok(buf) => Self::parse(&buf),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => Ok(Config::default()),
            Err(e) => Err(CtlError::Io(Path::new(path).display().to_string(), e)),
        }
    }

    pub fn parse(buf: &str) -> Result<Self, CtlError> {
        Ok(toml::from_str(buf)?)
    }

    /// Returns the settings used when mounting with libspfs.
    pub fn spfs_config(&self) -> libspfs::SpfsConfig {
        libspfs::SpfsConfig::new(&self.filesystem.name, &self.filesystem.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that missing fields and tables are filled in with defaults.
    #[test]
    fn partial_config() {
        let config = Config::parse("[image]\npath = \"nor.bin\"\noffset = 4096\n").unwrap();
        assert_eq!(config.image.path, "nor.bin");
        assert_eq!(config.image.offset, 4096);
        assert_eq!(config.image.size, Image::default().size);
        assert_eq!(config.filesystem, Filesystem::default());
    }

    /// Tests a config with every field set.
    #[test]
    fn full_config() {
        let buf = r#"
            [image]
            path = "flash.img"
            size = 1048576
            offset = 0
            fs_size = 8192

            [filesystem]
            name = "TestFS"
            root = "top"
        "#;
        let config = Config::parse(buf).unwrap();
        assert_eq!(config.image.fs_size, 8192);
        assert_eq!(config.spfs_config(), libspfs::SpfsConfig::new("TestFS", "top"));
    }

    /// Tests that misspelt keys are reported rather than ignored.
    #[test]
    fn unknown_keys() {
        assert!(matches!(Config::parse("[image]\nfs-size = 1\n"), Err(CtlError::Config(_))));
        assert!(Config::parse("[image]\nsize = \"big\"\n").is_err());
    }
}
