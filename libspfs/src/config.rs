//! Settings used when mounting a filesystem.

use alloc::string::String;

use crate::FsVersion;

/// How filesystems are mounted, and what an unformatted one is formatted as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfsConfig {
    /// The name given to filesystems which are formatted while mounting.
    pub fs_name: String,

    /// The name given to the root directory of filesystems formatted while mounting.
    pub root_name: String,

    /// The newest filesystem version which can be mounted, only the major & minor parts are compared.
    pub version: FsVersion,
}

impl SpfsConfig {
    /// Creates a config which formats filesystems with the given names.
    pub fn new(fs_name: &str, root_name: &str) -> Self {
        SpfsConfig {
            fs_name: String::from(fs_name),
            root_name: String::from(root_name),
            ..Self::default()
        }
    }
}

impl Default for SpfsConfig {
    fn default() -> Self {
        SpfsConfig {
            fs_name: String::from("SPFS"),
            root_name: String::from("root"),
            version: FsVersion::CURRENT,
        }
    }
}
