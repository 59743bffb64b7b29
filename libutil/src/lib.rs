//! Library for some useful utilities used by sunflower's flash filesystem and it's tools.

#![cfg_attr(not(test), no_std)]

pub use bytes::{ByteReader, ByteWriter, CodecError};
pub use checksum::{Crc16, Crc32, crc16, crc32};

/// Checksums used to validate structures stored on flash.
pub mod checksum;

/// Bounds checked little-endian encoding and decoding of byte buffers.
pub mod bytes;
