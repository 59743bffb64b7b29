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
    libspfs/src/flash.rs

    The flash service the filesystem performs all of it's I/O through,
    along with an in-memory NOR flash used by tests and host tools.
*/

use alloc::{vec, vec::Vec};
use log::trace;
use thiserror::Error;

use crate::{PAGE_SIZE, SECTOR_SIZE};

/// A byte addressable NOR flash.
///
/// - Reads may start anywhere and be of any length.
/// - Writes must start on and cover whole [`PAGE_SIZE`] pages, and can only clear bits.
/// - Erases must start on and cover whole [`SECTOR_SIZE`] sectors, setting every byte to `0xFF`.
pub trait Flash {
    /// The size of the flash, in bytes.
    fn capacity(&self) -> u32;

    /// Reads from `address` into `buf` until it's full, returning the number of bytes read.
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<usize, FlashError>;

    /// Programs `data` at `address`, returning the number of bytes written.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, FlashError>;

    /// Erases `size` bytes starting at `address`.
    fn erase(&mut self, address: u32, size: u32) -> Result<(), FlashError>;

    /// Returns the whole flash as a slice, if it's memory mapped.
    fn mapped(&self) -> Option<&[u8]> {
        None
    }
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn capacity(&self) -> u32 {
        (**self).capacity()
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, FlashError> {
        (**self).write(address, data)
    }

    fn erase(&mut self, address: u32, size: u32) -> Result<(), FlashError> {
        (**self).erase(address, size)
    }

    fn mapped(&self) -> Option<&[u8]> {
        (**self).mapped()
    }
}

/// The error returned by flash operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    #[error("access of {len} bytes at {address:#x} is outside of the flash")]
    OutOfRange { address: u32, len: usize },

    #[error("write of {len} bytes at {address:#x} isn't aligned to a flash page")]
    MisalignedWrite { address: u32, len: usize },

    #[error("erase of {len} bytes at {address:#x} isn't aligned to a flash sector")]
    MisalignedErase { address: u32, len: usize },

    #[error("the data read back from {address:#x} doesn't match what was written")]
    VerifyFailed { address: u32 },
}

/// Flash emulated in memory, starting out fully erased.
///
/// Programming ANDs data into the existing contents, as real NOR flash does.
#[derive(Debug, Clone)]
pub struct RamFlash {
    cells: Vec<u8>,
}

impl RamFlash {
    /// Creates a new, erased flash of `capacity` bytes.
    pub fn new(capacity: u32) -> Self {
        RamFlash {
            cells: vec![0xFF; capacity as usize],
        }
    }

    /// Creates a flash holding the contents of `image`.
    pub fn from_image(image: Vec<u8>) -> Self {
        RamFlash { cells: image }
    }

    /// Returns the raw contents of the flash.
    pub fn into_image(self) -> Vec<u8> {
        self.cells
    }

    /// Returns the raw contents of the flash.
    pub fn image(&self) -> &[u8] {
        &self.cells
    }

    /// Flips a bit without going through the flash rules, simulating corruption.
    pub fn flip_bit(&mut self, address: u32, bit: u8) {
        if let Some(byte) = self.cells.get_mut(address as usize) {
            *byte ^= 1 << (bit % 8);
        }
    }

    /// Returns the range covered by an access, if it lies within the flash.
    fn range(&self, address: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.cells.len() => Ok(start..end),
            _ => Err(FlashError::OutOfRange { address, len }),
        }
    }
}

impl Flash for RamFlash {
    fn capacity(&self) -> u32 {
        self.cells.len() as u32
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.cells[range]);
        Ok(buf.len())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, FlashError> {
        let range = self.range(address, data.len())?;
        if address % PAGE_SIZE != 0 || data.len() % PAGE_SIZE as usize != 0 {
            return Err(FlashError::MisalignedWrite { address, len: data.len() });
        }

        trace!("flash: programming {} bytes at {address:#x}", data.len());
        for (cell, byte) in self.cells[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(data.len())
    }

    fn erase(&mut self, address: u32, size: u32) -> Result<(), FlashError> {
        let range = self.range(address, size as usize)?;
        if address % SECTOR_SIZE != 0 || size % SECTOR_SIZE != 0 {
            return Err(FlashError::MisalignedErase { address, len: size as usize });
        }

        trace!("flash: erasing {size} bytes at {address:#x}");
        self.cells[range].fill(0xFF);
        Ok(())
    }

    fn mapped(&self) -> Option<&[u8]> {
        Some(&self.cells)
    }
}
