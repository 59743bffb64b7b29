/// Reflected CRC-32 (IEEE 802.3) polynomial.
const CRC32_POLY: u32 = 0xEDB8_8320;

/// Reflected CRC-16 (MODBUS) polynomial.
const CRC16_POLY: u16 = 0xA001;

/// An incremental CRC-32, for checksums computed over several disjoint fields.
///
/// Uses an initial value of `0xFFFFFFFF` and a final XOR of `0xFFFFFFFF`.
#[derive(Debug, Clone, Copy)]
pub struct Crc32(u32);

/// An incremental CRC-16, for checksums computed over several disjoint fields.
///
/// Uses an initial value of `0xFFFF` and no final XOR.
#[derive(Debug, Clone, Copy)]
pub struct Crc16(u16);

impl Crc32 {
    /// Creates a new checksum with nothing fed into it.
    pub const fn new() -> Self {
        Crc32(0xFFFF_FFFF)
    }

    /// Feeds `data` into the checksum.
    pub const fn update(mut self, data: &[u8]) -> Self {
        let mut idx = 0;
        while idx < data.len() {
            self.0 ^= data[idx] as u32;
            let mut bit = 0;
            while bit < 8 {
                self.0 = if self.0 & 1 != 0 { (self.0 >> 1) ^ CRC32_POLY } else { self.0 >> 1 };
                bit += 1;
            }
            idx += 1;
        }
        self
    }

    /// Returns the final checksum.
    pub const fn finish(self) -> u32 {
        self.0 ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Creates a new checksum with nothing fed into it.
    pub const fn new() -> Self {
        Crc16(0xFFFF)
    }

    /// Feeds `data` into the checksum.
    pub const fn update(mut self, data: &[u8]) -> Self {
        let mut idx = 0;
        while idx < data.len() {
            self.0 ^= data[idx] as u16;
            let mut bit = 0;
            while bit < 8 {
                self.0 = if self.0 & 1 != 0 { (self.0 >> 1) ^ CRC16_POLY } else { self.0 >> 1 };
                bit += 1;
            }
            idx += 1;
        }
        self
    }

    /// Returns the final checksum.
    pub const fn finish(self) -> u16 {
        self.0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the CRC-32 of `data`.
pub const fn crc32(data: &[u8]) -> u32 {
    Crc32::new().update(data).finish()
}

/// Returns the CRC-16 of `data`.
pub const fn crc16(data: &[u8]) -> u16 {
    Crc16::new().update(data).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests both checksums against their standard check values.
    #[test]
    #[rustfmt::skip]
    fn check_values() {
        assert_eq!( crc32(b"123456789"), 0xCBF4_3926 );
        assert_eq!( crc16(b"123456789"), 0x4B37      );
        assert_eq!( crc32(&[]),          0           );
        assert_eq!( crc16(&[]),          0xFFFF      );
    }

    /// Tests that feeding data in pieces gives the same result as all at once.
    #[test]
    fn incremental_matches_oneshot() {
        let data = b"sunflower flash filesystem";
        for split in 0..data.len() {
            let (a, b) = data.split_at(split);
            assert_eq!(Crc32::new().update(a).update(b).finish(), crc32(data));
            assert_eq!(Crc16::new().update(a).update(b).finish(), crc16(data));
        }
    }

    /// Tests that a single flipped bit always changes the checksum.
    #[test]
    fn bit_flips_are_detected() {
        let mut data = *b"\x14\x93\x01\x00root";
        let (good32, good16) = (crc32(&data), crc16(&data));
        for byte in 0..data.len() {
            for bit in 0..8 {
                data[byte] ^= 1 << bit;
                assert_ne!(crc32(&data), good32);
                assert_ne!(crc16(&data), good16);
                data[byte] ^= 1 << bit;
            }
        }
    }
}
