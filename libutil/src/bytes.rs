use thiserror::Error;

/// Reads little-endian values out of a byte buffer, refusing to read past it's end.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Writes little-endian values into a byte buffer, refusing to write past it's end.
#[derive(Debug)]
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

/// The error returned when an access would leave the buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("access of {len} bytes at offset {offset} overruns a {size} byte buffer")]
pub struct CodecError {
    pub offset: usize,
    pub len: usize,
    pub size: usize,
}

/// Returns the range `offset..offset + len` if it lies within `size` bytes.
fn checked_range(offset: usize, len: usize, size: usize) -> Result<core::ops::Range<usize>, CodecError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(CodecError { offset, len, size }),
    }
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    /// Creates a reader positioned at `offset` into `buf`.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, CodecError> {
        checked_range(offset, 0, buf.len())?;
        Ok(ByteReader { buf, pos: offset })
    }

    /// Returns the current offset into the buffer.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns how many bytes are left to read.
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Moves the reader to `offset`.
    pub fn seek(&mut self, offset: usize) -> Result<(), CodecError> {
        checked_range(offset, 0, self.buf.len())?;
        self.pos = offset;
        Ok(())
    }

    /// Reads the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let range = checked_range(self.pos, len, self.buf.len())?;
        self.pos = range.end;
        Ok(&self.buf[range])
    }

    /// Reads the next `N` bytes into an array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut arr = [0; N];
        arr.copy_from_slice(self.bytes(N)?);
        Ok(arr)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn i16(&mut self) -> Result<i16, CodecError> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.array().map(u32::from_le_bytes)
    }
}

impl<'a> ByteWriter<'a> {
    /// Creates a writer positioned at the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter { buf, pos: 0 }
    }

    /// Returns the current offset into the buffer.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Moves the writer to `offset`.
    pub fn seek(&mut self, offset: usize) -> Result<(), CodecError> {
        checked_range(offset, 0, self.buf.len())?;
        self.pos = offset;
        Ok(())
    }

    /// Writes `bytes` at the current position.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let range = checked_range(self.pos, bytes.len(), self.buf.len())?;
        self.pos = range.end;
        self.buf[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u8(&mut self, val: u8) -> Result<(), CodecError> {
        self.put_bytes(&[val])
    }

    pub fn put_u16(&mut self, val: u16) -> Result<(), CodecError> {
        self.put_bytes(&val.to_le_bytes())
    }

    pub fn put_i16(&mut self, val: i16) -> Result<(), CodecError> {
        self.put_bytes(&val.to_le_bytes())
    }

    pub fn put_u32(&mut self, val: u32) -> Result<(), CodecError> {
        self.put_bytes(&val.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that values are written and read back little-endian.
    #[test]
    fn little_endian_layout() {
        let mut buf = [0xFF; 12];
        let mut w = ByteWriter::new(&mut buf);
        w.put_u32(0xA36C_A3FA).unwrap();
        w.put_u16(0x9314).unwrap();
        w.put_i16(-2).unwrap();
        w.put_bytes(b"ab").unwrap();
        assert_eq!(w.position(), 10);
        assert_eq!(&buf[..10], &[0xFA, 0xA3, 0x6C, 0xA3, 0x14, 0x93, 0xFE, 0xFF, b'a', b'b']);

        let mut r = ByteReader::new(&buf);
        assert_eq!(r.u32(), Ok(0xA36C_A3FA));
        assert_eq!(r.u16(), Ok(0x9314));
        assert_eq!(r.i16(), Ok(-2));
        assert_eq!(r.bytes(2), Ok(&b"ab"[..]));
        assert_eq!(r.remaining(), 2);
    }

    /// Tests that accesses past the end of the buffer are refused and don't move the cursor.
    #[test]
    #[rustfmt::skip]
    fn overruns_are_refused() {
        let buf = [0u8; 3];
        let mut r = ByteReader::new(&buf);
        assert_eq!( r.u32(),        Err(CodecError { offset: 0, len: 4, size: 3 }) );
        assert_eq!( r.position(),   0                                               );
        assert!(    r.u16().is_ok()                                                 );
        assert!(    r.u16().is_err()                                                );
        assert!(    r.seek(4).is_err()                                              );
        assert!(    ByteReader::at(&buf, usize::MAX).is_err()                       );

        let mut out = [0u8; 3];
        let mut w = ByteWriter::new(&mut out);
        assert!(    w.put_u32(1).is_err()                                           );
        assert!(    w.seek(3).is_ok()                                               );
        assert!(    w.put_u8(1).is_err()                                            );
    }
}
