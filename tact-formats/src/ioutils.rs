//! Reader extensions for the odd field widths TACT formats use.

use std::io::{Error, ErrorKind, Read};

/// Generic trait for reading integer types from a buffer.
pub trait ReadInt {
    /// Error type which can be returned on read failures.
    type Error;

    /// Read a `u8` from the buffer.
    fn read_u8(&mut self) -> Result<u8, Self::Error>;

    /// Read a little-endian `u16` from the buffer.
    fn read_u16le(&mut self) -> Result<u16, Self::Error>;

    /// Read a little-endian `i32` from the buffer.
    fn read_i32le(&mut self) -> Result<i32, Self::Error>;

    /// Read a little-endian `u32` from the buffer.
    fn read_u32le(&mut self) -> Result<u32, Self::Error>;

    /// Read a little-endian `u64` from the buffer.
    fn read_u64le(&mut self) -> Result<u64, Self::Error>;

    /// Read a big-endian `u16` from the buffer.
    fn read_u16be(&mut self) -> Result<u16, Self::Error>;

    /// Read a big-endian `u32` from the buffer.
    fn read_u32be(&mut self) -> Result<u32, Self::Error>;

    /// Read a big-endian 40-bit unsigned integer from the buffer.
    fn read_u40be(&mut self) -> Result<u64, Self::Error>;

    /// Read a big-endian unsigned integer of `width` bytes (0 to 8).
    fn read_uint_be(&mut self, width: usize) -> Result<u64, Self::Error>;

    /// Read bytes up to (and consuming) a NUL terminator.
    fn read_cstring(&mut self) -> Result<String, Self::Error>;
}

impl<T: Read> ReadInt for T {
    type Error = Error;

    fn read_u8(&mut self) -> Result<u8, Self::Error> {
        let mut b = [0; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u16le(&mut self) -> Result<u16, Self::Error> {
        let mut b = [0; size_of::<u16>()];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_i32le(&mut self) -> Result<i32, Self::Error> {
        let mut b = [0; size_of::<i32>()];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn read_u32le(&mut self) -> Result<u32, Self::Error> {
        let mut b = [0; size_of::<u32>()];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64le(&mut self) -> Result<u64, Self::Error> {
        let mut b = [0; size_of::<u64>()];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_u16be(&mut self) -> Result<u16, Self::Error> {
        let mut b = [0; size_of::<u16>()];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u32be(&mut self) -> Result<u32, Self::Error> {
        let mut b = [0; size_of::<u32>()];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    fn read_u40be(&mut self) -> Result<u64, Self::Error> {
        let mut b = [0; size_of::<u64>()];
        self.read_exact(&mut b[3..])?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_uint_be(&mut self, width: usize) -> Result<u64, Self::Error> {
        if width > size_of::<u64>() {
            return Err(Error::new(ErrorKind::InvalidInput, "width exceeds u64"));
        }
        let mut b = [0; size_of::<u64>()];
        self.read_exact(&mut b[8 - width..])?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_cstring(&mut self) -> Result<String, Self::Error> {
        let mut out = Vec::new();
        loop {
            let mut b = [0; 1];
            self.read_exact(&mut b)?;
            if b[0] == 0 {
                break;
            }
            out.push(b[0]);
        }
        String::from_utf8(out).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_u40be() {
        let mut c = Cursor::new([0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(c.read_u40be().unwrap(), 0x0102030405);
    }

    #[test]
    fn reads_variable_width_be() {
        let mut c = Cursor::new([0xAB, 0xCD, 0xEF]);
        assert_eq!(c.read_uint_be(3).unwrap(), 0xABCDEF);

        let mut c = Cursor::new([0xAB]);
        assert_eq!(c.read_uint_be(0).unwrap(), 0);
        assert_eq!(c.read_uint_be(1).unwrap(), 0xAB);
    }

    #[test]
    fn reads_cstring() {
        let mut c = Cursor::new(b"enUS\0rest".to_vec());
        assert_eq!(c.read_cstring().unwrap(), "enUS");
        assert_eq!(c.read_u8().unwrap(), b'r');
    }

    #[test]
    fn cstring_without_terminator_fails() {
        let mut c = Cursor::new(b"enUS".to_vec());
        assert!(c.read_cstring().is_err());
    }
}
