//! Little-endian primitive reads and writes over byte slices.
//!
//! All metadata structures are little-endian. Reads are bounds-checked and return
//! [`crate::Error::OutOfBounds`] instead of panicking.

use crate::Result;

/// A fixed-size integer that can be read from and written to little-endian bytes.
pub trait LeIO: Sized + Copy {
    /// Size of the encoded value in bytes.
    const SIZE: usize;

    /// Decodes from exactly `SIZE` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Appends the encoded value.
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_le_io {
    ($($ty:ty),*) => {
        $(
            impl LeIO for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut buffer = [0u8; std::mem::size_of::<$ty>()];
                    buffer.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buffer)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_io!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Reads a value at `offset` and advances the offset past it.
pub fn read_le_at<T: LeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let end = offset
        .checked_add(T::SIZE)
        .ok_or_else(|| out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let value = T::from_le_slice(&data[*offset..end]);
    *offset = end;
    Ok(value)
}

/// Reads an index column that is either 2 or 4 bytes wide.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

/// Writes an index column that is either 2 or 4 bytes wide.
#[allow(clippy::cast_possible_truncation)]
pub fn write_le_dyn(out: &mut Vec<u8>, value: u32, is_large: bool) {
    if is_large {
        value.write_le(out);
    } else {
        (value as u16).write_le(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequence() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut offset = 0;
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0x01);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0302);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x0706_0504);
        assert_eq!(offset, 7);
        assert!(read_le_at::<u8>(&data, &mut offset).is_err());
    }

    #[test]
    fn dynamic_width() {
        let mut out = Vec::new();
        write_le_dyn(&mut out, 0x1234, false);
        write_le_dyn(&mut out, 0x0001_0000, true);
        assert_eq!(out.len(), 6);

        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&out, &mut offset, false).unwrap(), 0x1234);
        assert_eq!(read_le_at_dyn(&out, &mut offset, true).unwrap(), 0x0001_0000);
    }

    #[test]
    fn short_buffer() {
        assert!(read_le_at::<u32>(&[0u8; 3], &mut 0).is_err());
        assert_eq!(read_le_at::<i16>(&[0xFE, 0xFF], &mut 0).unwrap(), -2);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&[0u8; 1], &mut offset).is_err());
    }
}
