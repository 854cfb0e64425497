//! Views over the `#Strings` and `#Blob` heaps.

use std::{ffi::CStr, str};

use crate::{file::parser::Parser, Result};

/// The `#Strings` heap: NUL-terminated UTF-8 strings addressed by byte offset.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wraps heap data. A missing heap is represented by an empty slice.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("#Strings heap does not start with NUL"));
        }

        Ok(Strings { data })
    }

    /// A heap with no strings.
    #[must_use]
    pub fn empty() -> Strings<'static> {
        Strings { data: &[] }
    }

    /// The string at `index`.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index == 0 {
            return Ok("");
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => result
                .to_str()
                .map_err(|_| malformed_error!("Invalid string at index - {}", index)),
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }
}

/// The `#Blob` heap: length-prefixed byte sequences addressed by byte offset.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wraps heap data.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("#Blob heap does not start with an empty blob"));
        }

        Ok(Blob { data })
    }

    /// A heap with no blobs.
    #[must_use]
    pub fn empty() -> Blob<'static> {
        Blob { data: &[] }
    }

    /// The blob at `index`.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        let start = index + parser.pos();
        self.data
            .get(start..start + len)
            .ok_or_else(|| out_of_bounds_error!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings() {
        let data = b"\0System\0Object\0";
        let heap = Strings::from(data).unwrap();
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "System");
        assert_eq!(heap.get(8).unwrap(), "Object");
        assert_eq!(heap.get(10).unwrap(), "ject");
        assert!(heap.get(15).is_err());
        assert!(Strings::from(b"x\0").is_err());
    }

    #[test]
    fn unterminated_string() {
        let heap = Strings::from(b"\0abc").unwrap();
        assert!(heap.get(1).is_err());
    }

    #[test]
    fn blobs() {
        let data = [0x00, 0x02, 0x06, 0x08, 0x01, 0xFF, 0x05];
        let heap = Blob::from(&data).unwrap();
        assert_eq!(heap.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(heap.get(1).unwrap(), &[0x06, 0x08]);
        assert_eq!(heap.get(4).unwrap(), &[0xFF]);
        assert!(heap.get(6).is_err());
    }
}
