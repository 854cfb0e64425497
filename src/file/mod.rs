//! Byte sources for metadata images and the low-level readers over them.
//!
//! Homologous images arrive either as an owned buffer handed over by the host or as a file on disk.
//! Both are exposed through [`ImageBytes`], which the raw image reader borrows from.

pub mod io;
pub mod parser;

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::Result;

/// Owned or memory-mapped image bytes.
#[derive(Debug)]
pub enum ImageBytes {
    /// Bytes copied from a caller-provided buffer.
    Memory(Vec<u8>),
    /// A read-only mapping of a file.
    Mapped(Mmap),
}

impl ImageBytes {
    /// Maps a file into memory.
    pub fn map(path: impl AsRef<Path>) -> Result<ImageBytes> {
        let file = fs::File::open(path)?;
        // The mapping is read-only and owned for as long as the image lives.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(ImageBytes::Mapped(mmap))
    }

    /// The full contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match self {
            ImageBytes::Memory(data) => data,
            ImageBytes::Mapped(mmap) => mmap.as_ref(),
        }
    }

    /// A bounds-checked sub-slice.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        self.data()
            .get(offset..end)
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// True if no bytes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

impl From<Vec<u8>> for ImageBytes {
    fn from(value: Vec<u8>) -> Self {
        ImageBytes::Memory(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_slices() {
        let bytes = ImageBytes::from(vec![1, 2, 3, 4]);
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes.data_slice(1, 2).unwrap(), &[2, 3]);
        assert!(bytes.data_slice(3, 2).is_err());
        assert!(bytes.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            ImageBytes::map("/definitely/not/here.dll"),
            Err(crate::Error::FileError(_))
        ));
    }
}
