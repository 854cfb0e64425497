//! A cursor over a byte slice with the ECMA-335 compressed encodings.

use crate::{
    file::io::{read_le_at, LeIO},
    metadata::token::{TableId, Token},
    Result,
};

/// A forward-only reader used by the signature and table decoders.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// True while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Skips `step` bytes.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if self.position + step > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Returns the next byte without consuming it.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Reads a little-endian value.
    pub fn read_le<T: LeIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Reads an ECMA-335 II.23.2 compressed unsigned integer.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Reads a `TypeDefOrRefOrSpecEncoded` token.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let encoded = self.read_compressed_uint()?;
        let table = match encoded & 0x3 {
            0x0 => TableId::TypeDef,
            0x1 => TableId::TypeRef,
            0x2 => TableId::TypeSpec,
            _ => return Err(malformed_error!("Invalid compressed token - {}", encoded)),
        };

        Ok(Token::from_parts(table, encoded >> 2))
    }
}

/// Appends a compressed unsigned integer.
#[allow(clippy::cast_possible_truncation)]
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(((value >> 8) as u8) | 0x80);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(((value >> 24) as u8) | 0xC0);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => return Err(malformed_error!("Value too large to compress - {}", value)),
    }
    Ok(())
}

/// Appends a `TypeDefOrRefOrSpecEncoded` token.
pub fn write_compressed_token(out: &mut Vec<u8>, token: Token) -> Result<()> {
    let tag = match token.table_id() {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => return Err(malformed_error!("Token {} can not be compressed", token)),
    };
    write_compressed_uint(out, (token.row() << 2) | tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_uint_widths() {
        let data = [0x03, 0x80, 0x80, 0xC0, 0x00, 0x40, 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_uint().unwrap(), 3);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x80);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x4000);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn peek_and_advance_stay_in_bounds() {
        let mut parser = Parser::new(&[0x10, 0x20]);
        assert_eq!(parser.peek_byte().unwrap(), 0x10);
        assert_eq!(parser.pos(), 0);
        parser.advance_by(2).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.peek_byte().is_err());
        assert!(parser.advance_by(1).is_err());
        assert_eq!(parser.pos(), 2);
    }

    #[test]
    fn compressed_uint_invalid_prefix() {
        let mut parser = Parser::new(&[0xE0]);
        assert!(parser.read_compressed_uint().is_err());
    }

    #[test]
    fn compressed_token() {
        let mut out = Vec::new();
        write_compressed_token(&mut out, Token(0x1B00_0002)).unwrap();
        let mut parser = Parser::new(&out);
        assert_eq!(parser.read_compressed_token().unwrap(), Token(0x1B00_0002));

        assert!(write_compressed_token(&mut out, Token(0x0600_0001)).is_err());
    }

    #[test]
    fn writer_matches_reader_boundaries() {
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(Parser::new(&out).read_compressed_uint().unwrap(), value);
        }
        assert!(write_compressed_uint(&mut Vec::new(), 0x2000_0000).is_err());
    }
}
