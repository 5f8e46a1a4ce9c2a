//! Cursor-based big-endian reader over a bytecode buffer.
//!
//! All reads are bounds checked and report a [`crate::Error::Malformed`] naming the offset
//! that ran past the end of the buffer.

use crate::Result;

/// A bounds-checked cursor over a byte slice.
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

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes left after the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if `position` lies beyond the end of the buffer.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(malformed_error!(
                "Seek to {} beyond end of code ({})",
                position,
                self.data.len()
            ));
        }
        self.position = position;
        Ok(())
    }

    /// Skips padding until the position is a multiple of `alignment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the padding runs past the end of the buffer.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - self.position % alignment) % alignment;
        self.take(padding).map(|_| ())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(malformed_error!(
                "Truncated bytecode: need {} byte(s) at offset {}, {} left",
                count,
                self.position,
                self.remaining()
            ));
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Reads an unsigned byte.
    ///
    /// # Errors
    ///
    /// Returns an error at the end of the buffer.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a signed byte.
    ///
    /// # Errors
    ///
    /// Returns an error at the end of the buffer.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a big-endian `i16`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two bytes remain.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// Reads a big-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than four bytes remain.
    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
