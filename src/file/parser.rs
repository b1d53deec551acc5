//! Low-level byte stream parser for call frame instruction decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser designed for replaying DWARF call frame instruction streams and decoding record
//! bodies that have already been fetched from the target address space. It offers
//! bounds-checked access to binary data in the byte order and pointer width of the module
//! being inspected.
//!
//! # Architecture
//!
//! The parser is built around a simple cursor-based model that maintains a position within
//! a byte slice:
//!
//! - **Position tracking** - Maintains current offset for sequential parsing operations
//! - **Bounds checking** - All operations validate data availability before reading
//! - **Module layout** - Byte order and word size travel with the cursor, so `advance_loc2`,
//!   `set_loc` and friends decode their operands the way the producing toolchain wrote them
//! - **LEB128 operands** - ULEB128/SLEB128 readers shared with the rest of the crate through
//!   [`crate::file::io`]
//!
//! # Usage Examples
//!
//! ```rust
//! use cfiscope::{Parser, ByteOrder};
//!
//! // DW_CFA_def_cfa(7, 16): operands are ULEB128
//! let data = [0x0C, 0x07, 0x10];
//! let mut parser = Parser::with_layout(&data, ByteOrder::LittleEndian, 8);
//!
//! let opcode = parser.read::<u8>()?;
//! assert_eq!(opcode, 0x0C);
//! assert_eq!(parser.read_uleb128()?, 7);
//! assert_eq!(parser.read_uleb128()?, 16);
//! assert!(!parser.has_more_data());
//! # Ok::<(), cfiscope::Error>(())
//! ```

use crate::{
    file::io::{read_at, read_be_at, read_le_at, read_sleb128, read_uleb128, ByteOrder, DwarfIO},
    Result,
};

/// A cursor-based parser for byte buffers extracted from an inspected module.
///
/// `Parser` provides bounds-checked sequential reads over a byte slice in the byte order
/// and pointer width of the module the bytes came from. It is used for replaying call
/// frame instruction streams (where positions are relative to the start of the stream)
/// while [`crate::memory::MemoryCursor`] handles reads positioned in the target address
/// space.
///
/// # Examples
///
/// ```rust
/// use cfiscope::{Parser, ByteOrder};
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::with_layout(&data, ByteOrder::BigEndian, 4);
///
/// let first = parser.read::<u32>()?;
/// assert_eq!(first, 0x0102_0304);
///
/// // Pointer-width read follows the configured word size
/// let ptr = parser.read_pointer()?;
/// assert_eq!(ptr, 0x0506_0708);
/// # Ok::<(), cfiscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
    /// Byte order of the module this buffer came from
    byte_order: ByteOrder,
    /// Pointer width of the owning process, 4 or 8 bytes
    word_size: u8,
}

impl<'a> Parser<'a> {
    /// Create a new [`Parser`] from a byte slice, defaulting to little-endian, 8-byte words.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser {
            data,
            position: 0,
            byte_order: ByteOrder::LittleEndian,
            word_size: 8,
        }
    }

    /// Create a new [`Parser`] with an explicit module layout.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    /// * `byte_order` - Byte order of the module the buffer came from
    /// * `word_size` - Pointer width of the owning process (4 or 8)
    #[must_use]
    pub fn with_layout(data: &'a [u8], byte_order: ByteOrder, word_size: u8) -> Self {
        Parser {
            data,
            position: 0,
            byte_order,
            word_size,
        }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Byte order this parser decodes multi-byte values with.
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Pointer width used by [`Parser::read_pointer`].
    #[must_use]
    pub fn word_size(&self) -> u8 {
        self.word_size
    }

    /// Move the current position to the specified index.
    ///
    /// # Arguments
    /// * `pos` - The position to move the cursor to
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Arguments
    /// * `step` - Amount of bytes to advance
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(end) = self.position.checked_add(step) else {
            return Err(out_of_bounds_error!());
        };
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = end;
        Ok(())
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Get the bytes from the current position to the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    /// Peek at the next byte without advancing the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is at or beyond the data length.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(self.data[self.position])
    }

    /// Read a type `T` from the current position in little-endian format and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: DwarfIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a type `T` from the current position in big-endian format and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_be<T: DwarfIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Read a type `T` from the current position in the module's byte order and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read<T: DwarfIO>(&mut self) -> Result<T> {
        read_at::<T>(self.data, &mut self.position, self.byte_order)
    }

    /// Read a pointer-width value in the module's byte order, widened to `u64`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length, or
    /// [`crate::Error::Malformed`] for a word size other than 4 or 8.
    pub fn read_pointer(&mut self) -> Result<u64> {
        match self.word_size {
            4 => Ok(u64::from(self.read::<u32>()?)),
            8 => self.read::<u64>(),
            other => Err(malformed_error!("Invalid word size - {}", other)),
        }
    }

    /// Read an unsigned LEB128 value from the current position and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the sequence is truncated.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        read_uleb128(|| read_le_at::<u8>(self.data, &mut self.position))
    }

    /// Read a signed LEB128 value from the current position and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the sequence is truncated.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        read_sleb128(|| read_le_at::<u8>(self.data, &mut self.position))
    }
}
