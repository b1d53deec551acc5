//! `DW_EH_PE` encoded-pointer decoding.
//!
//! Pointer fields in `.eh_frame` and `.eh_frame_hdr` are not stored as plain machine words:
//! a one-byte encoding describes both the *format* of the raw value (fixed width, LEB128,
//! signed or unsigned) and the *application* that turns the raw value into an address
//! (absolute, or relative to the position of the field itself). This module decodes that
//! byte and reads values accordingly.
//!
//! # Key Components
//!
//! - [`crate::cfi::encoding::PointerEncoding`] - The one-byte encoding, split into nibbles
//! - [`crate::cfi::encoding::EncodingFormat`] - Constants for the low (format) nibble
//! - [`crate::cfi::encoding::EncodingApplication`] - Constants for the high (application)
//!   nibble
//!
//! Raw reading and application are deliberately separate operations: an FDE stores the raw
//! `pc_begin` value together with the address of the field it was read from, and re-resolves
//! the base address on demand.
//!
//! # Supported Encodings
//!
//! Formats: `absptr`, `uleb128`, `udata2/4/8`, `sleb128`, `sdata2/4/8`. Applications:
//! `absptr` (literal) and `pcrel` (relative to the field position). Everything else -
//! `textrel`, `datarel`, `funcrel`, `aligned`, the `indirect` bit - fails with
//! [`crate::Error::UnsupportedEncoding`] rather than silently misreading, and the special
//! byte `0xFF` (`omit`) means the field is absent and must never be dereferenced.

use crate::{memory::MemoryCursor, Error, Result};

/// Constants for the format nibble (`encoding & 0x0F`) of a `DW_EH_PE` encoding.
#[allow(non_snake_case)]
pub mod EncodingFormat {
    /// Pointer-width value in the module's byte order
    pub const ABSPTR: u8 = 0x00;
    /// Unsigned LEB128
    pub const ULEB128: u8 = 0x01;
    /// Unsigned 2-byte value
    pub const UDATA2: u8 = 0x02;
    /// Unsigned 4-byte value
    pub const UDATA4: u8 = 0x03;
    /// Unsigned 8-byte value
    pub const UDATA8: u8 = 0x04;
    /// Signed LEB128
    pub const SLEB128: u8 = 0x09;
    /// Signed 2-byte value
    pub const SDATA2: u8 = 0x0A;
    /// Signed 4-byte value
    pub const SDATA4: u8 = 0x0B;
    /// Signed 8-byte value
    pub const SDATA8: u8 = 0x0C;
}

/// Constants for the application nibble (`encoding & 0xF0`) of a `DW_EH_PE` encoding.
#[allow(non_snake_case)]
pub mod EncodingApplication {
    /// The raw value is the address
    pub const ABSPTR: u8 = 0x00;
    /// The raw value is relative to the address of the encoded field itself
    pub const PCREL: u8 = 0x10;
    /// Relative to the text section (unsupported)
    pub const TEXTREL: u8 = 0x20;
    /// Relative to the data section (unsupported)
    pub const DATAREL: u8 = 0x30;
    /// Relative to the function start (unsupported)
    pub const FUNCREL: u8 = 0x40;
    /// Aligned to the pointer width (unsupported)
    pub const ALIGNED: u8 = 0x50;
    /// The computed address holds the real value (unsupported)
    pub const INDIRECT: u8 = 0x80;
}

/// The value of a `DW_EH_PE` encoding byte denoting an absent field.
pub const DW_EH_PE_OMIT: u8 = 0xFF;

/// A one-byte `DW_EH_PE` pointer encoding.
///
/// Wraps the raw byte and exposes the format and application nibbles. The default value
/// (used when a CIE's augmentation carries no `'R'` entry) is an absolute pointer-width
/// read: `format = absptr`, `application = absptr`.
///
/// # Examples
///
/// ```rust
/// use cfiscope::cfi::{PointerEncoding, EncodingFormat, EncodingApplication};
///
/// let enc = PointerEncoding::new(0x1B); // pcrel | sdata4
/// assert_eq!(enc.format(), EncodingFormat::SDATA4);
/// assert_eq!(enc.application(), EncodingApplication::PCREL);
/// assert!(enc.validate().is_ok());
///
/// let textrel = PointerEncoding::new(0x20);
/// assert!(textrel.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEncoding(u8);

impl Default for PointerEncoding {
    fn default() -> Self {
        PointerEncoding(EncodingFormat::ABSPTR | EncodingApplication::ABSPTR)
    }
}

impl PointerEncoding {
    /// Wrap a raw encoding byte.
    #[must_use]
    pub fn new(byte: u8) -> Self {
        PointerEncoding(byte)
    }

    /// The raw encoding byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        self.0
    }

    /// Returns `true` for the `omit` encoding (`0xFF`) - the field is absent.
    #[must_use]
    pub fn is_omit(self) -> bool {
        self.0 == DW_EH_PE_OMIT
    }

    /// The format nibble, one of the [`EncodingFormat`] constants.
    #[must_use]
    pub fn format(self) -> u8 {
        self.0 & 0x0F
    }

    /// The application nibble, one of the [`EncodingApplication`] constants.
    #[must_use]
    pub fn application(self) -> u8 {
        self.0 & 0xF0
    }

    /// Check that this engine can decode the encoding.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] for any format or application nibble
    /// outside the supported set, including the `indirect` bit. `omit` is rejected too:
    /// callers are expected to test [`PointerEncoding::is_omit`] before reading.
    pub fn validate(self) -> Result<()> {
        if self.is_omit() {
            return Err(Error::UnsupportedEncoding(self.0));
        }

        match self.format() {
            EncodingFormat::ABSPTR
            | EncodingFormat::ULEB128
            | EncodingFormat::UDATA2
            | EncodingFormat::UDATA4
            | EncodingFormat::UDATA8
            | EncodingFormat::SLEB128
            | EncodingFormat::SDATA2
            | EncodingFormat::SDATA4
            | EncodingFormat::SDATA8 => {}
            _ => return Err(Error::UnsupportedEncoding(self.0)),
        }

        match self.application() {
            EncodingApplication::ABSPTR | EncodingApplication::PCREL => Ok(()),
            _ => Err(Error::UnsupportedEncoding(self.0)),
        }
    }

    /// Read the raw value in this encoding's format, without applying the application.
    ///
    /// Signed formats are sign-extended into the two's-complement `u64` result, so a later
    /// wrapping add against a base address produces the right address for negative values.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] for an unsupported format, or a
    /// [`crate::Error::MemoryFault`] from the underlying source.
    #[allow(clippy::cast_sign_loss)]
    pub fn read_value(self, cursor: &mut MemoryCursor<'_>) -> Result<u64> {
        match self.format() {
            EncodingFormat::ABSPTR => cursor.read_pointer(),
            EncodingFormat::ULEB128 => cursor.read_uleb128(),
            EncodingFormat::UDATA2 => Ok(u64::from(cursor.read::<u16>()?)),
            EncodingFormat::UDATA4 => Ok(u64::from(cursor.read::<u32>()?)),
            EncodingFormat::UDATA8 => cursor.read::<u64>(),
            EncodingFormat::SLEB128 => Ok(cursor.read_sleb128()? as u64),
            EncodingFormat::SDATA2 => Ok(i64::from(cursor.read::<i16>()?) as u64),
            EncodingFormat::SDATA4 => Ok(i64::from(cursor.read::<i32>()?) as u64),
            EncodingFormat::SDATA8 => Ok(cursor.read::<i64>()? as u64),
            _ => Err(Error::UnsupportedEncoding(self.0)),
        }
    }

    /// Turn a raw value into an address, given the address of the field it was read from.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] for any application other than
    /// `absptr` or `pcrel`.
    pub fn apply(self, raw: u64, field_address: u64) -> Result<u64> {
        match self.application() {
            EncodingApplication::ABSPTR => Ok(raw),
            EncodingApplication::PCREL => Ok(field_address.wrapping_add(raw)),
            _ => Err(Error::UnsupportedEncoding(self.0)),
        }
    }

    /// Read an encoded pointer at the cursor and resolve it to an address.
    ///
    /// The field position used by the `pcrel` application is the cursor position *before*
    /// the raw value is decoded.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] for unsupported encodings, or a
    /// [`crate::Error::MemoryFault`] from the underlying source.
    pub fn read(self, cursor: &mut MemoryCursor<'_>) -> Result<u64> {
        let field_address = cursor.pos();
        let raw = self.read_value(cursor)?;
        self.apply(raw, field_address)
    }
}
