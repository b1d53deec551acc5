//! Low-level byte order and safe reading utilities for DWARF CFI parsing.
//!
//! This module provides endian-aware binary data reading functionality for decoding
//! `.eh_frame` / `.eh_frame_hdr` sections and call frame instruction streams. It implements
//! safe, bounds-checked operations for reading primitive types from byte buffers with both
//! little-endian and big-endian support, plus the variable-length LEB128 integer codec that
//! DWARF uses for most operands.
//!
//! # Architecture
//!
//! The module is built around the [`crate::file::io::DwarfIO`] trait which provides a unified
//! interface for reading binary data in a type-safe manner:
//!
//! - Generic trait-based reading for all primitive integer types
//! - Automatic bounds checking to prevent buffer overruns
//! - Byte order selected dynamically through [`crate::file::io::ByteOrder`] (the order is a
//!   property of the *module being inspected*, not of the host)
//! - Consistent error handling through the [`crate::Result`] type
//!
//! # Key Components
//!
//! - [`crate::file::io::DwarfIO`] - Trait defining endian-aware reading for primitive types
//! - [`crate::file::io::ByteOrder`] - Byte order of the inspected module
//! - [`crate::file::io::read_le_at`] / [`crate::file::io::read_be_at`] - Positioned reads
//!   with auto-advance
//! - [`crate::file::io::read_at`] - Positioned read dispatching on a [`ByteOrder`] value
//! - [`crate::file::io::read_uleb128`] / [`crate::file::io::read_sleb128`] - The DWARF
//!   variable-length integer codec, shared by every cursor in the crate
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use cfiscope::file::io::{read_at, ByteOrder};
//!
//! let data = [0x00, 0x00, 0x00, 0x01];
//! let mut offset = 0;
//! let value: u32 = read_at(&data, &mut offset, ByteOrder::BigEndian)?;
//! assert_eq!(value, 1);
//! # Ok::<(), cfiscope::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All reading functions return [`crate::Result<T>`] and will return
//! [`crate::Error::OutOfBounds`] if there are insufficient bytes in the buffer to complete
//! the operation. A LEB128 sequence that ends mid-stream reports the same error: a truncated
//! operand is indistinguishable from a truncated buffer at this level.

use crate::{Error::OutOfBounds, Result};

/// Byte order of the module whose CFI is being decoded.
///
/// Every multi-byte read in a CIE, FDE or instruction stream is governed by the byte order
/// of the owning module, which is discovered from the ELF identification bytes and carried
/// alongside the data. The host byte order is irrelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first
    LittleEndian,
    /// Most significant byte first
    BigEndian,
}

/// Trait for implementing type-specific safe binary data reading operations.
///
/// This trait provides a unified interface for reading primitive types from byte slices
/// in a safe and endian-aware manner. It abstracts over the conversion from byte arrays
/// to typed values, supporting both little-endian and big-endian formats.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g. `[u8; 4]` for `u32`). The trait
/// methods then convert these byte arrays to the target type using the appropriate
/// endianness conversion.
pub trait DwarfIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    ///
    /// This type must be convertible from a byte slice and is used for reading
    /// binary data in both little-endian and big-endian formats.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_dwarf_io {
    ($($t:ty => $len:expr),* $(,)?) => {
        $(
            impl DwarfIO for $t {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_dwarf_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (advanced after reading)
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: DwarfIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Safely reads a value of type `T` in big-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (advanced after reading)
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: DwarfIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_be_bytes(read))
}

/// Safely reads a value of type `T` at a specific offset, dispatching on a [`ByteOrder`].
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (advanced after reading)
/// * `byte_order` - Byte order of the module the buffer came from
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_at<T: DwarfIO>(data: &[u8], offset: &mut usize, byte_order: ByteOrder) -> Result<T> {
    match byte_order {
        ByteOrder::LittleEndian => read_le_at(data, offset),
        ByteOrder::BigEndian => read_be_at(data, offset),
    }
}

/// Read an unsigned LEB128 value from a byte producer.
///
/// Bytes are consumed while their high bit is set, accumulating `(byte & 0x7f) << shift`
/// with the shift growing by 7 per byte. Values are assumed to fit in 64 bits; no overflow
/// checking beyond that is performed.
///
/// The producer abstraction lets the slice-backed [`crate::Parser`] and the address-space
/// [`crate::memory::MemoryCursor`] share one decoder.
///
/// # Errors
///
/// Propagates the producer's error if the stream ends mid-sequence, and returns
/// [`crate::Error::Malformed`] if the sequence runs past 64 bits.
pub fn read_uleb128<F>(mut next_byte: F) -> Result<u64>
where
    F: FnMut() -> Result<u8>,
{
    let mut value = 0_u64;
    let mut shift = 0_u32;

    loop {
        let byte = next_byte()?;
        if shift >= 64 {
            return Err(malformed_error!("ULEB128 sequence exceeds 64 bits"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Read a signed LEB128 value from a byte producer.
///
/// Identical accumulation loop to [`read_uleb128`], but after the terminating byte, if
/// its bit 6 is set the result is sign-extended from the current shift position.
///
/// # Errors
///
/// Propagates the producer's error if the stream ends mid-sequence, and returns
/// [`crate::Error::Malformed`] if the sequence runs past 64 bits.
pub fn read_sleb128<F>(mut next_byte: F) -> Result<i64>
where
    F: FnMut() -> Result<u8>,
{
    let mut value = 0_i64;
    let mut shift = 0_u32;

    loop {
        let byte = next_byte()?;
        if shift >= 64 {
            return Err(malformed_error!("SLEB128 sequence exceeds 64 bits"));
        }
        value |= i64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1_i64 << shift;
            }
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_uleb128(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                return out;
            }
        }
    }

    fn encode_sleb128(mut value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn decode_uleb128(data: &[u8]) -> Result<u64> {
        let mut offset = 0;
        read_uleb128(|| read_le_at::<u8>(data, &mut offset))
    }

    fn decode_sleb128(data: &[u8]) -> Result<i64> {
        let mut offset = 0;
        read_sleb128(|| read_le_at::<u8>(data, &mut offset))
    }

    #[test]
    fn uleb128_known_encodings() {
        assert_eq!(decode_uleb128(&[0x00]).unwrap(), 0);
        assert_eq!(decode_uleb128(&[0x7F]).unwrap(), 127);
        assert_eq!(decode_uleb128(&[0x80, 0x01]).unwrap(), 128);
        assert_eq!(decode_uleb128(&[0xE5, 0x8E, 0x26]).unwrap(), 624_485);
    }

    #[test]
    fn sleb128_known_encodings() {
        assert_eq!(decode_sleb128(&[0x00]).unwrap(), 0);
        assert_eq!(decode_sleb128(&[0x02]).unwrap(), 2);
        assert_eq!(decode_sleb128(&[0x7E]).unwrap(), -2);
        assert_eq!(decode_sleb128(&[0x78]).unwrap(), -8);
        assert_eq!(decode_sleb128(&[0xFF, 0x00]).unwrap(), 127);
        assert_eq!(decode_sleb128(&[0x81, 0x7F]).unwrap(), -127);
        assert_eq!(decode_sleb128(&[0x80, 0x7F]).unwrap(), -128);
    }

    #[test]
    fn uleb128_round_trip() {
        let mut samples = vec![0_u64, 1, 2, 63, 64, 127, 128, 129, 16383, 16384];
        let mut v = 1_u64;
        while v < 1 << 62 {
            samples.push(v - 1);
            samples.push(v);
            samples.push(v + 1);
            v <<= 7;
        }

        for value in samples {
            let encoded = encode_uleb128(value);
            assert_eq!(decode_uleb128(&encoded).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn sleb128_round_trip() {
        let mut samples = vec![0_i64, 1, -1, 2, -2, 63, -63, 64, -64, 65, -65, 127, -128];
        for shift in (0..63).step_by(7) {
            let v = 1_i64 << shift;
            samples.push(v);
            samples.push(-v);
            samples.push(v - 1);
            samples.push(-(v - 1));
        }
        samples.push(i64::MAX);
        samples.push(i64::MIN);

        for value in samples {
            let encoded = encode_sleb128(value);
            assert_eq!(decode_sleb128(&encoded).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn leb128_truncated() {
        // High bit set on the final byte means the sequence continues
        assert!(decode_uleb128(&[0x80]).is_err());
        assert!(decode_sleb128(&[0xFF, 0x80]).is_err());
    }

    #[test]
    fn endian_reads() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut offset = 0;
        let le: u32 = read_le_at(&data, &mut offset).unwrap();
        assert_eq!(le, 0x0403_0201);

        let mut offset = 0;
        let be: u32 = read_be_at(&data, &mut offset).unwrap();
        assert_eq!(be, 0x0102_0304);

        let mut offset = 0;
        let dispatched: u16 = read_at(&data, &mut offset, ByteOrder::BigEndian).unwrap();
        assert_eq!(dispatched, 0x0102);
        assert_eq!(offset, 2);
    }

    #[test]
    fn out_of_bounds() {
        let data = [0x01, 0x02];
        let mut offset = 0;
        assert!(read_le_at::<u32>(&data, &mut offset).is_err());
        let mut offset = 1;
        assert!(read_be_at::<u16>(&data, &mut offset).is_err());
    }
}
