//! Random-access byte sources over a target address space.
//!
//! The CFI engine never owns the memory it decodes: a crashed process image, a core file or
//! an ELF module on disk all look the same to it - a sparse, read-only address space with a
//! byte order and a pointer width. This module defines that boundary.
//!
//! # Architecture
//!
//! - [`crate::memory::MemorySource`] - The collaborator trait: positioned reads of raw bytes
//!   and pointer-width values, plus the layout (byte order, word size) of the owning process.
//!   Unreadable addresses surface as the distinguishable [`crate::Error::MemoryFault`] so
//!   callers can recover per register or per record instead of aborting a whole scan.
//! - [`crate::memory::MemoryCursor`] - A sequential reader positioned at absolute addresses,
//!   used wherever the DWARF encoding is position-dependent (pc-relative pointer fields,
//!   record padding to word boundaries).
//! - [`crate::memory::SliceSource`] - A contiguous in-memory region mapped at a base address.
//!   Backs file-offset address spaces ([`crate::ElfModule`]) and synthetic images in tests.
//!
//! # Usage Examples
//!
//! ```rust
//! use cfiscope::{ByteOrder, memory::{MemorySource, SliceSource}};
//!
//! let data = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80];
//! let source = SliceSource::new(0x1000, &data, ByteOrder::LittleEndian, 8);
//!
//! assert_eq!(source.read_pointer(0x1000)?, 0x8070_6050_4030_2010);
//! assert!(source.read_pointer(0x2000).is_err()); // memory fault, not a panic
//! # Ok::<(), cfiscope::Error>(())
//! ```
//!
//! # Thread Safety
//!
//! [`MemorySource`] requires `Sync`: once a module's CFI index is built it is shared
//! read-only across threads, and each unwinding thread reads saved register values through
//! the same source.

use crate::{
    file::io::{read_sleb128, read_uleb128, ByteOrder, DwarfIO},
    Error, Result,
};

/// A random-access byte source over a target virtual address space.
///
/// Implementations supply positioned reads in the byte order of the *inspected* process.
/// A read that cannot be satisfied (unmapped page, truncated dump, hole in a core file)
/// must report [`crate::Error::MemoryFault`] with the faulting address rather than any
/// unrecoverable condition - the engine treats memory faults as partial data, not as
/// corruption.
pub trait MemorySource: Sync {
    /// Fill `buf` with bytes starting at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if any byte in the range is unreadable.
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Byte order of the owning process.
    fn byte_order(&self) -> ByteOrder;

    /// Pointer width of the owning process in bytes, 4 or 8.
    fn word_size(&self) -> u8;

    /// Read a pointer-width value at `address`, widened to `u64`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the range is unreadable, or
    /// [`crate::Error::Malformed`] for a word size other than 4 or 8.
    fn read_pointer(&self, address: u64) -> Result<u64> {
        match self.word_size() {
            4 => {
                let mut buf = [0_u8; 4];
                self.read_bytes(address, &mut buf)?;
                Ok(u64::from(match self.byte_order() {
                    ByteOrder::LittleEndian => u32::from_le_bytes(buf),
                    ByteOrder::BigEndian => u32::from_be_bytes(buf),
                }))
            }
            8 => {
                let mut buf = [0_u8; 8];
                self.read_bytes(address, &mut buf)?;
                Ok(match self.byte_order() {
                    ByteOrder::LittleEndian => u64::from_le_bytes(buf),
                    ByteOrder::BigEndian => u64::from_be_bytes(buf),
                })
            }
            other => Err(malformed_error!("Invalid word size - {}", other)),
        }
    }
}

/// A contiguous byte region mapped at a fixed base address.
///
/// The simplest possible [`MemorySource`]: everything inside `[base, base + len)` is
/// readable, everything outside faults. Used for file-offset address spaces and for
/// synthetic process images in tests.
pub struct SliceSource<'a> {
    base: u64,
    data: &'a [u8],
    byte_order: ByteOrder,
    word_size: u8,
}

impl<'a> SliceSource<'a> {
    /// Create a source exposing `data` at addresses starting from `base`.
    ///
    /// # Arguments
    /// * `base` - Address of the first byte of `data`
    /// * `data` - The mapped bytes
    /// * `byte_order` - Byte order of the owning process
    /// * `word_size` - Pointer width of the owning process (4 or 8)
    #[must_use]
    pub fn new(base: u64, data: &'a [u8], byte_order: ByteOrder, word_size: u8) -> Self {
        SliceSource {
            base,
            data,
            byte_order,
            word_size,
        }
    }

    /// Address of the first mapped byte.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Number of mapped bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl MemorySource for SliceSource<'_> {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let Some(offset) = address.checked_sub(self.base) else {
            return Err(Error::MemoryFault { address });
        };

        let Ok(offset) = usize::try_from(offset) else {
            return Err(Error::MemoryFault { address });
        };

        let Some(end) = offset.checked_add(buf.len()) else {
            return Err(Error::MemoryFault { address });
        };

        if end > self.data.len() {
            return Err(Error::MemoryFault { address });
        }

        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn word_size(&self) -> u8 {
        self.word_size
    }
}

/// A sequential reader positioned at absolute addresses in a [`MemorySource`].
///
/// Record scanning has to track where in the stream each field sits: pc-relative pointer
/// encodings resolve against the address of the field itself, and records pad to the
/// pointer-width boundary of their absolute position. `MemoryCursor` keeps that position
/// explicit while delegating the actual byte access to the source.
///
/// # Examples
///
/// ```rust
/// use cfiscope::{ByteOrder, memory::{MemoryCursor, SliceSource}};
///
/// let data = [0x03, 0x80, 0x02];
/// let source = SliceSource::new(0x400, &data, ByteOrder::LittleEndian, 8);
/// let mut cursor = MemoryCursor::new(&source, 0x400);
///
/// assert_eq!(cursor.read::<u8>()?, 0x03);
/// assert_eq!(cursor.read_uleb128()?, 256);
/// assert_eq!(cursor.pos(), 0x403);
/// # Ok::<(), cfiscope::Error>(())
/// ```
pub struct MemoryCursor<'a> {
    source: &'a dyn MemorySource,
    position: u64,
}

impl<'a> MemoryCursor<'a> {
    /// Create a cursor over `source` positioned at `address`.
    #[must_use]
    pub fn new(source: &'a dyn MemorySource, address: u64) -> Self {
        MemoryCursor {
            source,
            position: address,
        }
    }

    /// Current absolute address of the cursor.
    #[must_use]
    pub fn pos(&self) -> u64 {
        self.position
    }

    /// Reposition the cursor to an absolute address.
    pub fn seek(&mut self, address: u64) {
        self.position = address;
    }

    /// Advance the cursor by `count` bytes without reading them.
    pub fn skip(&mut self, count: u64) {
        self.position = self.position.wrapping_add(count);
    }

    /// Byte order of the underlying source.
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.source.byte_order()
    }

    /// Pointer width of the underlying source in bytes.
    #[must_use]
    pub fn word_size(&self) -> u8 {
        self.source.word_size()
    }

    /// Read a value of type `T` at the current address in the source's byte order.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the range is unreadable.
    pub fn read<T: DwarfIO>(&mut self) -> Result<T>
    where
        T::Bytes: Default + AsMut<[u8]>,
    {
        let mut raw = T::Bytes::default();
        self.source.read_bytes(self.position, raw.as_mut())?;
        self.position += raw.as_mut().len() as u64;

        Ok(match self.source.byte_order() {
            ByteOrder::LittleEndian => T::from_le_bytes(raw),
            ByteOrder::BigEndian => T::from_be_bytes(raw),
        })
    }

    /// Read a pointer-width value at the current address, widened to `u64`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the range is unreadable.
    pub fn read_pointer(&mut self) -> Result<u64> {
        let value = self.source.read_pointer(self.position)?;
        self.position += u64::from(self.source.word_size());
        Ok(value)
    }

    /// Read `count` bytes starting at the current address.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the range is unreadable.
    pub fn read_vec(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; count];
        self.source.read_bytes(self.position, &mut buf)?;
        self.position += count as u64;
        Ok(buf)
    }

    /// Read an unsigned LEB128 value at the current address.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the sequence runs into unreadable memory.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        read_uleb128(|| self.read::<u8>())
    }

    /// Read a signed LEB128 value at the current address.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryFault`] if the sequence runs into unreadable memory.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        read_sleb128(|| self.read::<u8>())
    }

    /// Advance the cursor to the next multiple of `alignment` bytes.
    ///
    /// Record parsing leaves the stream on a pointer-width boundary; the padding bytes
    /// themselves are never inspected.
    pub fn align(&mut self, alignment: u64) {
        let rem = self.position % alignment;
        if rem != 0 {
            self.position += alignment - rem;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source_bounds() {
        let data = [0xAA_u8; 16];
        let source = SliceSource::new(0x1000, &data, ByteOrder::LittleEndian, 8);

        let mut buf = [0_u8; 8];
        source.read_bytes(0x1000, &mut buf).unwrap();
        source.read_bytes(0x1008, &mut buf).unwrap();

        assert!(matches!(
            source.read_bytes(0x0FFF, &mut buf),
            Err(Error::MemoryFault { address: 0x0FFF })
        ));
        assert!(matches!(
            source.read_bytes(0x1009, &mut buf),
            Err(Error::MemoryFault { address: 0x1009 })
        ));
    }

    #[test]
    fn pointer_reads_follow_layout() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let le = SliceSource::new(0, &data, ByteOrder::LittleEndian, 4);
        let be = SliceSource::new(0, &data, ByteOrder::BigEndian, 4);

        assert_eq!(le.read_pointer(0).unwrap(), 0x0403_0201);
        assert_eq!(be.read_pointer(0).unwrap(), 0x0102_0304);
    }

    #[test]
    fn cursor_tracks_absolute_positions() {
        let data = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        let source = SliceSource::new(0x2000, &data, ByteOrder::LittleEndian, 4);
        let mut cursor = MemoryCursor::new(&source, 0x2000);

        assert_eq!(cursor.read::<u16>().unwrap(), 0x2211);
        assert_eq!(cursor.pos(), 0x2002);
        assert_eq!(cursor.read_pointer().unwrap(), 0x6655_4433);
        assert_eq!(cursor.pos(), 0x2006);

        cursor.align(8);
        assert_eq!(cursor.pos(), 0x2008);
        cursor.align(8); // already aligned, no movement
        assert_eq!(cursor.pos(), 0x2008);
    }

    #[test]
    fn cursor_leb128() {
        let data = [0xE5, 0x8E, 0x26, 0x78];
        let source = SliceSource::new(0x100, &data, ByteOrder::LittleEndian, 8);
        let mut cursor = MemoryCursor::new(&source, 0x100);

        assert_eq!(cursor.read_uleb128().unwrap(), 624_485);
        assert_eq!(cursor.read_sleb128().unwrap(), -8);
        assert!(cursor.read_uleb128().is_err());
    }
}
