//! `.eh_frame_hdr` location and `.eh_frame` section scanning.
//!
//! The scanner walks the `.eh_frame` byte stream end to end exactly once per module,
//! classifying each length-prefixed record as a CIE or an FDE through its back-pointer
//! field, and accumulating the CIE table and FDE index that later address lookups run
//! against.
//!
//! # Architecture
//!
//! - [`crate::cfi::ehframe::EhFrameHdr`] - Decodes the small `.eh_frame_hdr` structure a
//!   `PT_GNU_EH_FRAME` segment points at, yielding the `.eh_frame` address. The binary
//!   search table that conventionally follows the header is ignored; a linear scan of the
//!   section replaces it.
//! - [`crate::cfi::ehframe::CallFrameInfo`] - The published scan result: an ordered
//!   offset-keyed CIE table ([`crossbeam_skiplist::SkipMap`]) and an append-only FDE index
//!   ([`boxcar::Vec`]). Built once, then shared read-only across threads.
//!
//! # Degradation Policy
//!
//! One bad record must not discard a module's entire unwind data. Every per-record decode
//! failure - a malformed CIE, an FDE naming an unknown parent, a memory fault inside a
//! record body - is logged and skipped, and scanning resumes at the next record boundary,
//! which is always computable from the length field alone. Only two conditions end a scan:
//! the zero-length terminator record (clean end of section) and a length field that cannot
//! be read at all. The extended 8-byte length marker (`0xFFFF_FFFF`) is unsupported and
//! fatal for the section: no real-world CFI record exceeds 4 GiB.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    cfi::{cie::Cie, encoding::PointerEncoding, fde::Fde, CieMap, CieRc, FdeList, FdeRc},
    memory::{MemoryCursor, MemorySource},
    Error, Result,
};

/// Marker value in the 4-byte length field denoting an extended 8-byte length.
const EXTENDED_LENGTH_MARKER: u32 = 0xFFFF_FFFF;

/// The decoded `.eh_frame_hdr` structure.
///
/// Only the fields needed to locate `.eh_frame` are retained.
#[derive(Debug, Clone, Copy)]
pub struct EhFrameHdr {
    /// Header format version, always 1
    pub version: u8,
    /// Resolved address of the `.eh_frame` section
    pub eh_frame_address: u64,
}

impl EhFrameHdr {
    /// Decode an `.eh_frame_hdr` structure at `address`.
    ///
    /// The layout is a 1-byte version (which must be 1), three one-byte pointer
    /// encodings, and one encoded pointer to `.eh_frame` read with the first of them.
    /// With the conventional `pcrel` application the pointer resolves against the
    /// address of the field itself, which the cursor records before decoding.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a version other than 1,
    /// [`crate::Error::UnsupportedEncoding`] if the pointer encoding is outside the
    /// supported set, and [`crate::Error::MemoryFault`] if the header is unreadable.
    pub fn parse(source: &dyn MemorySource, address: u64) -> Result<EhFrameHdr> {
        let mut cursor = MemoryCursor::new(source, address);

        let version = cursor.read::<u8>()?;
        if version != 1 {
            return Err(malformed_error!(
                "Unknown .eh_frame_hdr version - {}",
                version
            ));
        }

        let ptr_encoding = PointerEncoding::new(cursor.read::<u8>()?);
        let _count_encoding = cursor.read::<u8>()?;
        let _table_encoding = cursor.read::<u8>()?;

        ptr_encoding.validate()?;
        let eh_frame_address = ptr_encoding.read(&mut cursor)?;

        Ok(EhFrameHdr {
            version,
            eh_frame_address,
        })
    }
}

/// The scan result for one module: CIE table plus FDE index.
///
/// Built at most once per module and treated as an immutable published snapshot
/// afterwards; concurrent lookups require no synchronisation. Callers wanting to avoid
/// duplicate scans of the same module de-duplicate the build themselves (the result is
/// identical either way).
///
/// # Examples
///
/// ```rust,no_run
/// use cfiscope::{ByteOrder, cfi::CallFrameInfo, memory::SliceSource};
///
/// # let section: Vec<u8> = Vec::new();
/// let source = SliceSource::new(0x1000, &section, ByteOrder::LittleEndian, 8);
/// let cfi = CallFrameInfo::scan(&source, 0x1000)?;
/// println!("{} CIEs, {} FDEs", cfi.cie_count(), cfi.fde_count());
///
/// if let Some(fde) = cfi.fde_for_address(0x40_0123) {
///     println!("covered by FDE at 0x{:x}", fde.offset);
/// }
/// # Ok::<(), cfiscope::Error>(())
/// ```
pub struct CallFrameInfo {
    cies: CieMap,
    fdes: FdeList,
}

impl CallFrameInfo {
    /// Walk the `.eh_frame` stream starting at `eh_frame_address` and build the index.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedFeature`] on an extended-length record marker.
    /// Per-record decode failures are logged and skipped, not surfaced.
    pub fn scan(source: &dyn MemorySource, eh_frame_address: u64) -> Result<CallFrameInfo> {
        let cies = CieMap::new();
        let fdes = FdeList::new();

        let mut cursor = MemoryCursor::new(source, eh_frame_address);

        loop {
            let record_start = cursor.pos();

            let length = match cursor.read::<u32>() {
                Ok(length) => length,
                Err(err) => {
                    // The stream ran off the mapped region; everything scanned so
                    // far is still usable.
                    debug!(
                        offset = record_start,
                        error = %err,
                        "eh_frame scan stopped at unreadable length field"
                    );
                    break;
                }
            };

            if length == 0 {
                break;
            }

            if length == EXTENDED_LENGTH_MARKER {
                return Err(Error::UnsupportedFeature(format!(
                    "extended-length CFI record at 0x{record_start:x}"
                )));
            }

            let record_end = record_start + 4 + u64::from(length);

            match Self::scan_record(&mut cursor, &cies, record_start, record_end) {
                Ok(Some(fde)) => {
                    fdes.push(fde);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        offset = record_start,
                        error = %err,
                        "skipping undecodable CFI record"
                    );
                }
            }

            cursor.seek(record_end);
        }

        Ok(CallFrameInfo { cies, fdes })
    }

    /// Decode one record. A CIE is inserted into the table and yields `None`; an FDE
    /// with a resolvable parent yields `Some`.
    fn scan_record(
        cursor: &mut MemoryCursor<'_>,
        cies: &CieMap,
        record_start: u64,
        record_end: u64,
    ) -> Result<Option<FdeRc>> {
        let cie_pointer = cursor.read::<u32>()?;

        if cie_pointer == 0 {
            let cie = Cie::parse(cursor, record_start, record_end)?;
            cies.insert(record_start, Arc::new(cie));
            return Ok(None);
        }

        // The back-pointer is relative to the position immediately after the
        // length field, pointing at the parent CIE's own length field.
        let Some(cie_offset) = (record_start + 4).checked_sub(u64::from(cie_pointer)) else {
            return Err(Error::InvalidOffset);
        };

        let Some(entry) = cies.get(&cie_offset) else {
            debug!(
                offset = record_start,
                parent = cie_offset,
                "skipping FDE with unknown parent CIE"
            );
            return Ok(None);
        };

        let cie = entry.value().clone();
        let fde = Fde::parse(cursor, cie, record_start, record_end)?;
        Ok(Some(Arc::new(fde)))
    }

    /// Find the first FDE whose address range contains `address`.
    ///
    /// Linear scan in section order with early exit; entries whose base address cannot
    /// be resolved are treated as non-matches and skipped.
    #[must_use]
    pub fn fde_for_address(&self, address: u64) -> Option<FdeRc> {
        for (_, fde) in self.fdes.iter() {
            if fde.contains(address) {
                return Some(fde.clone());
            }
        }
        None
    }

    /// Look up a CIE by the stream offset of its length field.
    #[must_use]
    pub fn cie_at_offset(&self, offset: u64) -> Option<CieRc> {
        self.cies.get(&offset).map(|entry| entry.value().clone())
    }

    /// Iterate over all parsed CIEs in offset order.
    pub fn cies(&self) -> impl Iterator<Item = CieRc> + '_ {
        self.cies.iter().map(|entry| entry.value().clone())
    }

    /// Iterate over all parsed FDEs in section order.
    pub fn fdes(&self) -> impl Iterator<Item = FdeRc> + '_ {
        self.fdes.iter().map(|(_, fde)| fde.clone())
    }

    /// Number of CIEs in the table.
    #[must_use]
    pub fn cie_count(&self) -> usize {
        self.cies.len()
    }

    /// Number of FDEs in the index.
    #[must_use]
    pub fn fde_count(&self) -> usize {
        self.fdes.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::io::ByteOrder;
    use crate::memory::SliceSource;

    const SECTION_BASE: u64 = 0x3000;

    /// Frame a record body with its little-endian length field.
    fn record(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u32::try_from(body.len()).unwrap().to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    /// A minimal CIE: version 1, no augmentation, caf 1, daf -8, return register 16.
    fn simple_cie() -> Vec<u8> {
        record(&[
            0, 0, 0, 0, // CIE id
            1,    // version
            0,    // augmentation ""
            1,    // code alignment factor
            0x78, // data alignment factor -8
            16,   // return address register
            0, 0, 0, // nop padding
        ])
    }

    /// An FDE with absolute 8-byte pointers and the given back-pointer.
    fn simple_fde(cie_pointer: u32, pc_begin: u64, pc_range: u64, instr: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&cie_pointer.to_le_bytes());
        body.extend_from_slice(&pc_begin.to_le_bytes());
        body.extend_from_slice(&pc_range.to_le_bytes());
        body.extend_from_slice(instr);
        while (body.len() + 4) % 8 != 0 {
            body.push(0); // nop padding
        }
        record(&body)
    }

    fn scan(section: &[u8]) -> CallFrameInfo {
        let source = SliceSource::new(SECTION_BASE, section, ByteOrder::LittleEndian, 8);
        CallFrameInfo::scan(&source, SECTION_BASE).unwrap()
    }

    #[test]
    fn cie_then_fde() {
        let mut section = simple_cie();
        let fde_start = section.len() as u64;
        // Back-pointer from the field after the FDE's length to the CIE at offset 0
        section.extend_from_slice(&simple_fde(
            u32::try_from(fde_start + 4).unwrap(),
            0x40_0000,
            0x100,
            &[0x0C, 0x07, 0x10],
        ));
        section.extend_from_slice(&[0, 0, 0, 0]); // terminator

        let cfi = scan(&section);
        assert_eq!(cfi.cie_count(), 1);
        assert_eq!(cfi.fde_count(), 1);

        assert!(cfi.cie_at_offset(SECTION_BASE).is_some());

        let fde = cfi.fde_for_address(0x40_0080).unwrap();
        assert_eq!(fde.base_address().unwrap(), 0x40_0000);
        assert!(cfi.fde_for_address(0x40_0101).is_none());
    }

    #[test]
    fn zero_length_terminates_mid_section() {
        let mut section = simple_cie();
        section.extend_from_slice(&[0, 0, 0, 0]);
        // Garbage past the terminator must never be reached
        section.extend_from_slice(&[0xFF; 32]);

        let cfi = scan(&section);
        assert_eq!(cfi.cie_count(), 1);
        assert_eq!(cfi.fde_count(), 0);
    }

    #[test]
    fn missing_parent_cie_skips_record_and_continues() {
        let mut section = simple_cie();
        let orphan_start = section.len() as u64;
        // Back-pointer way past any known CIE
        section.extend_from_slice(&simple_fde(
            u32::try_from(orphan_start + 4 + 0x500).unwrap(),
            0x50_0000,
            0x10,
            &[],
        ));
        let fde_start = section.len() as u64;
        section.extend_from_slice(&simple_fde(
            u32::try_from(fde_start + 4).unwrap(),
            0x40_0000,
            0x100,
            &[],
        ));
        section.extend_from_slice(&[0, 0, 0, 0]);

        let cfi = scan(&section);
        assert_eq!(cfi.fde_count(), 1);
        assert!(cfi.fde_for_address(0x50_0000).is_none());
        assert!(cfi.fde_for_address(0x40_0000).is_some());
    }

    #[test]
    fn malformed_cie_skipped_scan_continues() {
        // First record: CIE with an invalid version
        let bad = record(&[0, 0, 0, 0, 9, 0, 1, 0x78, 16, 0, 0, 0]);
        let mut section = bad;
        section.extend_from_slice(&simple_cie());
        section.extend_from_slice(&[0, 0, 0, 0]);

        let cfi = scan(&section);
        assert_eq!(cfi.cie_count(), 1);
    }

    #[test]
    fn extended_length_is_fatal_for_section() {
        let mut section = Vec::new();
        section.extend_from_slice(&0xFFFF_FFFF_u32.to_le_bytes());
        section.extend_from_slice(&[0; 16]);

        let source = SliceSource::new(SECTION_BASE, &section, ByteOrder::LittleEndian, 8);
        let result = CallFrameInfo::scan(&source, SECTION_BASE);
        assert!(matches!(result, Err(Error::UnsupportedFeature(_))));
    }

    #[test]
    fn unreadable_length_ends_scan_with_partial_index() {
        // Section ends exactly after one complete CIE; no terminator
        let section = simple_cie();
        let cfi = scan(&section);
        assert_eq!(cfi.cie_count(), 1);
    }

    #[test]
    fn eh_frame_hdr_pcrel_pointer() {
        // version 1, ptr encoding pcrel|sdata4, count/table encodings ignored,
        // pointer field at +4 pointing 0x100 past itself
        let mut hdr = vec![1, 0x1B, 0x03, 0x3B];
        hdr.extend_from_slice(&0x100_i32.to_le_bytes());

        let source = SliceSource::new(0x5000, &hdr, ByteOrder::LittleEndian, 8);
        let parsed = EhFrameHdr::parse(&source, 0x5000).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.eh_frame_address, 0x5000 + 4 + 0x100);
    }

    #[test]
    fn eh_frame_hdr_bad_version() {
        let hdr = [2, 0x1B, 0x03, 0x3B, 0, 0, 0, 0];
        let source = SliceSource::new(0x5000, &hdr, ByteOrder::LittleEndian, 8);
        assert!(matches!(
            EhFrameHdr::parse(&source, 0x5000),
            Err(Error::Malformed { .. })
        ));
    }
}
