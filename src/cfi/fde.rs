//! Frame Description Entry (FDE) decoding.
//!
//! An FDE covers one contiguous range of machine code and carries the call frame
//! instructions specific to it. Every FDE names a parent [`crate::cfi::Cie`] whose
//! defaults (alignment factors, pointer encoding, initial instructions) govern its
//! decoding; construction fails outright when the parent cannot be resolved.
//!
//! `pc_begin` is stored raw alongside the stream position of the field it was read
//! from: with the `pcrel` application the *field position* is the base the value is
//! relative to, so resolution has to be repeatable after parsing.

use std::sync::Arc;

use crate::{
    cfi::{cie::Cie, encoding::EncodingApplication},
    memory::MemoryCursor,
    Result,
};

/// A Frame Description Entry, immutable once parsed.
///
/// Held in the append-only FDE index for the lifetime of the module's CFI data.
/// Address containment is inclusive at both ends: `base_address() <= addr <=
/// base_address() + pc_range`.
#[derive(Debug, Clone)]
pub struct Fde {
    /// The parent CIE; exactly one, resolved at parse time
    pub cie: Arc<Cie>,
    /// Stream offset of the record's length field
    pub offset: u64,
    /// Raw `pc_begin` value, before the pointer-encoding application is applied
    pub pc_begin: u64,
    /// Stream position the `pc_begin` field was read from, the `pcrel` base
    pub pc_begin_field: u64,
    /// Number of code bytes covered by this entry
    pub pc_range: u64,
    /// Raw call frame instruction bytes specific to this function
    pub instructions: Vec<u8>,
}

impl Fde {
    /// Parse one FDE record body.
    ///
    /// The cursor must be positioned immediately after the record header (the 4-byte
    /// length and the 4-byte CIE pointer), i.e. at `record_start + 8` - which is also
    /// the field position `pcrel` address resolution is relative to. On success the
    /// cursor is left on the next pointer-width boundary at or past `record_end`.
    ///
    /// # Arguments
    /// * `cursor` - Cursor over the module's address space, positioned at the body
    /// * `cie` - The resolved parent CIE
    /// * `record_start` - Stream offset of the record's length field
    /// * `record_end` - Stream offset one past the last byte covered by the length field
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] if the parent's FDE pointer
    /// encoding cannot be decoded, [`crate::Error::Malformed`] for an instruction
    /// block with negative length, and [`crate::Error::MemoryFault`] if the record
    /// is unreadable.
    pub(crate) fn parse(
        cursor: &mut MemoryCursor<'_>,
        cie: Arc<Cie>,
        record_start: u64,
        record_end: u64,
    ) -> Result<Fde> {
        let encoding = cie.fde_pointer_encoding;

        let pc_begin_field = cursor.pos();
        let pc_begin = encoding.read_value(cursor)?;
        let pc_range = encoding.read_value(cursor)?;

        // FDE-specific augmentation data (the LSDA pointer, if any) is skipped as an
        // opaque blob; the LSDA is not resolved by this engine.
        if cie.augmentation.starts_with('z') {
            let augmentation_length = cursor.read_uleb128()?;
            cursor.skip(augmentation_length);
        }

        let Some(instructions_length) = record_end.checked_sub(cursor.pos()) else {
            return Err(malformed_error!(
                "FDE at 0x{:x} has negative instruction block length",
                record_start
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        let instructions = cursor.read_vec(instructions_length as usize)?;

        cursor.align(u64::from(cie.word_size));

        Ok(Fde {
            cie,
            offset: record_start,
            pc_begin,
            pc_begin_field,
            pc_range,
            instructions,
        })
    }

    /// The first instruction address covered by this entry.
    ///
    /// Resolves the raw `pc_begin` through the parent CIE's pointer-encoding
    /// application: literal for `absptr`, relative to the stored field position for
    /// `pcrel`.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedEncoding`] for any other application nibble.
    pub fn base_address(&self) -> Result<u64> {
        let application = self.cie.fde_pointer_encoding.application();
        match application {
            EncodingApplication::ABSPTR => Ok(self.pc_begin),
            EncodingApplication::PCREL => Ok(self.pc_begin_field.wrapping_add(self.pc_begin)),
            _ => Err(crate::Error::UnsupportedEncoding(
                self.cie.fde_pointer_encoding.byte(),
            )),
        }
    }

    /// Whether `address` falls inside the range covered by this entry.
    ///
    /// Inclusive at both ends. An entry whose base address cannot be resolved
    /// contains nothing - lookup treats it as a non-match rather than an error.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        match self.base_address() {
            Ok(base) => address >= base && address <= base.wrapping_add(self.pc_range),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cfi::encoding::PointerEncoding,
        file::io::ByteOrder,
        memory::SliceSource,
    };

    const BASE: u64 = 0x2000;

    fn test_cie(fde_encoding: u8, augmentation: &str) -> Arc<Cie> {
        Arc::new(Cie {
            offset: 0,
            version: 1,
            augmentation: augmentation.to_string(),
            code_alignment_factor: 1,
            data_alignment_factor: -8,
            return_address_register: 16,
            fde_pointer_encoding: PointerEncoding::new(fde_encoding),
            personality_routine: None,
            personality_encoding: None,
            lsda_pointer_encoding: None,
            signal_handler_frame: false,
            initial_instructions: Vec::new(),
            byte_order: ByteOrder::LittleEndian,
            word_size: 8,
        })
    }

    fn parse(body: &[u8], cie: Arc<Cie>) -> Result<Fde> {
        let mut record = vec![0_u8; 8];
        record.extend_from_slice(body);

        let data = record;
        let source = SliceSource::new(BASE, &data, ByteOrder::LittleEndian, 8);
        let mut cursor = MemoryCursor::new(&source, BASE + 8);
        Fde::parse(&mut cursor, cie, BASE, BASE + data.len() as u64)
    }

    #[test]
    fn absolute_pointer_encoding() {
        let fde = parse(
            &[
                0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_begin 0x400000
                0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_range 0x100
                0x0C, 0x07, 0x10, // def_cfa(7, 16)
            ],
            test_cie(0x00, ""),
        )
        .unwrap();

        assert_eq!(fde.base_address().unwrap(), 0x40_0000);
        assert_eq!(fde.pc_range, 0x100);
        assert_eq!(fde.instructions, vec![0x0C, 0x07, 0x10]);
    }

    #[test]
    fn pcrel_base_resolves_against_field_position() {
        // pc_begin field sits at BASE + 8; raw value 0x1000 -> base BASE + 8 + 0x1000
        let fde = parse(
            &[
                0x00, 0x10, 0x00, 0x00, // pc_begin (sdata4) 0x1000
                0x80, 0x00, 0x00, 0x00, // pc_range 0x80
            ],
            test_cie(0x1B, ""), // pcrel | sdata4
        )
        .unwrap();

        assert_eq!(fde.base_address().unwrap(), BASE + 8 + 0x1000);
    }

    #[test]
    fn contains_is_inclusive_at_both_ends() {
        let fde = parse(
            &[
                0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_begin 0x400000
                0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_range 0x100
            ],
            test_cie(0x00, ""),
        )
        .unwrap();

        assert!(fde.contains(0x40_0000));
        assert!(fde.contains(0x40_0080));
        assert!(fde.contains(0x40_0100));
        assert!(!fde.contains(0x3F_FFFF));
        assert!(!fde.contains(0x40_0101));
    }

    #[test]
    fn z_augmentation_blob_skipped() {
        let fde = parse(
            &[
                0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_begin
                0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_range
                0x02, 0xDE, 0xAD, // augmentation length 2 + opaque data
                0x0E, 0x10, // def_cfa_offset(16)
            ],
            test_cie(0x00, "zL"),
        )
        .unwrap();

        assert_eq!(fde.instructions, vec![0x0E, 0x10]);
    }

    #[test]
    fn cursor_word_aligned_after_parse() {
        let body = [
            0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_begin
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pc_range
            0x0C, 0x07, 0x10, // instructions, record ends off-boundary
        ];
        let mut record = vec![0_u8; 8];
        record.extend_from_slice(&body);
        record.extend_from_slice(&[0x00; 8]);

        let source = SliceSource::new(BASE, &record, ByteOrder::LittleEndian, 8);
        let mut cursor = MemoryCursor::new(&source, BASE + 8);
        Fde::parse(&mut cursor, test_cie(0x00, ""), BASE, BASE + 27).unwrap();

        assert_eq!(cursor.pos() % 8, 0);
    }
}
