//! Common Information Entry (CIE) decoding.
//!
//! A CIE carries the defaults shared by a family of FDEs: the alignment factors applied to
//! instruction operands, the return-address register, the pointer encoding used for FDE
//! address fields, and the "initial instructions" that establish the callee-saved-register
//! convention before any per-function instructions run.
//!
//! CIEs are parsed once when the section scanner encounters them, retained as immutable
//! [`crate::cfi::CieRc`] values in the per-module CIE table, and referenced by every FDE
//! that names them through its `cie_pointer` field.
//!
//! # Reference
//! - Linux Standard Base, Exception Frames ("ehframechpt")
//! - DWARF 5 §6.4.1, Structure of Call Frame Information

use crate::{
    cfi::encoding::PointerEncoding,
    file::io::ByteOrder,
    memory::MemoryCursor,
    Result,
};

/// Longest augmentation string this engine accepts, including the terminating NUL.
const MAX_AUGMENTATION_LEN: usize = 5;

/// A Common Information Entry, immutable once parsed.
///
/// # Examples
///
/// ```rust,no_run
/// use cfiscope::{ByteOrder, memory::SliceSource, unwind::Unwinder};
///
/// # let section: Vec<u8> = Vec::new();
/// let source = SliceSource::new(0x1000, &section, ByteOrder::LittleEndian, 8);
/// let unwinder = Unwinder::from_eh_frame(&source, 0x1000)?;
/// for cie in unwinder.call_frame_info().cies() {
///     println!(
///         "CIE at 0x{:x}: version {}, augmentation {:?}",
///         cie.offset, cie.version, cie.augmentation
///     );
/// }
/// # Ok::<(), cfiscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Cie {
    /// Stream offset of the record's length field, the key FDEs reference it by
    pub offset: u64,
    /// CIE version, 1 or 3
    pub version: u8,
    /// Augmentation string, at most 4 characters
    pub augmentation: String,
    /// Multiplier for `advance_loc` operands
    pub code_alignment_factor: u64,
    /// Multiplier for offset operands, typically negative on descending stacks
    pub data_alignment_factor: i64,
    /// DWARF number of the register whose rule yields the caller's instruction pointer
    pub return_address_register: u64,
    /// Encoding applied to every pointer field of FDEs referencing this CIE
    pub fde_pointer_encoding: PointerEncoding,
    /// Resolved personality routine address, when present and resolvable
    pub personality_routine: Option<u64>,
    /// Encoding of the personality routine pointer, when the augmentation carries one
    pub personality_encoding: Option<PointerEncoding>,
    /// Encoding of the LSDA pointer in FDE augmentation data, when declared
    pub lsda_pointer_encoding: Option<PointerEncoding>,
    /// Set by the `'S'` augmentation character: this CIE describes a signal handler frame
    pub signal_handler_frame: bool,
    /// Raw opcode bytes establishing the prologue rule state shared by every FDE
    pub initial_instructions: Vec<u8>,
    /// Byte order of the owning module
    pub byte_order: ByteOrder,
    /// Pointer width of the owning process, 4 or 8
    pub word_size: u8,
}

impl Cie {
    /// Parse one CIE record body.
    ///
    /// The cursor must be positioned immediately after the record header (the 4-byte
    /// length and the 4-byte CIE id), i.e. at `record_start + 8`. On success the cursor
    /// is left on the next pointer-width boundary at or past `record_end`.
    ///
    /// # Arguments
    /// * `cursor` - Cursor over the module's address space, positioned at the body
    /// * `record_start` - Stream offset of the record's length field
    /// * `record_end` - Stream offset one past the last byte covered by the length field
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown version, an oversized
    /// augmentation string or an instruction block with negative length,
    /// [`crate::Error::UnsupportedEncoding`] for an FDE pointer encoding this engine
    /// cannot decode, and [`crate::Error::MemoryFault`] if the record is unreadable.
    pub(crate) fn parse(
        cursor: &mut MemoryCursor<'_>,
        record_start: u64,
        record_end: u64,
    ) -> Result<Cie> {
        let byte_order = cursor.byte_order();
        let word_size = cursor.word_size();

        let version = cursor.read::<u8>()?;
        if version != 1 && version != 3 {
            return Err(malformed_error!("Unknown CIE version - {}", version));
        }

        let augmentation = read_augmentation_string(cursor)?;

        // Legacy GCC augmentation: one pointer-width field of unused data
        if augmentation == "eh" {
            cursor.read_pointer()?;
        }

        let code_alignment_factor = cursor.read_uleb128()?;
        let data_alignment_factor = cursor.read_sleb128()?;

        let return_address_register = if version == 1 {
            u64::from(cursor.read::<u8>()?)
        } else {
            cursor.read_uleb128()?
        };

        let mut fde_pointer_encoding = PointerEncoding::default();
        let mut personality_routine = None;
        let mut personality_encoding = None;
        let mut lsda_pointer_encoding = None;
        let mut signal_handler_frame = false;

        if augmentation.starts_with('z') {
            let augmentation_length = cursor.read_uleb128()?;
            let Some(augmentation_end) = cursor.pos().checked_add(augmentation_length) else {
                return Err(malformed_error!(
                    "CIE at 0x{:x} augmentation data length overflows the stream",
                    record_start
                ));
            };

            for ch in augmentation.chars().skip(1) {
                match ch {
                    'P' => {
                        let encoding = PointerEncoding::new(cursor.read::<u8>()?);
                        let field_address = cursor.pos();
                        let raw = encoding.read_value(cursor)?;
                        // The application may be one we cannot resolve (indirect,
                        // datarel); the field width is still known, so keep the
                        // stream in sync and record the routine as unresolved.
                        personality_routine = encoding.apply(raw, field_address).ok();
                        personality_encoding = Some(encoding);
                    }
                    'L' => {
                        lsda_pointer_encoding = Some(PointerEncoding::new(cursor.read::<u8>()?));
                    }
                    'R' => {
                        let encoding = PointerEncoding::new(cursor.read::<u8>()?);
                        encoding.validate()?;
                        fde_pointer_encoding = encoding;
                    }
                    'S' => signal_handler_frame = true,
                    _ => {}
                }
            }

            cursor.seek(augmentation_end);
        }

        let Some(instructions_length) = record_end.checked_sub(cursor.pos()) else {
            return Err(malformed_error!(
                "CIE at 0x{:x} has negative instruction block length",
                record_start
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        let initial_instructions = cursor.read_vec(instructions_length as usize)?;

        cursor.align(u64::from(word_size));

        Ok(Cie {
            offset: record_start,
            version,
            augmentation,
            code_alignment_factor,
            data_alignment_factor,
            return_address_register,
            fde_pointer_encoding,
            personality_routine,
            personality_encoding,
            lsda_pointer_encoding,
            signal_handler_frame,
            initial_instructions,
            byte_order,
            word_size,
        })
    }
}

/// Read the NUL-terminated augmentation string, at most 4 characters plus NUL.
fn read_augmentation_string(cursor: &mut MemoryCursor<'_>) -> Result<String> {
    let mut bytes = Vec::new();

    loop {
        let byte = cursor.read::<u8>()?;
        if byte == 0 {
            break;
        }

        bytes.push(byte);
        if bytes.len() >= MAX_AUGMENTATION_LEN {
            return Err(malformed_error!(
                "CIE augmentation string exceeds {} bytes",
                MAX_AUGMENTATION_LEN
            ));
        }
    }

    String::from_utf8(bytes)
        .map_err(|_| malformed_error!("CIE augmentation string is not valid ASCII"))
}
