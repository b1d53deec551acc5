//! Stack unwinding over DWARF call frame information.
//!
//! This module turns the decoded CFI index from [`crate::cfi`] into per-address
//! unwind answers. The [`Unwinder`] owns a module's scanned [`CallFrameInfo`] and
//! resolves instruction addresses to [`UnwindTable`]s; applying a table to a
//! register snapshot recovers the caller frame.
//!
//! # Architecture
//!
//! - [`Unwinder`] - Per-module entry point, built from a `PT_GNU_EH_FRAME` program
//!   header or directly from an `.eh_frame` address
//! - [`UnwindTable`] - Rule state for one target address, built by instruction replay
//! - [`RuleState`] / [`RegisterRule`] / [`CfaRule`] - The rule model
//! - [`RegisterBank`] - Named ↔ numbered register translation at the apply boundary
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use cfiscope::{ByteOrder, memory::SliceSource, unwind::Unwinder};
//!
//! # let section: Vec<u8> = Vec::new();
//! let source = SliceSource::new(0x1000, &section, ByteOrder::LittleEndian, 8);
//! let unwinder = Unwinder::from_eh_frame(&source, 0x1000)?;
//!
//! if let Some(table) = unwinder.table_for_address(0x40_0123)? {
//!     let names = ["rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp"];
//!     let mut registers = HashMap::new();
//!     registers.insert("rsp".to_string(), 0x7FFF_0000_u64);
//!     let frame = table.apply(&registers, &names, &source)?;
//!     println!("return to 0x{:x}", frame.return_address);
//! }
//! # Ok::<(), cfiscope::Error>(())
//! ```

use goblin::elf::program_header::{ProgramHeader, PT_GNU_EH_FRAME};
use tracing::debug;

use crate::{
    cfi::{CallFrameInfo, EhFrameHdr},
    memory::MemorySource,
    Result,
};

mod registers;
mod rules;
mod table;

pub use registers::RegisterBank;
pub use rules::{CfaRule, RegisterRule, RuleState};
pub use table::{FrameState, UnwindTable};

/// Per-module unwind entry point.
///
/// Holds the immutable CFI index for one module. Cheap to share across threads once
/// built; every lookup and table build is read-only.
pub struct Unwinder {
    cfi: CallFrameInfo,
}

impl Unwinder {
    /// Build from a module's `PT_GNU_EH_FRAME` program header.
    ///
    /// The header's segment offset plus `module_base` gives the `.eh_frame_hdr`
    /// position inside `source`; the header structure is then decoded to locate
    /// `.eh_frame` itself.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the program header is not of type
    /// `PT_GNU_EH_FRAME` or the `.eh_frame_hdr` structure is invalid, plus any error
    /// from [`Unwinder::from_eh_frame`].
    pub fn from_program_header(
        source: &dyn MemorySource,
        module_base: u64,
        header: &ProgramHeader,
    ) -> Result<Unwinder> {
        if header.p_type != PT_GNU_EH_FRAME {
            return Err(malformed_error!(
                "program header type 0x{:x} is not PT_GNU_EH_FRAME",
                header.p_type
            ));
        }

        let hdr_address = module_base.wrapping_add(header.p_offset);
        let hdr = EhFrameHdr::parse(source, hdr_address)?;
        debug!(
            hdr_address,
            eh_frame = hdr.eh_frame_address,
            "located .eh_frame through .eh_frame_hdr"
        );

        Unwinder::from_eh_frame(source, hdr.eh_frame_address)
    }

    /// Build directly from the address of an `.eh_frame` section.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedFeature`] on an extended-length CFI record;
    /// individual undecodable records are skipped during the scan, not surfaced.
    pub fn from_eh_frame(source: &dyn MemorySource, eh_frame_address: u64) -> Result<Unwinder> {
        let cfi = CallFrameInfo::scan(source, eh_frame_address)?;
        Ok(Unwinder { cfi })
    }

    /// Resolve an instruction address to its unwind table.
    ///
    /// Returns `Ok(None)` when no FDE covers the address - the caller may retry with
    /// another module or give up on the frame.
    ///
    /// # Errors
    /// Propagates instruction-replay failures from [`UnwindTable::build`].
    pub fn table_for_address(&self, address: u64) -> Result<Option<UnwindTable>> {
        let Some(fde) = self.cfi.fde_for_address(address) else {
            debug!(address, "no FDE covers address");
            return Ok(None);
        };

        UnwindTable::build(&fde, address).map(Some)
    }

    /// The underlying CFI index.
    #[must_use]
    pub fn call_frame_info(&self) -> &CallFrameInfo {
        &self.cfi
    }
}
