//! Call Frame Information decoding.
//!
//! This module owns everything between raw `.eh_frame` bytes and decoded records: the
//! `DW_EH_PE` pointer-encoding scheme, Common Information Entries, Frame Description
//! Entries, and the section scanner that ties them together into a per-module index.
//!
//! # Architecture
//!
//! Records are decoded bottom-up. [`PointerEncoding`] reads individual encoded pointer
//! fields; [`Cie`] and [`Fde`] decode whole records through a
//! [`crate::memory::MemoryCursor`]; [`CallFrameInfo::scan`] drives one linear pass over
//! the section, resolving each FDE's parent CIE by stream offset as it goes. The result
//! is immutable and shareable - lookups never mutate the index.
//!
//! # Key Components
//!
//! - [`EhFrameHdr`] - Locates `.eh_frame` through the `.eh_frame_hdr` structure
//! - [`CallFrameInfo`] - The per-module CIE table and FDE index
//! - [`Cie`] / [`Fde`] - Decoded records, held behind [`std::sync::Arc`]
//! - [`PointerEncoding`] - `DW_EH_PE` format and application handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use cfiscope::{ByteOrder, cfi::CallFrameInfo, memory::SliceSource};
//!
//! # let section: Vec<u8> = Vec::new();
//! let source = SliceSource::new(0x1000, &section, ByteOrder::LittleEndian, 8);
//! let cfi = CallFrameInfo::scan(&source, 0x1000)?;
//! for fde in cfi.fdes() {
//!     println!("0x{:x} + 0x{:x}", fde.base_address()?, fde.pc_range);
//! }
//! # Ok::<(), cfiscope::Error>(())
//! ```

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

mod cie;
mod encoding;
mod ehframe;
mod fde;

pub use cie::Cie;
pub use encoding::{EncodingApplication, EncodingFormat, PointerEncoding, DW_EH_PE_OMIT};
pub use ehframe::{CallFrameInfo, EhFrameHdr};
pub use fde::Fde;

/// A reference-counted [`Cie`]
pub type CieRc = Arc<Cie>;
/// Map of stream offset to [`CieRc`], ordered by offset
pub type CieMap = SkipMap<u64, CieRc>;
/// A reference-counted [`Fde`]
pub type FdeRc = Arc<Fde>;
/// Append-only list of [`FdeRc`] in section order
pub type FdeList = boxcar::Vec<FdeRc>;
