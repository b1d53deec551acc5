// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # cfiscope
//!
//! A cross-platform engine for DWARF Call Frame Information: locating `.eh_frame` data
//! in ELF modules, decoding CIE and FDE records, interpreting call frame instructions,
//! and recovering caller frames from register snapshots. Built in pure Rust, `cfiscope`
//! works on crashed process images, core files and on-disk binaries without running any
//! code from the inspected target.
//!
//! ## Features
//!
//! - **📦 Efficient module access** - Memory-mapped files with bounds-checked, reference-based decoding
//! - **🔍 Complete CFI decoding** - CIEs, FDEs, `DW_EH_PE` encoded pointers, LEB128 varints
//! - **⚡ Instruction replay** - Full `DW_CFA` interpreter with save/restore state stacks
//! - **🛡️ Fault tolerant** - Per-record and per-register degradation, never a panic on bad data
//! - **🔧 Target agnostic** - Byte order, pointer width and register naming supplied by the caller
//!
//! ## Quick Start
//!
//! Add `cfiscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cfiscope = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust,no_run
//! use cfiscope::prelude::*;
//!
//! let module = ElfModule::from_file("/usr/lib/libc.so.6")?;
//! let unwinder = module.unwinder()?;
//! println!("Found {} FDEs", unwinder.call_frame_info().fde_count());
//! # Ok::<(), cfiscope::Error>(())
//! ```
//!
//! ### Unwinding One Frame
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use cfiscope::ElfModule;
//!
//! let module = ElfModule::from_file("target_binary")?;
//! let unwinder = module.unwinder()?;
//!
//! // Register snapshot of the frame being unwound, in the target's ABI names
//! let names = ["rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp"];
//! let mut registers = HashMap::new();
//! registers.insert("rsp".to_string(), 0x7FFD_1234_0000_u64);
//!
//! if let Some(table) = unwinder.table_for_address(0x40_1234)? {
//!     let frame = table.apply(&registers, &names, &module)?;
//!     println!("caller pc = 0x{:x}", frame.return_address);
//!     println!("caller sp = 0x{:x}", frame.frame_address);
//! }
//! # Ok::<(), cfiscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `cfiscope` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`file`] - ELF module access, file backends and byte-level decoding primitives
//! - [`memory`] - The [`memory::MemorySource`] boundary over target address spaces
//! - [`cfi`] - CIE/FDE record decoding and the `.eh_frame` section scanner
//! - [`unwind`] - Call frame instruction replay and register recovery
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ### Decoding Pipeline
//!
//! The [`ElfModule`] is the main entry point for file-based unwinding. Loading a module
//! locates its `PT_GNU_EH_FRAME` segment; [`unwind::Unwinder`] scans the `.eh_frame`
//! section once into an immutable CIE table and FDE index; each
//! [`unwind::UnwindTable`] is then built on demand by replaying call frame
//! instructions up to the target address. The engine never owns target memory - all
//! reads go through [`memory::MemorySource`], and unreadable addresses degrade to
//! unknown registers instead of failed unwinds.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with comprehensive error information:
//!
//! ```rust,no_run
//! use cfiscope::{ElfModule, Error};
//!
//! match ElfModule::from_file("some_binary") {
//!     Ok(module) => println!("Loaded {} bytes", module.len()),
//!     Err(Error::UnsupportedEncoding(enc)) => println!("Cannot decode pointer encoding 0x{enc:02x}"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed CFI data: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! Unsupported DWARF features (expression opcodes, extended-length records,
//! section-relative pointer applications) are reported distinctly from corruption, since
//! they indicate an engine limitation rather than bad data.
//!
//! ## Standards Compliance
//!
//! `cfiscope` implements the call frame information encoding of the **DWARF debugging
//! format** together with the GNU `.eh_frame`/`.eh_frame_hdr` extensions described by the
//! Linux Standard Base.
//!
//! ### References
//!
//! - [DWARF Debugging Information Format](https://dwarfstd.org/) - Call frame information specification
//! - [Linux Standard Base](https://refspecs.linuxfoundation.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/ehframechpt.html) - `.eh_frame` section layout

#[macro_use]
pub(crate) mod error;

pub mod cfi;
pub mod file;
pub mod memory;
pub mod unwind;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

pub use crate::{
    error::Error,
    file::{io::ByteOrder, parser::Parser, ElfModule},
};

/// Universal `Result` type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
