//! # cfiscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cfiscope library. Import this module to get quick access to the essential
//! types for call-frame-information decoding and stack unwinding.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cfiscope operations
pub use crate::Error;

/// The result type used throughout cfiscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for file-based unwinding
pub use crate::ElfModule;

/// Low-level byte parsing utilities
pub use crate::{ByteOrder, Parser};

// ================================================================================================
// Memory Access
// ================================================================================================

/// Target address space boundary and helpers
pub use crate::memory::{MemoryCursor, MemorySource, SliceSource};

// ================================================================================================
// Call Frame Information
// ================================================================================================

/// Decoded CFI records and the section scanner
pub use crate::cfi::{CallFrameInfo, Cie, CieRc, EhFrameHdr, Fde, FdeRc, PointerEncoding};

// ================================================================================================
// Unwinding
// ================================================================================================

/// Instruction replay and frame recovery
pub use crate::unwind::{
    CfaRule, FrameState, RegisterBank, RegisterRule, RuleState, Unwinder, UnwindTable,
};
