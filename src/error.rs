use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while scanning `.eh_frame`
/// sections, decoding CIE/FDE records, replaying call frame instructions and applying the
/// resulting rules to a register snapshot. Each variant provides specific context about the
/// failure mode to enable appropriate error handling.
///
/// The error taxonomy is reflected directly in the variants:
///
/// ## Format Errors
/// - [`Error::Malformed`] - Corrupted or invalid record structure (bad version, truncated
///   LEB128, negative instruction block, ...)
/// - [`Error::OutOfBounds`] - Attempted to read beyond a buffer boundary
/// - [`Error::InvalidOffset`] - Invalid stream offset during parsing
/// - [`Error::Empty`] - Empty input provided
///
/// ## Memory Faults
/// - [`Error::MemoryFault`] - A read outside the mapped regions of the target address space.
///   Recoverable at the smallest enclosing unit: per register during rule application, per
///   record during scanning.
///
/// ## Unimplemented-Feature Conditions
/// - [`Error::UnsupportedEncoding`] - A `DW_EH_PE` pointer encoding this engine does not decode
/// - [`Error::UnsupportedFeature`] - Extended-length records, DWARF expression opcodes and
///   similar engine limitations. Distinguished from [`Error::Malformed`]: the data is fine,
///   the engine is not.
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - ELF parsing errors from the goblin crate
/// - [`Error::NotSupported`] - Input is not an ELF module or lacks unwind data
///
/// # Examples
///
/// ```rust,no_run
/// use cfiscope::{Error, ElfModule};
/// use std::path::Path;
///
/// match ElfModule::from_file(Path::new("libexample.so")) {
///     Ok(module) => {
///         println!("Module has unwind data");
///     }
///     Err(Error::NotSupported) => {
///         eprintln!("Not an ELF module, or no PT_GNU_EH_FRAME segment");
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed module: {} ({}:{})", message, file, line);
///     }
///     Err(e) => {
///         eprintln!("Other error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Encountered an invalid offset while parsing CFI structures.
    ///
    /// This error occurs when the parser encounters an offset that is invalid for the
    /// current stream context, such as a `cie_pointer` that points before the start of
    /// the section.
    #[error("Could not retrieve a valid offset!")]
    InvalidOffset,

    /// The record is damaged and could not be parsed.
    ///
    /// This error indicates that a CIE or FDE does not conform to the DWARF CFI encoding
    /// rules. The error includes the source location where the malformation was detected
    /// for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a record.
    ///
    /// This error occurs when trying to read data beyond the end of a record buffer or
    /// instruction stream. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A read outside the mapped regions of the target address space.
    ///
    /// Raised by [`crate::memory::MemorySource`] implementations when a positioned read
    /// cannot be satisfied. Callers recover at the smallest enclosing unit: a faulting
    /// register becomes unknown, a faulting record is skipped, the scan continues.
    #[error("Memory fault at address 0x{address:016x}")]
    MemoryFault {
        /// The address at which the read faulted
        address: u64,
    },

    /// A `DW_EH_PE` pointer encoding this engine does not decode.
    ///
    /// The format or application nibble of the encoding byte is outside the supported
    /// set (absptr/pcrel applications, fixed-width and LEB128 formats). This indicates
    /// an engine limitation, not bad data - the record is skipped rather than reported
    /// as corrupt.
    #[error("Unsupported DW_EH_PE pointer encoding - 0x{0:02x}")]
    UnsupportedEncoding(u8),

    /// A DWARF CFI feature this engine deliberately does not implement.
    ///
    /// Covers extended-length (>4 GiB) records, DWARF expression opcodes and other
    /// documented limitations. Distinguished from [`Error::Malformed`] since the input
    /// is valid DWARF, just outside this engine's scope.
    #[error("Unsupported DWARF CFI feature - {0}")]
    UnsupportedFeature(String),

    /// This input is not supported.
    ///
    /// Indicates that the input is not an ELF module, or that the supplied program
    /// header does not describe a `PT_GNU_EH_FRAME` segment.
    #[error("This input is not supported")]
    NotSupported,

    /// Provided input was empty.
    ///
    /// This error occurs when an empty file or buffer is provided where actual module
    /// data was expected.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations such as reading
    /// from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories or for wrapping external
    /// library errors with additional context.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during ELF parsing.
    ///
    /// The goblin crate is used for ELF header and program header parsing.
    /// This error wraps any failures from that parsing layer.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
