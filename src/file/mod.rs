//! ELF module access and low-level byte decoding.
//!
//! This module owns everything between the operating system and the CFI decoder: file
//! backends, the typed little/big-endian read primitives, the slice parser used for
//! instruction replay, and [`ElfModule`] - the loaded view of one ELF image that the
//! rest of the engine reads through.
//!
//! # Architecture
//!
//! An [`ElfModule`] wraps a [`Backend`] (memory-mapped file or owned buffer) and the
//! few facts the engine needs from the ELF header: byte order, pointer width, and the
//! `PT_GNU_EH_FRAME` program header locating the unwind data. The module itself
//! implements [`crate::memory::MemorySource`] with file offsets as addresses, so the
//! same decoding path serves on-disk images and live address spaces alike.
//!
//! # Key Components
//!
//! - [`ElfModule`] - Parsed ELF image, entry point for file-based unwinding
//! - [`Backend`] - Storage abstraction with bounds-checked slice access
//! - [`Physical`] / [`Memory`] - Memory-mapped and owned-buffer backends
//! - [`io`] / [`parser`] - Endian-aware primitives and the sequential slice parser
//!
//! # Examples
//!
//! ```rust,no_run
//! use cfiscope::ElfModule;
//!
//! let module = ElfModule::from_file("/usr/lib/libc.so.6")?;
//! let unwinder = module.unwinder()?;
//! println!("{} FDEs", unwinder.call_frame_info().fde_count());
//! # Ok::<(), cfiscope::Error>(())
//! ```

use goblin::elf::{program_header::PT_GNU_EH_FRAME, Elf, ProgramHeader};
use tracing::debug;

use crate::{
    file::io::ByteOrder,
    memory::MemorySource,
    unwind::Unwinder,
    Error, Result,
};

pub mod io;
mod memory;
pub mod parser;
mod physical;

pub use memory::Memory;
pub use physical::Physical;

/// Storage abstraction for module bytes.
///
/// Implementations return borrowed, bounds-checked slices; nothing is copied until a
/// decoder asks for owned bytes. `Send + Sync` because a loaded module is shared
/// read-only across unwinding threads.
pub trait Backend: Send + Sync {
    /// A slice of `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// The complete underlying data.
    fn data(&self) -> &[u8];

    /// Total size in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the backend holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A loaded ELF image with its unwind-data segment located.
///
/// Construction parses the ELF header and program header table once; everything else
/// is decoded lazily through the [`crate::memory::MemorySource`] implementation, where
/// addresses are file offsets from 0.
///
/// # Thread Safety
///
/// Immutable after construction. Reads through the backend are side-effect free, so a
/// module can serve concurrent unwind requests without locking.
pub struct ElfModule {
    backend: Box<dyn Backend>,
    byte_order: ByteOrder,
    word_size: u8,
    eh_frame_header: Option<ProgramHeader>,
}

impl ElfModule {
    /// Load a module from a file on disk via memory mapping.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened,
    /// [`crate::Error::Empty`] if it holds no data, or [`crate::Error::GoblinErr`]
    /// if it is not valid ELF.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<ElfModule> {
        ElfModule::from_backend(Box::new(Physical::new(path)?))
    }

    /// Load a module from bytes already in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if the buffer holds no data, or
    /// [`crate::Error::GoblinErr`] if it is not valid ELF.
    pub fn from_mem(data: Vec<u8>) -> Result<ElfModule> {
        ElfModule::from_backend(Box::new(Memory::new(data)))
    }

    fn from_backend(backend: Box<dyn Backend>) -> Result<ElfModule> {
        if backend.is_empty() {
            return Err(Error::Empty);
        }

        let elf = Elf::parse(backend.data())?;

        let byte_order = if elf.little_endian {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        };
        let word_size = if elf.is_64 { 8 } else { 4 };

        let eh_frame_header = elf
            .program_headers
            .iter()
            .find(|header| header.p_type == PT_GNU_EH_FRAME)
            .cloned();

        match &eh_frame_header {
            Some(header) => debug!(
                offset = header.p_offset,
                size = header.p_filesz,
                "located PT_GNU_EH_FRAME segment"
            ),
            None => debug!("module carries no PT_GNU_EH_FRAME segment"),
        }

        Ok(ElfModule {
            backend,
            byte_order,
            word_size,
            eh_frame_header,
        })
    }

    /// The `PT_GNU_EH_FRAME` program header, if the module has one.
    #[must_use]
    pub fn eh_frame_header(&self) -> Option<&ProgramHeader> {
        self.eh_frame_header.as_ref()
    }

    /// Build an [`Unwinder`] over this module's unwind data.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if the module has no `PT_GNU_EH_FRAME`
    /// segment, plus any scan error from [`Unwinder::from_program_header`].
    pub fn unwinder(&self) -> Result<Unwinder> {
        let Some(header) = &self.eh_frame_header else {
            return Err(Error::NotSupported);
        };

        Unwinder::from_program_header(self, 0, header)
    }

    /// Size of the module image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Returns `true` if the module image is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

impl MemorySource for ElfModule {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let Ok(offset) = usize::try_from(address) else {
            return Err(Error::MemoryFault { address });
        };

        match self.backend.data_slice(offset, buf.len()) {
            Ok(slice) => {
                buf.copy_from_slice(slice);
                Ok(())
            }
            Err(_) => Err(Error::MemoryFault { address }),
        }
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn word_size(&self) -> u8 {
        self.word_size
    }
}
