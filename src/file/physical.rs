//! Physical file backend for memory-mapped I/O.
//!
//! Provides the [`crate::file::physical::Physical`] backend implementing
//! [`crate::file::Backend`] over a file on disk through memory-mapped I/O. Unwind data
//! is accessed in a sparse, non-sequential pattern (header, then individual records,
//! then saved register slots), so demand paging beats reading the whole image upfront:
//! only the touched pages ever reach physical memory, and the OS page cache is shared
//! between processes inspecting the same module.

use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A read-only, memory-mapped file on disk.
///
/// All access goes through bounds-checked slices; the mapping itself is never written.
///
/// # Examples
///
/// ```rust,no_run
/// use cfiscope::file::{Backend, Physical};
/// use std::path::Path;
///
/// let physical = Physical::new(Path::new("/usr/bin/true"))?;
/// let ident = physical.data_slice(0, 4)?;
/// assert_eq!(ident, b"\x7fELF");
/// # Ok::<(), cfiscope::Error>(())
/// ```
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Memory-map the file at `path`, read-only.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        Physical::from_std_file(file)
    }

    /// Memory-map an already-opened file handle.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if memory mapping fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_std_file(file: fs::File) -> Result<Physical> {
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error(error.to_string()))?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
