use std::io::{Read, Seek, Write};

use anyhow::Result;

/// Low-level byte-addressable backend an archive reads and writes through.
///
/// An IMG archive never needs more than seek/read/write/truncate/flush on a
/// single handle, but VER1 archives drive two independent handles (payload
/// file and directory file) through this same trait, and tests drive an
/// in-memory handle through it too.
pub trait Backend: Read + Write + Seek {
    /// Current length of the backing store, in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Truncate (or zero-extend) the backing store to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Persist any buffered writes to stable storage.
    fn sync(&mut self) -> Result<()>;
}

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;
