use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use anyhow::Result;

use crate::Backend;

/// In-memory backend, used where tests exercise directory/allocator/pack
/// logic without touching the filesystem.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Cursor<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MemoryBackend {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for MemoryBackend {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Backend for MemoryBackend {
    fn len(&mut self) -> Result<u64> {
        Ok(self.inner.get_ref().len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        let len = len as usize;
        let buf = self.inner.get_mut();
        buf.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() -> Result<()> {
        let mut backend = MemoryBackend::new();
        backend.write_all(b"abcdef")?;
        backend.seek(SeekFrom::Start(2))?;
        let mut buf = [0u8; 2];
        backend.read_exact(&mut buf)?;
        assert_eq!(&buf, b"cd");
        Ok(())
    }

    #[test]
    fn set_len_grows_with_zeros() -> Result<()> {
        let mut backend = MemoryBackend::new();
        backend.write_all(b"ab")?;
        backend.set_len(4)?;
        assert_eq!(backend.into_inner(), vec![b'a', b'b', 0, 0]);
        Ok(())
    }
}
