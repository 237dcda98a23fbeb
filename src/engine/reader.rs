//! A bounded, seekable read-only view over a byte range of a [`Backend`].

use std::io::{self, Read, Seek, SeekFrom};

use img_driver::Backend;

/// Lazy reader scoped to `[start, start + len)` in the underlying backend.
/// Reads past the bound return end-of-data rather than reaching into
/// neighboring payloads.
pub struct EntryReader<'a> {
    backend: &'a mut dyn Backend,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a> EntryReader<'a> {
    pub fn new(backend: &'a mut dyn Backend, start: u64, len: u64) -> Self {
        Self { backend, start, len, pos: 0 }
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        self.backend.seek(SeekFrom::Start(self.start + self.pos))?;
        let n = self.backend.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for EntryReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.len as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of entry"));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use img_driver::MemoryBackend;
    use std::io::Write;

    #[test]
    fn reads_are_clamped_to_the_bound() {
        let mut backend = MemoryBackend::new();
        backend.write_all(b"xxxxxHELLOxxxxx").unwrap();
        let mut reader = EntryReader::new(&mut backend, 5, 5);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[test]
    fn seek_past_end_then_read_yields_eof() {
        let mut backend = MemoryBackend::new();
        backend.write_all(b"0123456789").unwrap();
        let mut reader = EntryReader::new(&mut backend, 0, 4);
        reader.seek(SeekFrom::End(0)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn sequential_reads_advance_position() {
        let mut backend = MemoryBackend::new();
        backend.write_all(b"abcdef").unwrap();
        let mut reader = EntryReader::new(&mut backend, 1, 4);
        let mut first = [0u8; 2];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"bc");
        let mut second = [0u8; 2];
        reader.read_exact(&mut second).unwrap();
        assert_eq!(&second, b"de");
    }
}
