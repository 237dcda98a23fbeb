//! Archive I/O: format detection, directory load/flush, payload placement,
//! and the mutation operations.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use img_driver::{Backend, FileBackend};
use zerocopy::{FromBytes, IntoBytes};

use crate::engine::block::{blocks_to_bytes, bytes_to_blocks};
use crate::engine::directory::Directory;
use crate::engine::entry::{payload_blocks, validate_name, Entry, RawEntry, RAW_ENTRY_SIZE};
use crate::engine::error::{ImgError, Result};
use crate::engine::reader::EntryReader;

pub const VER2_MAGIC: [u8; 4] = *b"VER2";
const VER2_HEADER_SIZE: u64 = 8;
const COPY_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Ver1,
    Ver2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

enum Storage {
    Ver2 { file: Box<dyn Backend> },
    Ver1 { img: Box<dyn Backend>, dir: Box<dyn Backend> },
}

/// An open IMG archive: one or two file handles plus the in-memory
/// directory built from them.
pub struct Archive {
    storage: Storage,
    directory: Directory,
    mode: OpenMode,
}

fn dir_sibling_path(img_path: &Path) -> PathBuf {
    img_path.with_extension("dir")
}

/// Blocks occupied by the VER2 header plus `n` directory records.
fn ver2_header_blocks(n: usize) -> Result<u32> {
    let bytes = VER2_HEADER_SIZE + n as u64 * RAW_ENTRY_SIZE as u64;
    bytes_to_blocks(bytes)
}

fn copy_bytes<R: Read + ?Sized, W: Write + ?Sized>(src: &mut R, dst: &mut W, mut len: u64) -> Result<()> {
    let chunk_len = (COPY_CHUNK as u64).min(len.max(1)) as usize;
    let mut buf = vec![0u8; chunk_len];
    while len > 0 {
        let want = (len as usize).min(buf.len());
        src.read_exact(&mut buf[..want])?;
        dst.write_all(&buf[..want])?;
        len -= want as u64;
    }
    Ok(())
}

/// Forward-only copy within a single backend, used by `pack`. Safe whenever
/// `dst_offset <= src_offset`, which the caller guarantees by sorting and
/// never advancing the write cursor past the read cursor.
fn copy_within_backend(backend: &mut dyn Backend, mut src_offset: u64, mut dst_offset: u64, mut len: u64) -> Result<()> {
    let chunk_len = (COPY_CHUNK as u64).min(len.max(1)) as usize;
    let mut buf = vec![0u8; chunk_len];
    while len > 0 {
        let want = (len as usize).min(buf.len());
        backend.seek(SeekFrom::Start(src_offset))?;
        backend.read_exact(&mut buf[..want])?;
        backend.seek(SeekFrom::Start(dst_offset))?;
        backend.write_all(&buf[..want])?;
        src_offset += want as u64;
        dst_offset += want as u64;
        len -= want as u64;
    }
    Ok(())
}

fn write_zeros(backend: &mut dyn Backend, mut count: u64) -> Result<()> {
    let chunk_len = (COPY_CHUNK as u64).min(count.max(1)) as usize;
    let zeros = vec![0u8; chunk_len];
    while count > 0 {
        let want = (count as usize).min(zeros.len());
        backend.write_all(&zeros[..want])?;
        count -= want as u64;
    }
    Ok(())
}

fn parse_records(buf: &[u8], n: u32) -> Result<Directory> {
    let mut entries = Vec::with_capacity(n as usize);
    for chunk in buf.chunks_exact(RAW_ENTRY_SIZE) {
        let raw = RawEntry::read_from_bytes(chunk)
            .map_err(|_| ImgError::Format { detail: "malformed entry record".to_string() })?;
        entries.push(Entry::from_raw(&raw));
    }
    Directory::from_entries(entries)
}

fn check_payloads_within(directory: &Directory, payload_len: u64) -> Result<()> {
    for e in directory.iterate() {
        if e.offset_bytes() + e.size_bytes() > payload_len {
            return Err(ImgError::Format {
                detail: format!("entry {:?} extends past end of payload data", e.name),
            });
        }
    }
    Ok(())
}

/// Pure probe: open, inspect, close. Never mutates and never leaves a
/// handle open.
pub fn guess_version(path: impl AsRef<Path>) -> Result<Version> {
    let path = path.as_ref();
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    if n == 4 && magic == VER2_MAGIC {
        return Ok(Version::Ver2);
    }
    let dir_path = dir_sibling_path(path);
    match fs::metadata(&dir_path) {
        Ok(meta) if meta.len() % RAW_ENTRY_SIZE as u64 == 0 => Ok(Version::Ver1),
        _ => Err(ImgError::Format {
            detail: format!(
                "{} is neither a VER2 archive nor paired with a valid .dir sibling",
                path.display()
            ),
        }),
    }
}

impl Archive {
    /// Create an empty archive of the requested version and leave it open
    /// for writing.
    pub fn create(path: impl AsRef<Path>, version: Version) -> Result<Self> {
        let path = path.as_ref();
        match version {
            Version::Ver2 => {
                let mut file = FileBackend::create(path)?;
                file.write_all(&VER2_MAGIC)?;
                file.write_all(&0u32.to_le_bytes())?;
                file.sync()?;
                Ok(Self {
                    storage: Storage::Ver2 { file: Box::new(file) },
                    directory: Directory::new(),
                    mode: OpenMode::ReadWrite,
                })
            }
            Version::Ver1 => {
                let img = FileBackend::create(path)?;
                let dir = FileBackend::create(dir_sibling_path(path))?;
                Ok(Self {
                    storage: Storage::Ver1 { img: Box::new(img), dir: Box::new(dir) },
                    directory: Directory::new(),
                    mode: OpenMode::ReadWrite,
                })
            }
        }
    }

    /// Open an existing archive, auto-detecting its version.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let version = guess_version(path)?;
        let writable = mode == OpenMode::ReadWrite;
        match version {
            Version::Ver2 => {
                let mut file = FileBackend::open(path, writable)?;
                let directory = Self::load_ver2(&mut file)?;
                let payload_len = file.len()?;
                check_payloads_within(&directory, payload_len)?;
                Ok(Self { storage: Storage::Ver2 { file: Box::new(file) }, directory, mode })
            }
            Version::Ver1 => {
                let mut img = FileBackend::open(path, writable)?;
                let mut dir = FileBackend::open(dir_sibling_path(path), writable)?;
                let directory = Self::load_ver1(&mut dir)?;
                let payload_len = img.len()?;
                check_payloads_within(&directory, payload_len)?;
                Ok(Self { storage: Storage::Ver1 { img: Box::new(img), dir: Box::new(dir) }, directory, mode })
            }
        }
    }

    fn load_ver2(file: &mut FileBackend) -> Result<Directory> {
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; VER2_HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if header[0..4] != VER2_MAGIC {
            return Err(ImgError::Format { detail: "missing VER2 magic".to_string() });
        }
        let n = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let record_bytes = n as u64 * RAW_ENTRY_SIZE as u64;
        if VER2_HEADER_SIZE + record_bytes > file.len()? {
            return Err(ImgError::Format {
                detail: format!("directory claims {n} entries but the file is too short"),
            });
        }
        let mut buf = vec![0u8; record_bytes as usize];
        file.read_exact(&mut buf)?;
        parse_records(&buf, n)
    }

    fn load_ver1(dir: &mut FileBackend) -> Result<Directory> {
        let len = dir.len()?;
        if len % RAW_ENTRY_SIZE as u64 != 0 {
            return Err(ImgError::Format {
                detail: format!(".dir length {len} is not a multiple of {RAW_ENTRY_SIZE}"),
            });
        }
        let n = (len / RAW_ENTRY_SIZE as u64) as u32;
        dir.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; len as usize];
        dir.read_exact(&mut buf)?;
        parse_records(&buf, n)
    }

    pub fn version(&self) -> Version {
        match &self.storage {
            Storage::Ver1 { .. } => Version::Ver1,
            Storage::Ver2 { .. } => Version::Ver2,
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn entry_count(&self) -> usize {
        self.directory.len()
    }

    pub fn size_in_blocks(&mut self) -> Result<u32> {
        let len = self.payload_backend_mut().len()?;
        bytes_to_blocks(len)
    }

    pub fn iterate(&self) -> impl Iterator<Item = &Entry> {
        self.directory.iterate()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.contains(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.directory.lookup(name)
    }

    fn payload_backend_mut(&mut self) -> &mut dyn Backend {
        match &mut self.storage {
            Storage::Ver1 { img, .. } => img.as_mut(),
            Storage::Ver2 { file } => file.as_mut(),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(ImgError::Access { detail: "archive is open read-only".to_string() });
        }
        Ok(())
    }

    fn next_offset(&self, entries_after_insert: usize) -> Result<u32> {
        let max_end = self.directory.iterate().map(|e| e.end_block()).max().unwrap_or(0);
        let first_data_block = match &self.storage {
            Storage::Ver1 { .. } => 0,
            Storage::Ver2 { .. } => ver2_header_blocks(entries_after_insert)?,
        };
        Ok(max_end.max(first_data_block))
    }

    pub fn read_entry_data(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .directory
            .lookup(name)
            .cloned()
            .ok_or_else(|| ImgError::NotFound { name: name.to_string() })?;
        let backend = self.payload_backend_mut();
        backend.seek(SeekFrom::Start(entry.offset_bytes()))?;
        let mut buf = vec![0u8; entry.size_bytes() as usize];
        backend.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn open_entry(&mut self, name: &str) -> Result<EntryReader<'_>> {
        let entry = self
            .directory
            .lookup(name)
            .cloned()
            .ok_or_else(|| ImgError::NotFound { name: name.to_string() })?;
        let start = entry.offset_bytes();
        let len = entry.size_bytes();
        Ok(EntryReader::new(self.payload_backend_mut(), start, len))
    }

    /// Validates the name, places the payload by the append policy, writes
    /// it, and inserts the directory record.
    pub fn import(&mut self, source_path: impl AsRef<Path>, name: &str) -> Result<()> {
        self.ensure_writable()?;
        validate_name(name)?;
        if self.directory.contains(name) {
            return Err(ImgError::DuplicateName { name: name.to_string() });
        }

        let source_path = source_path.as_ref();
        let mut source = fs::File::open(source_path)?;
        let len = source.metadata()?.len();
        let blocks = payload_blocks(len)?;
        let offset = self.next_offset(self.directory.len() + 1)?;
        let offset_bytes = blocks_to_bytes(offset);

        let backend = self.payload_backend_mut();
        backend.seek(SeekFrom::Start(offset_bytes))?;
        copy_bytes(&mut source, backend, len)?;
        write_zeros(backend, blocks_to_bytes(blocks) - len)?;

        let entry = Entry::new(offset, blocks, name)?;
        self.directory.insert(entry)
    }

    /// Looks up the entry and copies its full block-padded payload to
    /// `dest_path`.
    pub fn extract(&mut self, name: &str, dest_path: impl AsRef<Path>) -> Result<()> {
        let entry = self
            .directory
            .lookup(name)
            .cloned()
            .ok_or_else(|| ImgError::NotFound { name: name.to_string() })?;
        let mut dest = fs::File::create(dest_path.as_ref())?;
        let backend = self.payload_backend_mut();
        backend.seek(SeekFrom::Start(entry.offset_bytes()))?;
        copy_bytes(backend, &mut dest, entry.size_bytes())
    }

    /// Validates `new` and updates the directory entry in place; no payload
    /// is moved.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_writable()?;
        self.directory.rename(old, new)
    }

    /// Deletes the entry from the directory. Its payload blocks become a
    /// hole until the next `pack`.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.directory.remove(name)?;
        Ok(())
    }

    /// Remove + import under the same name; restores the removed record on
    /// import failure so the directory is never left without `name` at all.
    pub fn replace(&mut self, name: &str, source_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_writable()?;
        let removed = self.directory.remove(name)?;
        match self.import(source_path, name) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.directory.insert(removed);
                Err(err)
            }
        }
    }

    /// Compacts the archive: sorts live entries by offset and slides each
    /// one down to close the gaps left by removed entries, then truncates
    /// the payload file to the new size.
    pub fn pack(&mut self) -> Result<u32> {
        self.ensure_writable()?;
        let first_data_block = match &self.storage {
            Storage::Ver1 { .. } => 0,
            Storage::Ver2 { .. } => ver2_header_blocks(self.directory.len())?,
        };

        let mut order: Vec<(usize, u32, u32)> = self
            .directory
            .entries_with_index()
            .map(|(i, e)| (i, e.offset, e.size))
            .collect();
        order.sort_by_key(|&(_, offset, _)| offset);

        let mut cursor = first_data_block;
        for (index, offset, size) in order {
            if offset != cursor {
                let backend = self.payload_backend_mut();
                copy_within_backend(backend, blocks_to_bytes(offset), blocks_to_bytes(cursor), blocks_to_bytes(size))?;
                self.directory.set_offset(index, cursor);
            }
            cursor += size;
        }

        self.payload_backend_mut().set_len(blocks_to_bytes(cursor))?;
        self.directory.mark_dirty();
        Ok(cursor)
    }

    fn serialize_directory(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.directory.len() * RAW_ENTRY_SIZE);
        for e in self.directory.iterate() {
            buf.extend_from_slice(e.to_raw().as_bytes());
        }
        buf
    }

    /// Persists the in-memory directory to disk and clears the dirty flag.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if !self.directory.is_dirty() {
            return Ok(());
        }

        let n = self.directory.len();
        let required = match &self.storage {
            Storage::Ver1 { .. } => 0,
            Storage::Ver2 { .. } => ver2_header_blocks(n)?,
        };
        for e in self.directory.iterate() {
            if e.offset < required {
                return Err(ImgError::Invariant {
                    detail: format!(
                        "entry {:?} at block {} precedes the {}-block header region",
                        e.name, e.offset, required
                    ),
                });
            }
        }

        let records = self.serialize_directory();
        match &mut self.storage {
            Storage::Ver2 { file } => {
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&VER2_MAGIC)?;
                file.write_all(&(n as u32).to_le_bytes())?;
                file.write_all(&records)?;
                file.sync()?;
            }
            Storage::Ver1 { img, dir } => {
                dir.seek(SeekFrom::Start(0))?;
                dir.write_all(&records)?;
                dir.set_len(records.len() as u64)?;
                dir.sync()?;
                img.sync()?;
            }
        }
        self.directory.clear_dirty();
        Ok(())
    }

    /// Releases file handles and discards any dirty in-memory state.
    pub fn close_without_sync(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::File::create(&path).unwrap().write_all(data).unwrap();
        path
    }

    #[test]
    fn create_import_sync_reopen_ver2() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let src = write_source(tmp.path(), "src.bin", &[7u8; 3000]);

        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();
        archive.import(&src, "x.dat").unwrap();
        archive.sync().unwrap();
        archive.close_without_sync();

        let mut reopened = Archive::open(&img_path, OpenMode::ReadWrite).unwrap();
        assert_eq!(reopened.entry_count(), 1);
        let entry = reopened.lookup("x.dat").unwrap().clone();
        assert_eq!(entry.size, 2);
        assert_eq!(entry.offset, 1);
        let data = reopened.read_entry_data("x.dat").unwrap();
        assert_eq!(&data[..3000], &[7u8; 3000][..]);
        assert!(data[3000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn create_import_sync_reopen_ver1() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let src = write_source(tmp.path(), "src.bin", &[7u8; 3000]);

        let mut archive = Archive::create(&img_path, Version::Ver1).unwrap();
        archive.import(&src, "x.dat").unwrap();
        archive.sync().unwrap();
        archive.close_without_sync();

        let dir_path = dir_sibling_path(&img_path);
        let dir_len = fs::metadata(&dir_path).unwrap().len();
        assert_eq!(dir_len, RAW_ENTRY_SIZE as u64);

        let mut reopened = Archive::open(&img_path, OpenMode::ReadWrite).unwrap();
        assert_eq!(reopened.entry_count(), 1);
        let entry = reopened.lookup("x.dat").unwrap().clone();
        assert_eq!(entry.size, 2);
        assert_eq!(entry.offset, 0);
        let data = reopened.read_entry_data("x.dat").unwrap();
        assert_eq!(&data[..3000], &[7u8; 3000][..]);
        assert!(data[3000..].iter().all(|&b| b == 0));

        let dir_len_after_reopen = fs::metadata(&dir_path).unwrap().len();
        assert_eq!(dir_len_after_reopen, reopened.entry_count() as u64 * RAW_ENTRY_SIZE as u64);
    }

    #[test]
    fn case_insensitive_collision_is_rejected() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let src = write_source(tmp.path(), "src.bin", b"hello");

        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();
        archive.import(&src, "Player.dff").unwrap();
        let err = archive.import(&src, "PLAYER.DFF").unwrap_err();
        assert!(matches!(err, ImgError::DuplicateName { .. }));
        assert_eq!(archive.entry_count(), 1);
    }

    #[test]
    fn remove_then_pack_compacts_offsets() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let a = write_source(tmp.path(), "a.bin", &[1u8; 10 * 2048]);
        let b = write_source(tmp.path(), "b.bin", &[2u8; 5 * 2048]);
        let c = write_source(tmp.path(), "c.bin", &[3u8; 7 * 2048]);

        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();
        archive.import(&a, "a").unwrap();
        archive.import(&b, "b").unwrap();
        archive.import(&c, "c").unwrap();
        assert_eq!(archive.lookup("a").unwrap().offset, 1);
        assert_eq!(archive.lookup("b").unwrap().offset, 11);
        assert_eq!(archive.lookup("c").unwrap().offset, 16);

        archive.remove("b").unwrap();
        let names: Vec<_> = archive.iterate().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["a", "c"]);

        let new_size = archive.pack().unwrap();
        assert_eq!(new_size, 18);
        assert_eq!(archive.lookup("a").unwrap().offset, 1);
        assert_eq!(archive.lookup("c").unwrap().offset, 11);

        let c_data = archive.read_entry_data("c").unwrap();
        assert!(c_data.iter().all(|&b| b == 3));
    }

    #[test]
    fn rename_round_trip_then_sync_is_byte_identical() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let src = write_source(tmp.path(), "src.bin", b"payload");

        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();
        archive.import(&src, "a.dat").unwrap();
        archive.sync().unwrap();
        let before = fs::read(&img_path).unwrap();

        archive.rename("a.dat", "b.dat").unwrap();
        archive.rename("b.dat", "a.dat").unwrap();
        archive.sync().unwrap();
        let after = fs::read(&img_path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn version_detection_ver2_magic() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        Archive::create(&img_path, Version::Ver2).unwrap();
        assert_eq!(guess_version(&img_path).unwrap(), Version::Ver2);
    }

    #[test]
    fn version_detection_ver1_pair() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        Archive::create(&img_path, Version::Ver1).unwrap();
        assert_eq!(guess_version(&img_path).unwrap(), Version::Ver1);
    }

    #[test]
    fn overfull_name_is_rejected_23_is_not() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let src = write_source(tmp.path(), "src.bin", b"x");
        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();

        assert!(archive.import(&src, &"a".repeat(24)).is_err());
        assert!(archive.import(&src, &"a".repeat(23)).is_ok());
    }

    #[test]
    fn read_only_archive_rejects_mutation() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        Archive::create(&img_path, Version::Ver2).unwrap().sync().unwrap();

        let mut archive = Archive::open(&img_path, OpenMode::ReadOnly).unwrap();
        let err = archive.rename("a", "b").unwrap_err();
        assert!(matches!(err, ImgError::Access { .. }));
    }

    #[test]
    fn pack_is_idempotent() {
        let tmp = tempdir().unwrap();
        let img_path = tmp.path().join("a.img");
        let a = write_source(tmp.path(), "a.bin", &[1u8; 2048]);
        let mut archive = Archive::create(&img_path, Version::Ver2).unwrap();
        archive.import(&a, "a").unwrap();
        let first = archive.pack().unwrap();
        let second = archive.pack().unwrap();
        assert_eq!(first, second);
    }
}
