//! The on-disk directory record and its in-memory counterpart.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::engine::block::{blocks_to_bytes, bytes_to_blocks};
use crate::engine::error::{ImgError, Result};

/// Width of the name field on disk: 23 usable ASCII characters plus a
/// mandatory trailing NUL.
pub const NAME_FIELD_WIDTH: usize = 24;
pub const MAX_NAME_LEN: usize = NAME_FIELD_WIDTH - 1;

/// The exact 40-byte little-endian on-disk layout. Laid out with `zerocopy`
/// byte-order wrapper types so reading/writing never depends on host
/// endianness, the way the teacher's `unsafe { deserialize_row(...) }`
/// pointer casts implicitly did (and would have broken on a big-endian
/// host).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
#[repr(C)]
pub struct RawEntry {
    offset: U32,
    size: U32,
    name: [u8; NAME_FIELD_WIDTH],
}

pub const RAW_ENTRY_SIZE: usize = core::mem::size_of::<RawEntry>();

/// A directory entry as consumed by callers: owned, by-value, with the name
/// already decoded to a `String`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub offset: u32,
    pub size: u32,
    pub name: String,
}

impl Entry {
    pub fn new(offset: u32, size: u32, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            offset,
            size,
            name: name.to_string(),
        })
    }

    pub fn offset_bytes(&self) -> u64 {
        blocks_to_bytes(self.offset)
    }

    pub fn size_bytes(&self) -> u64 {
        blocks_to_bytes(self.size)
    }

    pub fn end_block(&self) -> u32 {
        self.offset + self.size
    }

    pub fn folded_name(&self) -> String {
        fold_name(&self.name)
    }

    pub fn to_raw(&self) -> RawEntry {
        let mut name = [0u8; NAME_FIELD_WIDTH];
        let bytes = self.name.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        RawEntry {
            offset: U32::new(self.offset),
            size: U32::new(self.size),
            name,
        }
    }

    pub fn from_raw(raw: &RawEntry) -> Self {
        let nul = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
        let name = String::from_utf8_lossy(&raw.name[..nul]).into_owned();
        Self {
            offset: raw.offset.get(),
            size: raw.size.get(),
            name,
        }
    }
}

/// Case-fold a name on its ASCII range only, so names compare equal
/// regardless of case (`player.dff` ≡ `PLAYER.DFF`).
pub fn fold_name(name: &str) -> String {
    name.chars().map(|c| c.to_ascii_lowercase()).collect()
}

/// Validate a candidate entry name: nonempty, ASCII, at most
/// [`MAX_NAME_LEN`] characters. Does not check for collisions; that is the
/// directory's job.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ImgError::InvalidName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if !name.is_ascii() {
        return Err(ImgError::InvalidName {
            name: name.to_string(),
            reason: "name contains non-ASCII bytes",
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ImgError::InvalidName {
            name: name.to_string(),
            reason: "name longer than 23 characters",
        });
    }
    Ok(())
}

/// Blocks needed to hold `len` bytes of payload.
pub fn payload_blocks(len: u64) -> Result<u32> {
    bytes_to_blocks(len)
}
