//! Block arithmetic: conversions between byte offsets and block indices.

use crate::engine::error::{ImgError, Result};

/// Every payload in an IMG archive is addressed in units of this size.
pub const BLOCK_SIZE: u64 = 2048;

/// `offset * BLOCK_SIZE`. Fails if the result would not fit in a u32 block
/// count's byte range (~8 TiB), matching the on-disk u32 block fields.
pub fn blocks_to_bytes(blocks: u32) -> u64 {
    blocks as u64 * BLOCK_SIZE
}

/// `ceil(bytes / BLOCK_SIZE)`, rounding any partial trailing block up.
pub fn bytes_to_blocks(bytes: u64) -> Result<u32> {
    let blocks = (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE;
    u32::try_from(blocks).map_err(|_| ImgError::Invariant {
        detail: format!("{bytes} bytes needs {blocks} blocks, which overflows a u32 block count"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_has_no_padding() {
        assert_eq!(bytes_to_blocks(4096).unwrap(), 2);
        assert_eq!(blocks_to_bytes(2), 4096);
    }

    #[test]
    fn partial_trailing_block_rounds_up() {
        assert_eq!(bytes_to_blocks(4097).unwrap(), 3);
        assert_eq!(bytes_to_blocks(1).unwrap(), 1);
        assert_eq!(bytes_to_blocks(0).unwrap(), 0);
    }

    #[test]
    fn overflow_past_u32_block_count_is_fatal() {
        let too_big = (u32::MAX as u64 + 1) * BLOCK_SIZE;
        assert!(bytes_to_blocks(too_big).is_err());
    }
}
