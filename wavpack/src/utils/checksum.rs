//! Integrity checks carried by WavPack blocks.
//!
//! Two independent checks exist:
//!
//! - the header `crc`, a running `crc * 3 + sample` over the reconstructed
//!   integer samples of the block (before any output shift), and
//! - the optional block checksum sub-block, a `sum * 3 + word` over the raw
//!   little-endian 16-bit words of the block preceding the sub-block.
//!
//! Neither is a polynomial CRC; both are cheap multiplicative sums.

/// Initial value shared by both checks.
pub const CHECKSUM_INIT: u32 = 0xffff_ffff;

/// Running checksum over reconstructed samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCrc(u32);

impl Default for SampleCrc {
    fn default() -> Self {
        Self(CHECKSUM_INIT)
    }
}

impl SampleCrc {
    #[inline(always)]
    pub fn update(&mut self, sample: i32) {
        self.0 = self.0.wrapping_mul(3).wrapping_add(sample as u32);
    }

    #[inline(always)]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

/// Computes the block checksum over `data`, which must hold an even number
/// of bytes.
pub const fn block_checksum(data: &[u8]) -> u32 {
    let mut csum = CHECKSUM_INIT;
    let mut i = 0;
    while i + 1 < data.len() {
        let word = data[i] as u32 | (data[i + 1] as u32) << 8;
        csum = csum.wrapping_mul(3).wrapping_add(word);
        i += 2;
    }

    csum
}

/// Folds a full checksum to the width stored in the sub-block.
///
/// Returns `None` for widths other than 2 or 4 bytes.
pub const fn fold_checksum(csum: u32, width: usize) -> Option<u32> {
    match width {
        4 => Some(csum),
        2 => Some((csum ^ (csum >> 16)) & 0xffff),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_crc_matches_manual_sum() {
        let mut crc = SampleCrc::default();
        crc.update(1);
        crc.update(-1);

        let expected = CHECKSUM_INIT
            .wrapping_mul(3)
            .wrapping_add(1)
            .wrapping_mul(3)
            .wrapping_add(u32::MAX);
        assert_eq!(crc.value(), expected);
    }

    #[test]
    fn block_checksum_words() {
        assert_eq!(block_checksum(&[]), CHECKSUM_INIT);

        let csum = block_checksum(&[0x34, 0x12]);
        assert_eq!(csum, CHECKSUM_INIT.wrapping_mul(3).wrapping_add(0x1234));

        assert_eq!(fold_checksum(0x1234_5678, 4), Some(0x1234_5678));
        assert_eq!(fold_checksum(0x1234_5678, 2), Some(0x5678 ^ 0x1234));
        assert_eq!(fold_checksum(0x1234_5678, 3), None);
    }
}
