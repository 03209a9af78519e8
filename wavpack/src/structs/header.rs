use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::HeaderError;

pub const BLOCK_SIGNATURE: [u8; 4] = *b"wvpk";
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Largest `ck_size` a block may declare.
pub const MAX_BLOCK_SIZE: u32 = 0x100_0000;

pub const MIN_STREAM_VERSION: u16 = 0x402;
pub const MAX_STREAM_VERSION: u16 = 0x410;

pub const MAX_BLOCK_SAMPLES: u32 = 1 << 20;

pub const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000,
    192000,
];

/// Block flag word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags(pub u32);

impl BlockFlags {
    pub const BYTES_STORED: u32 = 0x3;
    pub const MONO: u32 = 0x4;
    pub const HYBRID: u32 = 0x8;
    pub const JOINT_STEREO: u32 = 0x10;
    pub const CROSS_DECORR: u32 = 0x20;
    pub const HYBRID_SHAPE: u32 = 0x40;
    pub const FLOAT_DATA: u32 = 0x80;
    pub const INT32_DATA: u32 = 0x100;
    pub const HYBRID_BITRATE: u32 = 0x200;
    pub const HYBRID_BALANCE: u32 = 0x400;
    pub const INITIAL_BLOCK: u32 = 0x800;
    pub const FINAL_BLOCK: u32 = 0x1000;
    pub const SHIFT_LSB: u32 = 13;
    pub const SHIFT_MASK: u32 = 0x1f << Self::SHIFT_LSB;
    pub const MAG_LSB: u32 = 18;
    pub const MAG_MASK: u32 = 0x1f << Self::MAG_LSB;
    pub const SRATE_LSB: u32 = 23;
    pub const SRATE_MASK: u32 = 0xf << Self::SRATE_LSB;
    pub const NEW_SHAPING: u32 = 0x2000_0000;
    pub const FALSE_STEREO: u32 = 0x4000_0000;
    pub const DSD: u32 = 0x8000_0000;

    #[inline(always)]
    const fn has(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub const fn bytes_per_sample(self) -> u32 {
        (self.0 & Self::BYTES_STORED) + 1
    }

    /// Block carries a single channel of coded data.
    pub const fn mono_data(self) -> bool {
        self.has(Self::MONO | Self::FALSE_STEREO)
    }

    /// Number of output channels this block contributes to its frame.
    pub const fn channels(self) -> usize {
        if self.has(Self::MONO) { 1 } else { 2 }
    }

    pub const fn hybrid(self) -> bool {
        self.has(Self::HYBRID)
    }

    pub const fn joint_stereo(self) -> bool {
        self.has(Self::JOINT_STEREO)
    }

    pub const fn float_data(self) -> bool {
        self.has(Self::FLOAT_DATA)
    }

    pub const fn int32_data(self) -> bool {
        self.has(Self::INT32_DATA)
    }

    pub const fn hybrid_bitrate(self) -> bool {
        self.has(Self::HYBRID_BITRATE)
    }

    pub const fn hybrid_balance(self) -> bool {
        self.has(Self::HYBRID_BALANCE)
    }

    pub const fn initial_block(self) -> bool {
        self.has(Self::INITIAL_BLOCK)
    }

    pub const fn final_block(self) -> bool {
        self.has(Self::FINAL_BLOCK)
    }

    pub const fn false_stereo(self) -> bool {
        self.has(Self::FALSE_STEREO)
    }

    pub const fn dsd(self) -> bool {
        self.has(Self::DSD)
    }

    pub const fn shift(self) -> u32 {
        (self.0 & Self::SHIFT_MASK) >> Self::SHIFT_LSB
    }

    pub const fn magnitude(self) -> u32 {
        (self.0 & Self::MAG_MASK) >> Self::MAG_LSB
    }

    /// Sample rate from the index table, `None` for the custom index 15.
    pub const fn sample_rate(self) -> Option<u32> {
        let index = ((self.0 & Self::SRATE_MASK) >> Self::SRATE_LSB) as usize;
        if index < SAMPLE_RATES.len() {
            Some(SAMPLE_RATES[index])
        } else {
            None
        }
    }

    /// Precision of the reconstructed integers before requantization.
    pub const fn source_bits(self) -> u32 {
        if self.float_data() {
            24
        } else {
            self.bytes_per_sample() * 8
        }
    }
}

/// Fixed 32-byte preamble of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Total block length including the header.
    pub block_size: u32,
    pub version: u16,
    /// Samples per channel in the whole stream, if the encoder knew it.
    pub total_samples: Option<u64>,
    pub block_index: u64,
    pub block_samples: u32,
    pub flags: BlockFlags,
    pub crc: u32,
}

impl BlockHeader {
    /// Quick plausibility check used while scanning for block boundaries.
    ///
    /// Returns the total block length when `bytes` looks like a block header.
    pub fn probe(bytes: &[u8]) -> Option<usize> {
        if bytes.len() < BLOCK_HEADER_SIZE || bytes[..4] != BLOCK_SIGNATURE {
            return None;
        }

        let ck_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);

        if ck_size & 1 != 0
            || ck_size < (BLOCK_HEADER_SIZE - 8) as u32
            || ck_size >= MAX_BLOCK_SIZE
            || version >> 8 != 4
        {
            return None;
        }

        Some(ck_size as usize + 8)
    }

    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let signature: u32 = reader.get_n(32)?;
        if signature != u32::from_le_bytes(BLOCK_SIGNATURE) {
            bail!(HeaderError::BadSignature);
        }

        let ck_size: u32 = reader.get_n(32)?;
        if ck_size & 1 != 0 || ck_size < (BLOCK_HEADER_SIZE - 8) as u32 || ck_size >= MAX_BLOCK_SIZE
        {
            bail!(HeaderError::InvalidBlockSize(ck_size));
        }

        let version: u16 = reader.get_n(16)?;
        if !(MIN_STREAM_VERSION..=MAX_STREAM_VERSION).contains(&version) {
            bail!(HeaderError::UnsupportedVersion(version));
        }

        let block_index_u8: u64 = reader.get_n(8)?;
        let total_samples_u8: u64 = reader.get_n(8)?;
        let total_samples: u32 = reader.get_n(32)?;
        let block_index: u32 = reader.get_n(32)?;
        let block_samples: u32 = reader.get_n(32)?;
        let flags = BlockFlags(reader.get_n(32)?);
        let crc: u32 = reader.get_n(32)?;

        if flags.dsd() {
            bail!(HeaderError::DsdAudio);
        }

        // False stereo duplicates a stereo block's single coded channel.
        if flags.mono_data() && flags.false_stereo() {
            bail!(HeaderError::MonoFalseStereo(flags.0));
        }

        if block_samples > MAX_BLOCK_SAMPLES {
            bail!(HeaderError::TooManySamples {
                actual: block_samples,
                max: MAX_BLOCK_SAMPLES,
            });
        }

        // Each 2^32 extension skips one value so that all-ones stays unique.
        let total_samples = if total_samples == u32::MAX {
            None
        } else {
            Some(total_samples as u64 + (total_samples_u8 << 32) - total_samples_u8)
        };

        Ok(Self {
            block_size: ck_size + 8,
            version,
            total_samples,
            block_index: block_index as u64 + (block_index_u8 << 32),
            block_samples,
            flags,
            crc,
        })
    }
}
