//! Parsed WavPack blocks.
//!
//! A block is self-contained: its header plus metadata sub-blocks carry the
//! decorrelation program, the initial decorrelation history and weights, the
//! entropy medians and the coded residuals for up to two channels.
//!
//! ## Sub-block handling
//!
//! - **Decoding parameters**: terms, weights, samples, entropy variables and
//!   hybrid profile seed the block's adaptive state
//! - **Format extensions**: float and 32-bit integer info, channel info and
//!   explicit sample rates describe how to interpret the integers
//! - **Integrity**: the optional block checksum is verified before anything
//!   else in the block is trusted
//! - **Passive data**: RIFF chunks, MD5 sums and config blocks are skipped

use std::ops::Range;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::extract::RawBlock;
use crate::process::parse::ParserState;
use crate::structs::decorr::DecorrelationProgram;
use crate::structs::entropy::EntropyState;
use crate::structs::header::{BLOCK_HEADER_SIZE, BlockHeader};
use crate::structs::metadata::{
    ChannelInfo, FloatInfo, Int32Info, SubBlock, SubBlocks, id, read_sample_rate,
};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::checksum::{block_checksum, fold_checksum};
use crate::utils::errors::{DecodeError, HeaderError, MetadataError};

/// A block with its metadata decoded and its residual bitstream located.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,

    /// Stream offset of the block's first byte.
    pub offset: u64,

    /// Decorrelation passes with their seeded weights and history.
    pub program: DecorrelationProgram,

    /// Initial entropy medians and hybrid accumulators.
    pub entropy: EntropyState,

    pub float_info: Option<FloatInfo>,
    pub int32_info: Option<Int32Info>,
    pub channel_info: Option<ChannelInfo>,

    /// Rate from the explicit sample-rate sub-block.
    pub sample_rate: Option<u32>,

    /// Whether a block checksum was present and matched.
    pub checksum_verified: bool,

    data: Arc<[u8]>,
    bitstream: Option<Range<usize>>,
}

impl Block {
    pub fn read(state: &ParserState, raw: &RawBlock) -> Result<Self> {
        let data = raw.as_ref();
        if data.len() < BLOCK_HEADER_SIZE {
            bail!(HeaderError::InvalidBlockSize(data.len() as u32));
        }

        let header =
            BlockHeader::read(&mut BsIoSliceReader::from_slice(&data[..BLOCK_HEADER_SIZE]))?;
        if header.block_size as usize != data.len() {
            bail!(HeaderError::InvalidBlockSize(data.len() as u32 - 8));
        }

        let mut block = Self {
            header,
            offset: raw.offset,
            program: DecorrelationProgram::default(),
            entropy: EntropyState::default(),
            float_info: None,
            int32_info: None,
            channel_info: None,
            sample_rate: None,
            checksum_verified: false,
            data: raw.data.clone(),
            bitstream: None,
        };

        block.verify_checksum()?;

        let mono = header.flags.mono_data();
        let mut has_wvx = false;

        for sub in SubBlocks::new(&data[BLOCK_HEADER_SIZE..], BLOCK_HEADER_SIZE) {
            let sub = sub?;

            match sub.unique_id() {
                id::DECORR_TERMS => {
                    block.program = DecorrelationProgram::read_terms(sub.data, mono)?;
                }
                id::DECORR_WEIGHTS => block.program.read_weights(sub.data, mono)?,
                id::DECORR_SAMPLES => {
                    let skip_error_words = header.version == 0x402 && header.flags.hybrid();
                    block.program.read_samples(sub.data, mono, skip_error_words)?;
                }
                id::ENTROPY_VARS => block.entropy.read_vars(sub.data, mono)?,
                id::HYBRID_PROFILE => block.entropy.read_hybrid_profile(sub.data, header.flags)?,
                id::SHAPING_WEIGHTS => trace!("Noise shaping weights ignored on decode"),
                id::FLOAT_INFO => block.float_info = Some(FloatInfo::read(sub.data)?),
                id::INT32_INFO => block.int32_info = Some(Int32Info::read(sub.data)?),
                id::CHANNEL_INFO => block.channel_info = Some(ChannelInfo::read(sub.data)?),
                id::SAMPLE_RATE => block.sample_rate = Some(read_sample_rate(sub.data)?),
                id::WV_BITSTREAM => {
                    block.bitstream = Some(sub.data_offset..sub.data_offset + sub.data.len());
                }
                id::WVC_BITSTREAM => {
                    bail!(MetadataError::UnsupportedStream("Correction (wvc) bitstream"));
                }
                id::WVX_BITSTREAM => has_wvx = true,
                id::DSD_BLOCK => bail!(MetadataError::UnsupportedStream("DSD audio")),
                id::BLOCK_CHECKSUM => {}
                id::DUMMY
                | id::ENCODER_INFO
                | id::RIFF_HEADER
                | id::RIFF_TRAILER
                | id::ALT_HEADER
                | id::ALT_TRAILER
                | id::ALT_EXTENSION
                | id::CONFIG_BLOCK
                | id::NEW_CONFIG_BLOCK
                | id::MD5_CHECKSUM
                | id::ALT_MD5_CHECKSUM
                | id::CHANNEL_IDENTITIES => {
                    trace!("Skipping sub-block {:#04x} ({} bytes)", sub.id, sub.data.len());
                }
                unknown => block.unknown_sub_block(state, &sub, unknown)?,
            }
        }

        if has_wvx {
            match block.int32_info {
                Some(info) if !header.flags.float_data() && info.sent_bits > 0 => {
                    bail!(DecodeError::ExtendedIntegerBits(info.sent_bits));
                }
                _ => debug!("Extension (wvx) bitstream ignored, output is 24-bit normalised"),
            }
        }

        if header.flags.float_data() && block.float_info.is_none() {
            bail!(MetadataError::Missing("float info"));
        }

        if header.block_samples > 0 && block.bitstream.is_none() {
            bail!(MetadataError::Missing("audio bitstream"));
        }

        trace!(
            "Block {}: {} samples, flags {:#010x}, {} decorrelation passes",
            header.block_index,
            header.block_samples,
            header.flags.0,
            block.program.passes.len()
        );

        Ok(block)
    }

    fn verify_checksum(&mut self) -> Result<()> {
        let data = self.data.clone();
        let subs = SubBlocks::new(&data[BLOCK_HEADER_SIZE..], BLOCK_HEADER_SIZE);

        for sub in subs {
            let sub = sub?;
            if sub.unique_id() != id::BLOCK_CHECKSUM {
                continue;
            }

            let stored = match *sub.data {
                [a, b] => u16::from_le_bytes([a, b]) as u32,
                [a, b, c, d] => u32::from_le_bytes([a, b, c, d]),
                _ => bail!(MetadataError::InvalidLength {
                    id: id::BLOCK_CHECKSUM,
                    len: sub.data.len(),
                }),
            };

            let computed = fold_checksum(block_checksum(&data[..sub.offset]), sub.data.len())
                .unwrap_or_default();
            if computed != stored {
                bail!(HeaderError::ChecksumMismatch { computed, stored });
            }

            self.checksum_verified = true;
            return Ok(());
        }

        Ok(())
    }

    fn unknown_sub_block(&self, state: &ParserState, sub: &SubBlock, unique_id: u8) -> Result<()> {
        if sub.is_optional() {
            log_or_err!(state, Warn, anyhow!(MetadataError::UnknownOptionalId(unique_id)));
            Ok(())
        } else {
            bail!(MetadataError::UnknownId(unique_id))
        }
    }

    /// Coded residuals of this block.
    pub fn bitstream(&self) -> &[u8] {
        match &self.bitstream {
            Some(range) => &self.data[range.clone()],
            None => &[],
        }
    }

    /// Number of output channels this block contributes.
    pub fn channels(&self) -> usize {
        self.header.flags.channels()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.block_samples == 0
    }
}
