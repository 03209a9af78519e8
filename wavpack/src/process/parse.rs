use std::io::Read;

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::process::extract::{BlockReader, RawBlock};
use crate::structs::block::Block;
use crate::utils::errors::HeaderError;

/// Upper bound on channels in one frame.
pub const MAX_CHANNELS: usize = 4096;

/// Sample rate assumed when neither the header index nor a sample-rate
/// sub-block provides one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Parses raw blocks into structured [`Block`]s.
#[derive(Default)]
pub struct Parser {
    state: ParserState,
}

impl Parser {
    pub fn parse(&self, raw: &RawBlock) -> Result<Block> {
        Block::read(&self.state, raw)
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParserState {
    pub fail_level: log::Level,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
        }
    }
}

/// The blocks sharing one `block_index`, from the initial block through the
/// final block, covering every channel of the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub samples: u32,
    pub blocks: Vec<Block>,
    pub channels: usize,
    pub channel_mask: u32,
    pub sample_rate: u32,
    pub total_samples: Option<u64>,
    pub version: u16,
    /// Stream offset of the first block.
    pub offset: u64,
    /// Stream offset just past the last block.
    pub end_offset: u64,
}

impl Frame {
    /// Precision of the integers the frame reconstructs.
    pub fn source_bits(&self) -> u32 {
        self.blocks
            .first()
            .map_or(16, |block| block.header.flags.source_bits())
    }
}

fn default_channel_mask(channels: usize) -> u32 {
    match channels {
        1 => 0x4,
        2 => 0x3,
        _ => 0,
    }
}

/// Groups parsed blocks into frames and checks the stream stays consistent
/// from one frame to the next.
pub struct FrameReader<R: Read> {
    blocks: BlockReader<R>,
    parser: Parser,
    fail_level: log::Level,
    frames_read: u64,
    next_index: Option<u64>,
    channels: Option<usize>,
    channel_mask: Option<u32>,
    sample_rate: Option<u32>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            blocks: BlockReader::new(reader),
            parser: Parser::default(),
            fail_level: log::Level::Error,
            frames_read: 0,
            next_index: None,
            channels: None,
            channel_mask: None,
            sample_rate: None,
        }
    }

    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
        self.blocks.set_fail_level(level);
        self.parser.set_fail_level(level);
    }

    /// Bytes pulled from the input so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.blocks.bytes_consumed()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn next_block(&mut self) -> Result<Option<Block>> {
        while let Some(raw) = self.blocks.next_block()? {
            let block = self.parser.parse(&raw)?;
            if block.is_empty() {
                debug!("Skipping block at offset {} with no samples", block.offset);
                continue;
            }
            return Ok(Some(block));
        }

        Ok(None)
    }

    /// Collects the blocks of the next frame. Incomplete frames are dropped.
    fn collect_blocks(&mut self) -> Result<Option<Vec<Block>>> {
        let mut blocks: Vec<Block> = Vec::new();

        loop {
            let Some(block) = self.next_block()? else {
                if let Some(first) = blocks.first() {
                    log_or_err!(
                        self,
                        Warn,
                        anyhow!(HeaderError::UnterminatedFrame(first.header.block_index))
                    );
                }
                return Ok(None);
            };

            let flags = block.header.flags;
            match blocks.first() {
                None if !flags.initial_block() => {
                    log_or_err!(
                        self,
                        Warn,
                        anyhow!(HeaderError::OrphanBlock(block.header.block_index))
                    );
                    continue;
                }
                None => {}
                Some(first) if flags.initial_block() => {
                    log_or_err!(
                        self,
                        Warn,
                        anyhow!(HeaderError::UnterminatedFrame(first.header.block_index))
                    );
                    blocks.clear();
                }
                Some(first) => {
                    if block.header.block_index != first.header.block_index {
                        bail!(HeaderError::BlockIndexMismatch {
                            found: block.header.block_index,
                            expected: first.header.block_index,
                        });
                    }
                    if block.header.block_samples != first.header.block_samples {
                        bail!(HeaderError::SampleCountMismatch {
                            index: block.header.block_index,
                            found: block.header.block_samples,
                            expected: first.header.block_samples,
                        });
                    }
                }
            }

            blocks.push(block);

            let channels: usize = blocks.iter().map(Block::channels).sum();
            if channels > MAX_CHANNELS {
                bail!(HeaderError::TooManyChannels(channels));
            }

            if flags.final_block() {
                return Ok(Some(blocks));
            }
        }
    }

    /// Returns the next complete frame, or `None` at the end of the stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(blocks) = self.collect_blocks()? else {
            return Ok(None);
        };

        let first = &blocks[0];
        let header = first.header;
        let channels: usize = blocks.iter().map(Block::channels).sum();

        match self.channels {
            Some(expected) if expected != channels => {
                bail!(HeaderError::ChannelCountChanged {
                    expected,
                    found: channels,
                });
            }
            _ => self.channels = Some(channels),
        }

        if let Some(info) = first.channel_info {
            if info.channels != channels {
                log_or_err!(
                    self,
                    Warn,
                    anyhow!(HeaderError::ChannelInfoMismatch {
                        declared: info.channels,
                        found: channels,
                    })
                );
            }
            self.channel_mask = Some(info.mask);
        }
        let channel_mask = self
            .channel_mask
            .unwrap_or_else(|| default_channel_mask(channels));

        let sample_rate = header
            .flags
            .sample_rate()
            .or(first.sample_rate)
            .or(self.sample_rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        self.sample_rate = Some(sample_rate);

        if let Some(expected) = self.next_index.filter(|&i| i != header.block_index) {
            log_or_err!(
                self,
                Warn,
                anyhow!(HeaderError::IndexGap {
                    expected,
                    found: header.block_index,
                })
            );
        }
        self.next_index = Some(header.block_index + header.block_samples as u64);

        let last = &blocks[blocks.len() - 1];
        let end_offset = last.offset + last.len() as u64;

        trace!(
            "Frame {} at index {}: {} blocks, {} channels",
            self.frames_read,
            header.block_index,
            blocks.len(),
            channels
        );
        self.frames_read += 1;

        Ok(Some(Frame {
            index: header.block_index,
            samples: header.block_samples,
            channels,
            channel_mask,
            sample_rate,
            total_samples: header.total_samples,
            version: header.version,
            offset: first.offset,
            end_offset,
            blocks,
        }))
    }
}
