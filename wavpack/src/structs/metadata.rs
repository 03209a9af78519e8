use anyhow::{Result, bail};

use crate::utils::errors::MetadataError;

/// Metadata sub-block identifiers.
pub mod id {
    pub const UNIQUE: u8 = 0x3f;
    pub const OPTIONAL_DATA: u8 = 0x20;
    pub const ODD_SIZE: u8 = 0x40;
    pub const LARGE: u8 = 0x80;

    pub const DUMMY: u8 = 0x0;
    pub const ENCODER_INFO: u8 = 0x1;
    pub const DECORR_TERMS: u8 = 0x2;
    pub const DECORR_WEIGHTS: u8 = 0x3;
    pub const DECORR_SAMPLES: u8 = 0x4;
    pub const ENTROPY_VARS: u8 = 0x5;
    pub const HYBRID_PROFILE: u8 = 0x6;
    pub const SHAPING_WEIGHTS: u8 = 0x7;
    pub const FLOAT_INFO: u8 = 0x8;
    pub const INT32_INFO: u8 = 0x9;
    pub const WV_BITSTREAM: u8 = 0xa;
    pub const WVC_BITSTREAM: u8 = 0xb;
    pub const WVX_BITSTREAM: u8 = 0xc;
    pub const CHANNEL_INFO: u8 = 0xd;
    pub const DSD_BLOCK: u8 = 0xe;

    pub const RIFF_HEADER: u8 = 0x21;
    pub const RIFF_TRAILER: u8 = 0x22;
    pub const ALT_HEADER: u8 = 0x23;
    pub const ALT_TRAILER: u8 = 0x24;
    pub const CONFIG_BLOCK: u8 = 0x25;
    pub const MD5_CHECKSUM: u8 = 0x26;
    pub const SAMPLE_RATE: u8 = 0x27;
    pub const ALT_EXTENSION: u8 = 0x28;
    pub const ALT_MD5_CHECKSUM: u8 = 0x29;
    pub const NEW_CONFIG_BLOCK: u8 = 0x2a;
    pub const CHANNEL_IDENTITIES: u8 = 0x2b;
    pub const BLOCK_CHECKSUM: u8 = 0x2f;
}

/// One metadata sub-block borrowed from its block.
#[derive(Debug, Clone, Copy)]
pub struct SubBlock<'a> {
    /// Raw id byte including the size flags.
    pub id: u8,
    /// Payload with any odd-size padding removed.
    pub data: &'a [u8],
    /// Offset of the id byte from the start of the block.
    pub offset: usize,
    /// Offset of the payload from the start of the block.
    pub data_offset: usize,
}

impl SubBlock<'_> {
    pub fn unique_id(&self) -> u8 {
        self.id & id::UNIQUE
    }

    pub fn is_optional(&self) -> bool {
        self.id & id::OPTIONAL_DATA != 0
    }

    pub fn is_odd_size(&self) -> bool {
        self.id & id::ODD_SIZE != 0
    }
}

/// Iterates the sub-blocks of the metadata region that follows the header.
pub struct SubBlocks<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> SubBlocks<'a> {
    /// `base` is the offset of `data` within the block.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    fn read_one(&mut self) -> Result<SubBlock<'a>> {
        let remaining = &self.data[self.pos..];
        let id = remaining[0];
        let offset = self.base + self.pos;

        let (header_len, words) = if id & id::LARGE != 0 {
            if remaining.len() < 4 {
                bail!(MetadataError::Overrun {
                    id,
                    offset,
                    size: 4,
                    remaining: remaining.len(),
                });
            }
            let words = remaining[1] as usize
                | (remaining[2] as usize) << 8
                | (remaining[3] as usize) << 16;
            (4, words)
        } else {
            if remaining.len() < 2 {
                bail!(MetadataError::Overrun {
                    id,
                    offset,
                    size: 2,
                    remaining: remaining.len(),
                });
            }
            (2, remaining[1] as usize)
        };

        let padded = words * 2;
        if remaining.len() - header_len < padded {
            bail!(MetadataError::Overrun {
                id,
                offset,
                size: padded,
                remaining: remaining.len() - header_len,
            });
        }

        let len = if id & id::ODD_SIZE != 0 {
            if padded == 0 {
                bail!(MetadataError::InvalidLength { id, len: 0 });
            }
            padded - 1
        } else {
            padded
        };

        self.pos += header_len + padded;

        Ok(SubBlock {
            id,
            data: &remaining[header_len..header_len + len],
            offset,
            data_offset: offset + header_len,
        })
    }
}

impl<'a> Iterator for SubBlocks<'a> {
    type Item = Result<SubBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let item = self.read_one();
        if item.is_err() {
            self.pos = self.data.len();
        }

        Some(item)
    }
}

/// Channel count and speaker mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channels: usize,
    pub mask: u32,
}

impl ChannelInfo {
    pub fn read(data: &[u8]) -> Result<Self> {
        let (channels, mask_bytes) = match data.len() {
            0 => bail!(MetadataError::InvalidChannelInfo("empty")),
            1..=5 => (data[0] as usize, &data[1..]),
            6 | 7 => {
                let channels = (data[0] as usize | ((data[2] as usize & 0xf) << 8)) + 1;
                let streams = (data[1] as usize | ((data[2] as usize & 0xf0) << 4)) + 1;
                if streams > channels {
                    bail!(MetadataError::InvalidChannelInfo("more streams than channels"));
                }
                // The 7-byte form only adds the top mask byte.
                (channels, &data[3..])
            }
            _ => bail!(MetadataError::InvalidChannelInfo("length over 7 bytes")),
        };

        if channels == 0 {
            bail!(MetadataError::InvalidChannelInfo("zero channels"));
        }

        let mask = mask_bytes
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |mask, (i, &b)| mask | (b as u32) << (i * 8));

        Ok(Self { channels, mask })
    }
}

/// Parameters for reconstructing floating-point streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatInfo {
    pub flags: u8,
    pub shift: u8,
    pub max_exp: u8,
    pub norm_exp: u8,
}

impl FloatInfo {
    pub fn read(data: &[u8]) -> Result<Self> {
        let &[flags, shift, max_exp, norm_exp] = data else {
            bail!(MetadataError::InvalidLength {
                id: id::FLOAT_INFO,
                len: data.len(),
            });
        };

        Ok(Self {
            flags,
            shift,
            max_exp,
            norm_exp,
        })
    }
}

/// Parameters for 32-bit integer streams that were coded with fewer bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Int32Info {
    pub sent_bits: u8,
    pub zeros: u8,
    pub ones: u8,
    pub dups: u8,
}

impl Int32Info {
    pub fn read(data: &[u8]) -> Result<Self> {
        let &[sent_bits, zeros, ones, dups] = data else {
            bail!(MetadataError::InvalidLength {
                id: id::INT32_INFO,
                len: data.len(),
            });
        };

        Ok(Self {
            sent_bits,
            zeros,
            ones,
            dups,
        })
    }
}

/// Explicit sample rate for rates outside the header's index table.
pub fn read_sample_rate(data: &[u8]) -> Result<u32> {
    match data.len() {
        3 | 4 => Ok(data
            .iter()
            .enumerate()
            .fold(0u32, |rate, (i, &b)| rate | (b as u32) << (i * 8))),
        len => bail!(MetadataError::InvalidLength {
            id: id::SAMPLE_RATE,
            len,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_small_large_and_odd_blocks() -> Result<()> {
        let mut data = vec![id::DECORR_TERMS, 1, 0x11, 0x22];
        data.extend_from_slice(&[id::ENTROPY_VARS | id::ODD_SIZE, 2, 1, 2, 3, 0]);
        data.extend_from_slice(&[id::WV_BITSTREAM | id::LARGE, 1, 0, 0, 0xaa, 0xbb]);

        let blocks = SubBlocks::new(&data, 32).collect::<Result<Vec<_>>>()?;
        assert_eq!(blocks.len(), 3);

        assert_eq!(blocks[0].unique_id(), id::DECORR_TERMS);
        assert_eq!(blocks[0].data, &[0x11, 0x22]);
        assert_eq!(blocks[0].offset, 32);

        assert_eq!(blocks[1].unique_id(), id::ENTROPY_VARS);
        assert_eq!(blocks[1].data, &[1, 2, 3]);
        assert_eq!(blocks[1].offset, 36);

        assert_eq!(blocks[2].unique_id(), id::WV_BITSTREAM);
        assert_eq!(blocks[2].data, &[0xaa, 0xbb]);
        assert_eq!(blocks[2].offset, 42);
        assert_eq!(blocks[2].data_offset, 46);

        Ok(())
    }

    #[test]
    fn overrun_is_reported_once() {
        let data = [id::DECORR_TERMS, 4, 0, 0];
        let mut blocks = SubBlocks::new(&data, 0);
        assert!(blocks.next().is_some_and(|b| b.is_err()));
        assert!(blocks.next().is_none());
    }

    #[test]
    fn optional_ids_keep_their_flag() -> Result<()> {
        let data = [id::SAMPLE_RATE | id::ODD_SIZE, 2, 0x00, 0x77, 0x01, 0];
        let block = SubBlocks::new(&data, 0).next().unwrap()?;
        assert!(block.is_optional());
        assert_eq!(block.unique_id(), id::SAMPLE_RATE);
        assert_eq!(read_sample_rate(block.data)?, 96000);

        Ok(())
    }

    #[test]
    fn channel_info_layouts() -> Result<()> {
        let legacy = ChannelInfo::read(&[6, 0x3f])?;
        assert_eq!(legacy, ChannelInfo { channels: 6, mask: 0x3f });

        let extended = ChannelInfo::read(&[7, 3, 0, 0xff, 0x00, 0x00])?;
        assert_eq!(extended, ChannelInfo { channels: 8, mask: 0xff });

        let wide = ChannelInfo::read(&[5, 0, 0, 0x3f, 0, 0, 0])?;
        assert_eq!(wide, ChannelInfo { channels: 6, mask: 0x3f });

        let wide = ChannelInfo::read(&[5, 0, 0, 0x3f, 0x06, 0x00, 0x01])?;
        assert_eq!(
            wide,
            ChannelInfo {
                channels: 6,
                mask: 0x0100_063f
            }
        );

        assert!(ChannelInfo::read(&[]).is_err());
        assert!(ChannelInfo::read(&[0]).is_err());

        Ok(())
    }
}
