use anyhow::{Result, bail};

use crate::structs::header::BlockFlags;
use crate::structs::metadata::id;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::{EntropyError, MetadataError};
use crate::utils::log2::{exp2s, log2};

/// Unary prefixes at or above this length switch to an escape code.
pub const LIMIT_ONES: u32 = 16;

pub(crate) const DIV0: u32 = 128;
pub(crate) const DIV1: u32 = 64;
pub(crate) const DIV2: u32 = 32;
const SLS: u32 = 8;
const SLO: i32 = 1 << (SLS - 1);

/// Adaptive parameters of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelEntropy {
    pub median: [u32; 3],
    pub slow_level: i32,
    pub error_limit: u32,
}

impl ChannelEntropy {
    #[inline(always)]
    pub(crate) fn get_med(&self, i: usize) -> u32 {
        (self.median[i] >> 4) + 1
    }

    #[inline(always)]
    pub(crate) fn inc_med(&mut self, i: usize, div: u32) {
        self.median[i] = self.median[i].wrapping_add(((self.median[i] + div) / div) * 5);
    }

    #[inline(always)]
    pub(crate) fn dec_med(&mut self, i: usize, div: u32) {
        self.median[i] = self.median[i].wrapping_sub(((self.median[i] + div - 2) / div) * 2);
    }

    #[inline(always)]
    fn decay_slow_level(&mut self) {
        self.slow_level -= (self.slow_level + SLO) >> SLS;
    }
}

/// Entropy coder state of one block, seeded from its metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntropyState {
    pub channels: [ChannelEntropy; 2],
    pub bitrate_acc: [u32; 2],
    pub bitrate_delta: [u32; 2],
    holding_one: bool,
    holding_zero: bool,
    zeros_acc: u32,
}

fn read_u16(data: &[u8], pos: &mut usize, unique_id: u8) -> Result<u16> {
    let Some(bytes) = data.get(*pos..*pos + 2) else {
        bail!(MetadataError::InvalidLength {
            id: unique_id,
            len: data.len(),
        });
    };
    *pos += 2;

    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

impl EntropyState {
    /// Reads the initial medians: three per coded channel.
    pub fn read_vars(&mut self, data: &[u8], mono: bool) -> Result<()> {
        let expected = if mono { 6 } else { 12 };
        if data.len() != expected {
            bail!(MetadataError::InvalidLength {
                id: id::ENTROPY_VARS,
                len: data.len(),
            });
        }

        for (channel, chunk) in self.channels.iter_mut().zip(data.chunks_exact(6)) {
            for (median, bytes) in channel.median.iter_mut().zip(chunk.chunks_exact(2)) {
                *median = exp2s(u16::from_le_bytes([bytes[0], bytes[1]]) as i32) as u32;
            }
        }

        Ok(())
    }

    /// Reads the hybrid bitrate accumulators, deltas and slow levels.
    pub fn read_hybrid_profile(&mut self, data: &[u8], flags: BlockFlags) -> Result<()> {
        let channels = if flags.mono_data() { 1 } else { 2 };
        let mut pos = 0;

        if flags.hybrid_bitrate() {
            for channel in self.channels.iter_mut().take(channels) {
                channel.slow_level = exp2s(read_u16(data, &mut pos, id::HYBRID_PROFILE)? as i32);
            }
        }

        for acc in self.bitrate_acc.iter_mut().take(channels) {
            *acc = (read_u16(data, &mut pos, id::HYBRID_PROFILE)? as u32) << 16;
        }

        if pos < data.len() {
            for delta in self.bitrate_delta.iter_mut().take(channels) {
                let log = read_u16(data, &mut pos, id::HYBRID_PROFILE)? as i16;
                *delta = exp2s(log as i32) as u32;
            }

            if pos < data.len() {
                bail!(MetadataError::ProfileNotConsumed(data.len() - pos));
            }
        } else {
            self.bitrate_delta = [0; 2];
        }

        Ok(())
    }

    fn update_error_limit(&mut self, flags: BlockFlags) {
        self.bitrate_acc[0] = self.bitrate_acc[0].wrapping_add(self.bitrate_delta[0]);
        let mut bitrate_0 = (self.bitrate_acc[0] >> 16) as i32;

        if flags.mono_data() {
            self.channels[0].error_limit = if flags.hybrid_bitrate() {
                let slow_log_0 = (self.channels[0].slow_level + SLO) >> SLS;
                bitrate_error_limit(slow_log_0, bitrate_0)
            } else {
                exp2s(bitrate_0) as u32
            };
            return;
        }

        self.bitrate_acc[1] = self.bitrate_acc[1].wrapping_add(self.bitrate_delta[1]);
        let mut bitrate_1 = (self.bitrate_acc[1] >> 16) as i32;

        if flags.hybrid_bitrate() {
            let slow_log_0 = (self.channels[0].slow_level + SLO) >> SLS;
            let slow_log_1 = (self.channels[1].slow_level + SLO) >> SLS;

            if flags.hybrid_balance() {
                let balance = (slow_log_1 - slow_log_0 + bitrate_1 + 1) >> 1;

                if balance > bitrate_0 {
                    bitrate_1 = bitrate_0 * 2;
                    bitrate_0 = 0;
                } else if -balance > bitrate_0 {
                    bitrate_0 *= 2;
                    bitrate_1 = 0;
                } else {
                    bitrate_1 = bitrate_0 + balance;
                    bitrate_0 -= balance;
                }
            }

            self.channels[0].error_limit = bitrate_error_limit(slow_log_0, bitrate_0);
            self.channels[1].error_limit = bitrate_error_limit(slow_log_1, bitrate_1);
        } else {
            self.channels[0].error_limit = exp2s(bitrate_0) as u32;
            self.channels[1].error_limit = exp2s(bitrate_1) as u32;
        }
    }
}

#[inline(always)]
fn bitrate_error_limit(slow_log: i32, bitrate: i32) -> u32 {
    if slow_log - bitrate > -0x100 {
        exp2s(slow_log - bitrate + 0x100) as u32
    } else {
        0
    }
}

/// Reads residuals from a block's main bitstream.
pub struct WordReader<'a> {
    bits: BsIoSliceReader<'a>,
    state: EntropyState,
    flags: BlockFlags,
    sample: usize,
}

impl<'a> WordReader<'a> {
    pub fn new(bitstream: &'a [u8], state: EntropyState, flags: BlockFlags) -> Self {
        Self {
            bits: BsIoSliceReader::from_slice(bitstream),
            state,
            flags,
            sample: 0,
        }
    }

    pub fn state(&self) -> &EntropyState {
        &self.state
    }

    #[inline(always)]
    fn exhausted(&self, channel: usize) -> anyhow::Error {
        EntropyError::BitstreamExhausted {
            sample: self.sample,
            channel,
        }
        .into()
    }

    #[inline(always)]
    fn bit(&mut self, channel: usize) -> Result<bool> {
        self.bits.get().map_err(|_| self.exhausted(channel))
    }

    #[inline(always)]
    fn bits(&mut self, n: u32, channel: usize) -> Result<u32> {
        self.bits.get_n(n).map_err(|_| self.exhausted(channel))
    }

    #[inline(always)]
    fn unary(&mut self, limit: u32, channel: usize) -> Result<u32> {
        self.bits.get_unary(limit).map_err(|_| self.exhausted(channel))
    }

    /// Elias-gamma style count used for zero runs and long unary escapes.
    fn read_count(&mut self, channel: usize) -> Result<u32> {
        let cbits = self.unary(33, channel)?;
        if cbits == 33 {
            bail!(EntropyError::RunawayCode(33));
        }

        if cbits < 2 {
            return Ok(cbits);
        }

        let low = self.bits(cbits - 1, channel)?;
        Ok(low | (1 << (cbits - 1)))
    }

    /// Reads a value uniformly distributed in `0..=max_code` using a
    /// truncated binary code.
    fn read_code(&mut self, max_code: u32, channel: usize) -> Result<u32> {
        if max_code < 2 {
            return Ok(if max_code != 0 && self.bit(channel)? { 1 } else { 0 });
        }

        let bit_count = u32::BITS - max_code.leading_zeros();
        let extras = ((1u64 << bit_count) - max_code as u64 - 1) as u32;
        let mut code = self.bits(bit_count - 1, channel)?;

        if code >= extras {
            code = (code << 1) - extras + self.bit(channel)? as u32;
        }

        Ok(code)
    }

    /// Decodes the next residual for `channel` (0 or 1).
    pub fn get_word(&mut self, channel: usize) -> Result<i32> {
        let word = self.next_word(channel)?;
        if channel + 1 == self.channel_count() {
            self.sample += 1;
        }

        Ok(word)
    }

    fn next_word(&mut self, channel: usize) -> Result<i32> {
        let state = &mut self.state;

        if state.channels[0].median[0] < 2
            && state.channels[1].median[0] < 2
            && !state.holding_zero
            && !state.holding_one
        {
            if state.zeros_acc > 0 {
                state.zeros_acc -= 1;
                if state.zeros_acc > 0 {
                    state.channels[channel].decay_slow_level();
                    return Ok(0);
                }
            } else {
                let zeros = self.read_count(channel)?;
                let state = &mut self.state;
                state.zeros_acc = zeros;
                if zeros > 0 {
                    state.channels[channel].decay_slow_level();
                    state.channels[0].median = [0; 3];
                    state.channels[1].median = [0; 3];
                    return Ok(0);
                }
            }
        }

        let ones = if self.state.holding_zero {
            self.state.holding_zero = false;
            0
        } else {
            let mut ones = self.unary(LIMIT_ONES + 1, channel)?;
            if ones >= LIMIT_ONES {
                if ones == LIMIT_ONES + 1 {
                    bail!(EntropyError::RunawayCode(LIMIT_ONES + 1));
                }
                ones = self.read_count(channel)? + LIMIT_ONES;
            }

            let state = &mut self.state;
            if state.holding_one {
                state.holding_one = ones & 1 != 0;
                ones = (ones >> 1) + 1;
            } else {
                state.holding_one = ones & 1 != 0;
                ones >>= 1;
            }
            state.holding_zero = !state.holding_one;

            ones
        };

        if self.flags.hybrid() && channel == 0 {
            self.state.update_error_limit(self.flags);
        }

        let c = &mut self.state.channels[channel];
        let (mut low, mut high) = match ones {
            0 => {
                let high = c.get_med(0).wrapping_sub(1);
                c.dec_med(0, DIV0);
                (0, high)
            }
            1 => {
                let low = c.get_med(0);
                c.inc_med(0, DIV0);
                let high = low.wrapping_add(c.get_med(1)).wrapping_sub(1);
                c.dec_med(1, DIV1);
                (low, high)
            }
            2 => {
                let mut low = c.get_med(0);
                c.inc_med(0, DIV0);
                low = low.wrapping_add(c.get_med(1));
                c.inc_med(1, DIV1);
                let high = low.wrapping_add(c.get_med(2)).wrapping_sub(1);
                c.dec_med(2, DIV2);
                (low, high)
            }
            _ => {
                let mut low = c.get_med(0);
                c.inc_med(0, DIV0);
                low = low.wrapping_add(c.get_med(1));
                c.inc_med(1, DIV1);
                low = low.wrapping_add((ones - 2).wrapping_mul(c.get_med(2)));
                let high = low.wrapping_add(c.get_med(2)).wrapping_sub(1);
                c.inc_med(2, DIV2);
                (low, high)
            }
        };

        low &= 0x7fff_ffff;
        high &= 0x7fff_ffff;
        if low > high {
            high = low;
        }

        let error_limit = c.error_limit;
        let mut mid = (high + low + 1) >> 1;

        if error_limit == 0 {
            mid = self.read_code(high - low, channel)? + low;
        } else {
            while high - low > error_limit {
                if self.bit(channel)? {
                    low = mid;
                } else {
                    high = mid - 1;
                }
                mid = (high + low + 1) >> 1;
            }
        }

        let negative = self.bit(channel)?;

        if self.flags.hybrid_bitrate() {
            let c = &mut self.state.channels[channel];
            c.decay_slow_level();
            c.slow_level += log2(mid);
        }

        Ok(if negative { !(mid as i32) } else { mid as i32 })
    }

    fn channel_count(&self) -> usize {
        if self.flags.mono_data() { 1 } else { 2 }
    }

    /// Bits left unread in the bitstream.
    pub fn remaining_bits(&mut self) -> u64 {
        self.bits.available().unwrap_or(0)
    }
}
