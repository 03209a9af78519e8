//! Lossless stream builder for tests.
//!
//! Produces real multi-block streams: integer PCM in, blocks out. Every
//! decorrelation term is covered, cross-channel ones included, with either
//! silent or seeded pass history. Hybrid, float and 32-bit extensions are
//! exercised by unit tests instead.

use crate::structs::decorr::{apply_weight, extrapolate, update_weight, update_weight_clip};
use crate::structs::entropy::{ChannelEntropy, DIV0, DIV1, DIV2, LIMIT_ONES};
use crate::structs::header::{BLOCK_HEADER_SIZE, BlockFlags, SAMPLE_RATES};
use crate::structs::metadata::id;
use crate::utils::checksum::{SampleCrc, block_checksum};
use crate::utils::log2::{exp2s, restore_weight};

/// LSB-first bit writer matching the bitstream reader.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u8,
    count: u32,
}

impl BitWriter {
    pub fn put_bit(&mut self, bit: bool) {
        if bit {
            self.acc |= 1 << self.count;
        }
        self.count += 1;
        if self.count == 8 {
            self.bytes.push(self.acc);
            self.acc = 0;
            self.count = 0;
        }
    }

    pub fn put_bits(&mut self, value: u64, n: u32) {
        for i in 0..n {
            self.put_bit(value >> i & 1 != 0);
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.bytes.push(self.acc);
        }
        self.bytes
    }
}

fn count_bits(value: u32) -> u32 {
    u32::BITS - value.leading_zeros()
}

/// Residual coder, the exact inverse of the word reader.
#[derive(Debug, Default)]
struct WordWriter {
    bits: BitWriter,
    channels: [ChannelEntropy; 2],
    holding_one: u32,
    holding_zero: bool,
    zeros_acc: u32,
    pend_data: u64,
    pend_count: u32,
}

impl WordWriter {
    fn put_count(&mut self, mut value: u32) {
        for _ in 0..count_bits(value) {
            self.bits.put_bit(true);
        }
        self.bits.put_bit(false);

        while value > 1 {
            self.bits.put_bit(value & 1 != 0);
            value >>= 1;
        }
    }

    fn pend(&mut self, value: u32, n: u32) {
        self.pend_data |= (value as u64) << self.pend_count;
        self.pend_count += n;
    }

    fn flush(&mut self) {
        if self.zeros_acc > 0 {
            self.put_count(self.zeros_acc);
            self.zeros_acc = 0;
        }

        if self.holding_one > 0 {
            if self.holding_one >= LIMIT_ONES {
                self.bits.put_bits((1 << LIMIT_ONES) - 1, LIMIT_ONES + 1);
                self.put_count(self.holding_one - LIMIT_ONES);
                self.holding_zero = false;
            } else {
                self.bits.put_bits((1 << self.holding_one) - 1, self.holding_one);
            }
            self.holding_one = 0;
        }

        if self.holding_zero {
            self.bits.put_bit(false);
            self.holding_zero = false;
        }

        if self.pend_count > 0 {
            self.bits.put_bits(self.pend_data, self.pend_count);
            self.pend_data = 0;
            self.pend_count = 0;
        }
    }

    fn send_word(&mut self, value: i32, channel: usize) {
        if self.channels[0].median[0] < 2 && self.channels[1].median[0] < 2 && !self.holding_zero {
            if self.zeros_acc > 0 {
                if value == 0 {
                    self.zeros_acc += 1;
                    return;
                }
                self.flush();
            } else if value != 0 {
                self.bits.put_bit(false);
            } else {
                self.channels[0].median = [0; 3];
                self.channels[1].median = [0; 3];
                self.zeros_acc = 1;
                return;
            }
        }

        let negative = value < 0;
        let value = if negative { !value } else { value } as u32;

        let c = &mut self.channels[channel];
        let (mut ones, low, high) = if value < c.get_med(0) {
            let high = c.get_med(0) - 1;
            c.dec_med(0, DIV0);
            (0, 0, high)
        } else {
            let mut low = c.get_med(0);
            c.inc_med(0, DIV0);

            if value - low < c.get_med(1) {
                let high = low + c.get_med(1) - 1;
                c.dec_med(1, DIV1);
                (1, low, high)
            } else {
                low += c.get_med(1);
                c.inc_med(1, DIV1);

                if value - low < c.get_med(2) {
                    let high = low + c.get_med(2) - 1;
                    c.dec_med(2, DIV2);
                    (2, low, high)
                } else {
                    let ones = 2 + (value - low) / c.get_med(2);
                    low += (ones - 2) * c.get_med(2);
                    let high = low + c.get_med(2) - 1;
                    c.inc_med(2, DIV2);
                    (ones, low, high)
                }
            }
        };

        if self.holding_zero {
            if ones > 0 {
                self.holding_one += 1;
            }
            self.flush();
            if ones > 0 {
                self.holding_zero = true;
                ones -= 1;
            } else {
                self.holding_zero = false;
            }
        } else {
            self.holding_zero = true;
        }
        self.holding_one = ones * 2;

        if high != low {
            let max_code = high - low;
            let code = value - low;
            let bit_count = count_bits(max_code);
            let extras = ((1u64 << bit_count) - max_code as u64 - 1) as u32;

            if code < extras {
                self.pend(code, bit_count - 1);
            } else {
                self.pend((code + extras) >> 1, bit_count - 1);
                self.pend((code + extras) & 1, 1);
            }
        }

        self.pend(negative as u32, 1);

        if !self.holding_zero {
            self.flush();
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.bits.finish()
    }
}

/// One decorrelation pass as the builder applies it.
#[derive(Debug, Clone, Copy)]
pub struct TestPass {
    pub term: i32,
    pub delta: i32,
    /// Stored weight byte, restored the same way the decoder does.
    pub weight: i8,
}

/// Stream layout and coding parameters.
#[derive(Debug, Clone)]
pub struct TestStream {
    pub channels: usize,
    pub bytes_per_sample: u32,
    pub sample_rate: u32,
    pub block_samples: usize,
    pub joint_stereo: bool,
    /// Passes in the order the decoder undoes them.
    pub passes: Vec<TestPass>,
    pub block_checksum: bool,
    pub declare_total: bool,
    pub channel_mask: u32,
    /// Log of the first stored history sample, 0 for silent history.
    /// Later slots step up by 0x40 and alternate in sign.
    pub history_log: i16,
}

impl Default for TestStream {
    fn default() -> Self {
        Self {
            channels: 2,
            bytes_per_sample: 2,
            sample_rate: 44100,
            block_samples: 1024,
            joint_stereo: true,
            passes: vec![
                TestPass {
                    term: 2,
                    delta: 2,
                    weight: 16,
                },
                TestPass {
                    term: 17,
                    delta: 2,
                    weight: 0,
                },
            ],
            block_checksum: true,
            declare_total: true,
            channel_mask: 0,
            history_log: 0,
        }
    }
}

const MEDIAN_LOG: u16 = 0x0800;

fn put_sub_block(out: &mut Vec<u8>, mut sub_id: u8, data: &[u8]) {
    let words = data.len().div_ceil(2);
    let odd = data.len() % 2 == 1;
    if odd {
        sub_id |= id::ODD_SIZE;
    }

    if words > 0xff {
        out.push(sub_id | id::LARGE);
        out.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
    } else {
        out.push(sub_id);
        out.push(words as u8);
    }

    out.extend_from_slice(data);
    if odd {
        out.push(0);
    }
}

/// Runs one same-channel pass. `seed` is the pass history, oldest first.
fn encode_pass(pass: &TestPass, seed: &[i32], channel: &mut [i32]) {
    let mut weight = restore_weight(pass.weight);
    let mut history = Vec::with_capacity(seed.len() + channel.len());
    history.extend_from_slice(seed);

    for sample in channel.iter_mut() {
        let n = history.len();
        let at = |back: usize| if n >= back { history[n - back] } else { 0 };

        let source = match pass.term {
            17 | 18 => extrapolate(pass.term, at(1), at(2)),
            term => at(term as usize),
        };

        let output = *sample;
        let residual = output.wrapping_sub(apply_weight(weight, source));
        update_weight(&mut weight, pass.delta, source, residual);
        history.push(output);
        *sample = residual;
    }
}

/// Runs one cross-channel pass over a stereo pair.
fn encode_cross_pass(
    pass: &TestPass,
    seed: &[Vec<i32>; 2],
    left: &mut [i32],
    right: &mut [i32],
) {
    let delta = pass.delta;
    let mut weight_a = restore_weight(pass.weight);
    let mut weight_b = weight_a;
    let mut prev_a = seed[0][0];
    let mut prev_b = seed[1][0];

    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let (out_l, out_r) = (*l, *r);

        match pass.term {
            -1 => {
                *l = out_l.wrapping_sub(apply_weight(weight_a, prev_a));
                update_weight_clip(&mut weight_a, delta, prev_a, *l);
                *r = out_r.wrapping_sub(apply_weight(weight_b, out_l));
                update_weight_clip(&mut weight_b, delta, out_l, *r);
                prev_a = out_r;
            }
            -2 => {
                *r = out_r.wrapping_sub(apply_weight(weight_b, prev_b));
                update_weight_clip(&mut weight_b, delta, prev_b, *r);
                *l = out_l.wrapping_sub(apply_weight(weight_a, out_r));
                update_weight_clip(&mut weight_a, delta, out_r, *l);
                prev_b = out_l;
            }
            _ => {
                *l = out_l.wrapping_sub(apply_weight(weight_a, prev_a));
                update_weight_clip(&mut weight_a, delta, prev_a, *l);
                *r = out_r.wrapping_sub(apply_weight(weight_b, prev_b));
                update_weight_clip(&mut weight_b, delta, prev_b, *r);
                prev_a = out_r;
                prev_b = out_l;
            }
        }
    }
}

impl TestStream {
    fn stereo_block_count(&self) -> usize {
        self.channels / 2
    }

    fn seed_log(&self, slot: usize) -> i16 {
        if self.history_log == 0 {
            return 0;
        }

        let log = self.history_log as i32 + 0x40 * slot as i32;
        (if slot % 2 == 1 { -log } else { log }) as i16
    }

    /// Builds the stored history words and the matching per-pass seeds,
    /// laid out the way the decoder reads them back.
    fn seed_history(&self, width: usize) -> (Vec<u8>, Vec<[Vec<i32>; 2]>) {
        let mut bytes = Vec::new();
        let mut seeds = vec![[Vec::new(), Vec::new()]; self.passes.len()];
        let mut slot = 0;
        let mut take = || {
            let log = self.seed_log(slot);
            slot += 1;
            bytes.extend_from_slice(&log.to_le_bytes());
            exp2s(log as i32)
        };

        for (pass, seed) in self.passes.iter().zip(seeds.iter_mut()).rev() {
            match pass.term {
                17 | 18 => {
                    for history in seed.iter_mut().take(width) {
                        let last = take();
                        let before_last = take();
                        *history = vec![before_last, last];
                    }
                }
                term if term < 0 => {
                    for history in seed.iter_mut() {
                        history.push(take());
                    }
                }
                term => {
                    for _ in 0..term {
                        for history in seed.iter_mut().take(width) {
                            history.push(take());
                        }
                    }
                }
            }
        }

        (bytes, seeds)
    }

    /// Encodes interleaved `samples` into a complete stream.
    pub fn encode(&self, samples: &[i32]) -> Vec<u8> {
        assert!(self.channels > 0 && samples.len() % self.channels == 0);
        let frames = samples.len() / self.channels;
        let mut out = Vec::new();

        let mut index = 0;
        while index < frames {
            let count = self.block_samples.min(frames - index);
            let frame: Vec<i32> =
                samples[index * self.channels..(index + count) * self.channels].to_vec();
            self.encode_frame(&frame, index as u64, count, frames as u64, &mut out);
            index += count;
        }

        out
    }

    fn encode_frame(&self, frame: &[i32], index: u64, count: usize, total: u64, out: &mut Vec<u8>) {
        let mut first_channel = 0;
        let block_count = self.stereo_block_count() + self.channels % 2;

        for block in 0..block_count {
            let width = if block < self.stereo_block_count() { 2 } else { 1 };
            let mut pcm = Vec::with_capacity(count * width);
            for i in 0..count {
                for ch in 0..width {
                    pcm.push(frame[i * self.channels + first_channel + ch]);
                }
            }

            let mut flags = self.bytes_per_sample - 1;
            if width == 1 {
                flags |= BlockFlags::MONO;
            } else if self.joint_stereo {
                flags |= BlockFlags::JOINT_STEREO;
            }
            if block == 0 {
                flags |= BlockFlags::INITIAL_BLOCK;
            }
            if block + 1 == block_count {
                flags |= BlockFlags::FINAL_BLOCK;
            }
            flags |= (self.bytes_per_sample * 8).min(31) << BlockFlags::MAG_LSB;
            let rate_index = SAMPLE_RATES
                .iter()
                .position(|&r| r == self.sample_rate)
                .unwrap_or(15) as u32;
            flags |= rate_index << BlockFlags::SRATE_LSB;

            let block_bytes = self.encode_block(&pcm, width, flags, index, count, total, block == 0);
            out.extend_from_slice(&block_bytes);
            first_channel += width;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_block(
        &self,
        pcm: &[i32],
        width: usize,
        flags: u32,
        index: u64,
        count: usize,
        total: u64,
        first: bool,
    ) -> Vec<u8> {
        let mut crc = SampleCrc::default();
        for &sample in pcm {
            crc.update(sample);
        }

        let mut channels: Vec<Vec<i32>> = (0..width)
            .map(|ch| pcm.iter().skip(ch).step_by(width).copied().collect())
            .collect();

        if width == 2 && self.joint_stereo {
            let (left, right) = channels.split_at_mut(1);
            for (l, r) in left[0].iter_mut().zip(right[0].iter_mut()) {
                *l = l.wrapping_sub(*r);
                *r = r.wrapping_add(*l >> 1);
            }
        }

        let (history, seeds) = self.seed_history(width);
        for (pass, seed) in self.passes.iter().zip(&seeds).rev() {
            if pass.term < 0 {
                assert_eq!(width, 2, "cross-channel term {} in a mono block", pass.term);
                let (left, right) = channels.split_at_mut(1);
                encode_cross_pass(pass, seed, &mut left[0], &mut right[0]);
            } else {
                for (channel, history) in channels.iter_mut().zip(seed.iter()) {
                    encode_pass(pass, history, channel);
                }
            }
        }

        let mut words = WordWriter::default();
        for channel in words.channels.iter_mut().take(width) {
            channel.median = [exp2s(MEDIAN_LOG as i32) as u32; 3];
        }
        for i in 0..count {
            for (ch, channel) in channels.iter().enumerate() {
                words.send_word(channel[i], ch);
            }
        }
        let bitstream = words.finish();

        let mut block = vec![0u8; BLOCK_HEADER_SIZE];
        block[..4].copy_from_slice(b"wvpk");
        block[8..10].copy_from_slice(&0x410u16.to_le_bytes());
        let declared = if self.declare_total { total as u32 } else { u32::MAX };
        block[12..16].copy_from_slice(&declared.to_le_bytes());
        block[16..20].copy_from_slice(&(index as u32).to_le_bytes());
        block[20..24].copy_from_slice(&(count as u32).to_le_bytes());
        block[24..28].copy_from_slice(&flags.to_le_bytes());
        block[28..32].copy_from_slice(&crc.value().to_le_bytes());

        let terms: Vec<u8> = self
            .passes
            .iter()
            .rev()
            .map(|p| ((p.term + 5) as u8 & 0x1f) | ((p.delta as u8) << 5))
            .collect();
        put_sub_block(&mut block, id::DECORR_TERMS, &terms);

        let weights: Vec<u8> = self
            .passes
            .iter()
            .rev()
            .flat_map(|p| std::iter::repeat_n(p.weight as u8, width))
            .collect();
        put_sub_block(&mut block, id::DECORR_WEIGHTS, &weights);

        put_sub_block(&mut block, id::DECORR_SAMPLES, &history);

        let medians: Vec<u8> = std::iter::repeat_n(MEDIAN_LOG.to_le_bytes(), 3 * width)
            .flatten()
            .collect();
        put_sub_block(&mut block, id::ENTROPY_VARS, &medians);

        if first && self.channels > 2 {
            let mut info = vec![self.channels as u8];
            info.extend_from_slice(&self.channel_mask.to_le_bytes());
            put_sub_block(&mut block, id::CHANNEL_INFO, &info);
        }

        if first && !SAMPLE_RATES.contains(&self.sample_rate) {
            put_sub_block(&mut block, id::SAMPLE_RATE, &self.sample_rate.to_le_bytes()[..3]);
        }

        put_sub_block(&mut block, id::WV_BITSTREAM, &bitstream);

        let checksum_len = if self.block_checksum { 6 } else { 0 };
        let ck_size = (block.len() + checksum_len - 8) as u32;
        block[4..8].copy_from_slice(&ck_size.to_le_bytes());

        if self.block_checksum {
            let csum = block_checksum(&block);
            put_sub_block(&mut block, id::BLOCK_CHECKSUM, &csum.to_le_bytes());
        }

        block
    }
}

/// Deterministic test signal: a short silence, then a distinct tone per
/// channel at half scale.
pub fn test_signal(channels: usize, frames: usize, bits: u32) -> Vec<i32> {
    let amplitude = ((1i64 << (bits - 1)) / 2) as f64;
    let mut samples = Vec::with_capacity(channels * frames);

    for i in 0..frames {
        for ch in 0..channels {
            let value = if i < 200 {
                0
            } else {
                let freq = 220.0 * (ch + 1) as f64;
                let phase = 2.0 * std::f64::consts::PI * freq * i as f64 / 44100.0;
                (amplitude * phase.sin()).round() as i32
            };
            samples.push(value);
        }
    }

    samples
}
