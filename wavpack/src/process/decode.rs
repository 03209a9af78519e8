use anyhow::{Context, Result, bail};
use log::trace;

use crate::process::parse::Frame;
use crate::structs::block::Block;
use crate::structs::entropy::WordReader;
use crate::structs::header::BlockFlags;
use crate::structs::metadata::{FloatInfo, Int32Info};
use crate::utils::checksum::SampleCrc;
use crate::utils::errors::EntropyError;

/// Float streams are normalised to this many integer bits.
pub const FLOAT_SOURCE_BITS: u32 = 24;

const FLOAT_MAX: i64 = (1 << (FLOAT_SOURCE_BITS - 1)) - 1;
const FLOAT_MIN: i64 = -(1 << (FLOAT_SOURCE_BITS - 1));

/// Decodes frames to full-precision interleaved integer PCM.
///
/// Every block is decoded from its own seeded state; nothing but a scratch
/// buffer survives from one block to the next.
#[derive(Default)]
pub struct Decoder {
    buffer: Vec<i32>,
    blocks_decoded: u64,
}

impl Decoder {
    /// Decodes every block of `frame` and interleaves their channels in
    /// block order.
    pub fn decode_frame(&mut self, frame: &Frame) -> Result<DecodedFrame> {
        let samples = frame.samples as usize;
        let mut pcm = vec![0i32; samples * frame.channels];
        let mut first_channel = 0;

        for block in &frame.blocks {
            decode_block(block, &mut self.buffer).with_context(|| {
                format!(
                    "Failed to decode block at offset {} (index {})",
                    block.offset, block.header.block_index
                )
            })?;
            self.blocks_decoded += 1;

            let width = block.channels();
            for (i, chunk) in self.buffer.chunks_exact(width).enumerate() {
                let at = i * frame.channels + first_channel;
                pcm[at..at + width].copy_from_slice(chunk);
            }
            first_channel += width;
        }

        Ok(DecodedFrame {
            index: frame.index,
            samples,
            channels: frame.channels,
            pcm,
            source_bits: frame.source_bits(),
        })
    }

    pub fn blocks_decoded(&self) -> u64 {
        self.blocks_decoded
    }
}

/// Decoded PCM of one frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Stream sample index of the first sample.
    pub index: u64,

    /// Samples per channel.
    pub samples: usize,

    pub channels: usize,

    /// Interleaved samples, `samples * channels` long.
    pub pcm: Vec<i32>,

    /// Significant bits of every value in `pcm`.
    pub source_bits: u32,
}

/// Decodes one block into `buffer` as interleaved samples of
/// `block.channels()` channels.
pub fn decode_block(block: &Block, buffer: &mut Vec<i32>) -> Result<()> {
    let flags = block.header.flags;
    let samples = block.header.block_samples as usize;
    let width = if flags.mono_data() { 1 } else { 2 };

    buffer.clear();
    buffer.resize(samples * width, 0);

    let mut words = WordReader::new(block.bitstream(), block.entropy, flags);
    for frame in buffer.chunks_exact_mut(width) {
        for (channel, sample) in frame.iter_mut().enumerate() {
            *sample = words.get_word(channel)?;
        }
    }
    trace!(
        "Block {}: {} bits left in bitstream",
        block.header.block_index,
        words.remaining_bits()
    );

    let mut program = block.program.clone();
    if width == 1 {
        program.apply_mono(buffer);
    } else {
        program.apply_stereo(buffer);
        if flags.joint_stereo() {
            for frame in buffer.chunks_exact_mut(2) {
                frame[1] = frame[1].wrapping_sub(frame[0] >> 1);
                frame[0] = frame[0].wrapping_add(frame[1]);
            }
        }
    }

    check_mute_limit(flags, buffer, width)?;

    let mut crc = SampleCrc::default();
    for &sample in buffer.iter() {
        crc.update(sample);
    }
    if crc.value() != block.header.crc {
        bail!(EntropyError::CrcMismatch {
            computed: crc.value(),
            stored: block.header.crc,
        });
    }

    fixup(block, buffer);

    if flags.false_stereo() {
        let mono = std::mem::take(buffer);
        buffer.extend(mono.iter().flat_map(|&s| [s, s]));
    }

    Ok(())
}

/// Rejects reconstructed magnitudes the declared sample width cannot hold.
fn check_mute_limit(flags: BlockFlags, buffer: &[i32], width: usize) -> Result<()> {
    let mut limit = (1i64 << flags.magnitude()) + 2;
    if flags.hybrid() {
        limit *= 2;
    }

    if let Some(i) = buffer.iter().position(|&s| (s as i64).abs() > limit) {
        bail!(EntropyError::MuteLimitExceeded {
            sample: i / width,
            value: buffer[i] as i64,
            limit,
        });
    }

    Ok(())
}

/// Restores the stored integers to their output scale.
fn fixup(block: &Block, buffer: &mut [i32]) {
    let flags = block.header.flags;

    if flags.float_data() {
        if let Some(info) = block.float_info {
            normalise_float(info, buffer);
        }
        return;
    }

    let mut shift = flags.shift();
    if flags.int32_data() {
        if let Some(info) = block.int32_info {
            expand_int32(info, buffer);
            shift += (info.zeros + info.sent_bits + info.ones + info.dups) as u32;
        }
    }

    if flags.hybrid() {
        clip_hybrid(flags.bytes_per_sample(), shift, buffer);
    } else if shift > 0 {
        for sample in buffer.iter_mut() {
            *sample = sample.checked_shl(shift).unwrap_or(0);
        }
    }
}

fn expand_int32(info: Int32Info, buffer: &mut [i32]) {
    let Int32Info {
        zeros, ones, dups, ..
    } = info;

    if zeros == 0 && ones == 0 && dups == 0 {
        return;
    }

    for sample in buffer.iter_mut() {
        let s = *sample;
        *sample = if zeros > 0 {
            s.wrapping_shl(zeros as u32)
        } else if ones > 0 {
            (s.wrapping_add(1).wrapping_shl(ones as u32)).wrapping_sub(1)
        } else {
            let odd = s & 1;
            (s.wrapping_add(odd).wrapping_shl(dups as u32)).wrapping_sub(odd)
        };
    }
}

/// Lossy samples outside the stored width clip to its limits.
fn clip_hybrid(bytes_per_sample: u32, shift: u32, buffer: &mut [i32]) {
    let (min, max) = match bytes_per_sample {
        1 => (-0x80, 0x7f),
        2 => (-0x8000, 0x7fff),
        3 => (-0x80_0000, 0x7f_ffff),
        _ => (i32::MIN, i32::MAX),
    };

    let shift = shift.min(31);
    let (min_value, max_value) = (min >> shift, max >> shift);
    let (min_shifted, max_shifted) = (min_value << shift, max_value << shift);

    for sample in buffer.iter_mut() {
        *sample = if *sample < min_value {
            min_shifted
        } else if *sample > max_value {
            max_shifted
        } else {
            *sample << shift
        };
    }
}

fn normalise_float(info: FloatInfo, buffer: &mut [i32]) {
    let shift = (info.shift as i32 + info.max_exp as i32 - info.norm_exp as i32).clamp(-32, 32);

    for sample in buffer.iter_mut() {
        let value = *sample as i64;
        let value = if shift >= 0 {
            value << shift
        } else {
            value >> -shift
        };
        *sample = value.clamp(FLOAT_MIN, FLOAT_MAX) as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::extract::{BlockReader, RawBlock};
    use crate::process::parse::{FrameReader, Parser};
    use crate::utils::errors::{ErrorKind, HeaderError};
    use crate::utils::test_stream::{TestPass, TestStream, test_signal};
    use std::io::Cursor;

    fn decode_all(stream: &[u8]) -> Result<Vec<i32>> {
        let mut frames = FrameReader::new(Cursor::new(stream));
        let mut decoder = Decoder::default();
        let mut pcm = Vec::new();

        while let Some(frame) = frames.next_frame()? {
            pcm.extend(decoder.decode_frame(&frame)?.pcm);
        }
        Ok(pcm)
    }

    fn first_raw_block(stream: &[u8]) -> RawBlock {
        BlockReader::new(Cursor::new(stream))
            .next_block()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn lossless_stereo_round_trip() -> Result<()> {
        let signal = test_signal(2, 3000, 16);
        let stream = TestStream::default().encode(&signal);

        assert_eq!(decode_all(&stream)?, signal);
        Ok(())
    }

    #[test]
    fn lossless_multichannel_round_trip() -> Result<()> {
        let config = TestStream {
            channels: 5,
            bytes_per_sample: 3,
            block_samples: 700,
            joint_stereo: false,
            passes: vec![
                TestPass {
                    term: 3,
                    delta: 3,
                    weight: -8,
                },
                TestPass {
                    term: 18,
                    delta: 2,
                    weight: 40,
                },
                TestPass {
                    term: 1,
                    delta: 2,
                    weight: 100,
                },
            ],
            ..Default::default()
        };
        let signal = test_signal(5, 2000, 24);
        let stream = config.encode(&signal);

        let mut frames = FrameReader::new(Cursor::new(&stream));
        let frame = frames.next_frame()?.unwrap();
        assert_eq!(frame.source_bits(), 24);

        assert_eq!(decode_all(&stream)?, signal);
        Ok(())
    }

    #[test]
    fn cross_channel_terms_with_seeded_history() -> Result<()> {
        let pass = |term, delta, weight| TestPass {
            term,
            delta,
            weight,
        };
        let signal = test_signal(2, 2500, 16);

        for joint_stereo in [true, false] {
            let config = TestStream {
                block_samples: 900,
                joint_stereo,
                passes: vec![
                    pass(-1, 2, 24),
                    pass(-2, 3, -40),
                    pass(-3, 2, 127),
                    pass(2, 2, 16),
                    pass(17, 1, -6),
                ],
                history_log: 0x0500,
                ..Default::default()
            };
            let stream = config.encode(&signal);

            let block = Parser::default().parse(&first_raw_block(&stream))?;
            let terms: Vec<i32> = block.program.passes.iter().map(|p| p.term).collect();
            assert_eq!(terms, [-1, -2, -3, 2, 17]);
            assert!(block.program.passes.iter().all(|p| p.samples_a[0] != 0));
            assert!(block.program.passes.iter().all(|p| p.samples_b[0] != 0));

            assert_eq!(decode_all(&stream)?, signal, "joint stereo {joint_stereo}");
        }

        Ok(())
    }

    #[test]
    fn payload_bit_flips_are_detected() -> Result<()> {
        let config = TestStream {
            block_checksum: false,
            ..Default::default()
        };
        let signal = test_signal(2, 1024, 16);
        let stream = config.encode(&signal);

        let raw = first_raw_block(&stream);
        let bitstream_len = Parser::default().parse(&raw)?.bitstream().len();
        let start = stream.len() - bitstream_len;

        for step in 1..=5 {
            let at = start + bitstream_len * step / 7;
            let mut damaged = stream.clone();
            damaged[at] ^= 0x08;

            let err = decode_all(&damaged).unwrap_err();
            let kind = ErrorKind::of(&err);
            assert!(
                kind == ErrorKind::EntropyDesync || kind == ErrorKind::MalformedHeader,
                "flip at {at}: {kind}"
            );
        }

        Ok(())
    }

    #[test]
    fn mono_block_flagged_false_stereo_is_rejected() {
        let config = TestStream {
            channels: 1,
            block_checksum: false,
            ..Default::default()
        };
        let mut stream = config.encode(&test_signal(1, 300, 16));
        let flags = u32::from_le_bytes([stream[24], stream[25], stream[26], stream[27]]);
        assert!(BlockFlags(flags).mono_data());
        stream[24..28].copy_from_slice(&(flags | BlockFlags::FALSE_STEREO).to_le_bytes());

        let err = decode_all(&stream).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<HeaderError>(),
            Some(HeaderError::MonoFalseStereo(_))
        ));
        assert_eq!(ErrorKind::of(&err), ErrorKind::MalformedHeader);
    }

    #[test]
    fn header_crc_mismatch() {
        let config = TestStream {
            block_checksum: false,
            ..Default::default()
        };
        let mut stream = config.encode(&test_signal(2, 500, 16));
        stream[28] ^= 0x01;

        let err = decode_all(&stream).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<EntropyError>(),
            Some(EntropyError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn mute_limit() {
        let flags = BlockFlags(1 | (16 << BlockFlags::MAG_LSB));
        assert!(check_mute_limit(flags, &[65538, -65538], 2).is_ok());

        let err = check_mute_limit(flags, &[0, 0, 0, -65539], 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EntropyError>(),
            Some(EntropyError::MuteLimitExceeded {
                sample: 1,
                value: -65539,
                limit: 65538
            })
        ));

        let hybrid = BlockFlags(flags.0 | BlockFlags::HYBRID);
        assert!(check_mute_limit(hybrid, &[131076], 1).is_ok());
    }

    #[test]
    fn int32_fill_bits() {
        let mut zeros = [3, -3];
        expand_int32(
            Int32Info {
                zeros: 2,
                ..Default::default()
            },
            &mut zeros,
        );
        assert_eq!(zeros, [12, -12]);

        let mut ones = [3, -3];
        expand_int32(
            Int32Info {
                ones: 2,
                ..Default::default()
            },
            &mut ones,
        );
        assert_eq!(ones, [15, -9]);

        let mut dups = [2, 3];
        expand_int32(
            Int32Info {
                dups: 2,
                ..Default::default()
            },
            &mut dups,
        );
        assert_eq!(dups, [8, 15]);
    }

    #[test]
    fn hybrid_output_clips_to_stored_width() {
        let mut samples = [200, -200, 100, -5];
        clip_hybrid(1, 0, &mut samples);
        assert_eq!(samples, [127, -128, 100, -5]);

        let mut samples = [40, -40, 10];
        clip_hybrid(1, 2, &mut samples);
        assert_eq!(samples, [124, -128, 40]);
    }

    #[test]
    fn float_normalisation() {
        let info = FloatInfo {
            flags: 0,
            shift: 0,
            max_exp: 127,
            norm_exp: 127,
        };
        let mut samples = [0x40_0000, -0x80_0000, 0x100_0000];
        normalise_float(info, &mut samples);
        assert_eq!(samples, [0x40_0000, -0x80_0000, 0x7f_ffff]);

        let quieter = FloatInfo {
            max_exp: 125,
            ..info
        };
        let mut samples = [0x40_0000, -3];
        normalise_float(quieter, &mut samples);
        assert_eq!(samples, [0x10_0000, -1]);
    }
}
