//! RIFF/WAVE writer for decoded PCM.
//!
//! Sizes are written as placeholders by [`WAVWriter::write_header`] and
//! patched from the bytes actually written in [`WAVWriter::finish`], so a
//! decode that stops early still leaves a well-formed file.

use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use wavpack_macros::{ToBytes, riff_chunk};

use crate::join_bytes_le;
use crate::utils::errors::WavError;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

/// KSDATAFORMAT_SUBTYPE_PCM
pub const PCM_SUBFORMAT_GUID: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

pub trait RiffChunk {
    fn chunk_id(&self) -> &[u8; 4];
    fn chunk_body(&self) -> Vec<u8>;

    /// Id, length and body, padded to an even length.
    fn to_chunk_bytes(&self) -> Vec<u8> {
        let body = self.chunk_body();
        let mut bytes = join_bytes_le!(*self.chunk_id(), body.len() as u32);
        bytes.extend_from_slice(&body);
        if body.len() % 2 == 1 {
            bytes.push(0);
        }
        bytes
    }
}

#[riff_chunk(b"fmt ")]
#[derive(ToBytes, Debug, Clone, PartialEq, Eq)]
pub struct FmtChunk {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

#[riff_chunk(b"fmt ")]
#[derive(ToBytes, Debug, Clone, PartialEq, Eq)]
pub struct FmtExtensibleChunk {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extension_size: u16,
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: [u8; 16],
}

/// Layout of the PCM written to the data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub channel_mask: u32,
}

impl WavFormat {
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Plain PCM only covers mono/stereo up to 16 bits.
    pub fn is_extensible(&self) -> bool {
        self.channels > 2 || self.bits_per_sample > 16
    }

    fn fmt_chunk_bytes(&self) -> Vec<u8> {
        let block_align = self.block_align() as u16;
        let byte_rate = self.sample_rate.saturating_mul(block_align as u32);

        if self.is_extensible() {
            FmtExtensibleChunk {
                format_tag: WAVE_FORMAT_EXTENSIBLE,
                channels: self.channels,
                sample_rate: self.sample_rate,
                byte_rate,
                block_align,
                bits_per_sample: self.bits_per_sample,
                extension_size: 22,
                valid_bits_per_sample: self.bits_per_sample,
                channel_mask: self.channel_mask,
                sub_format: PCM_SUBFORMAT_GUID,
            }
            .to_chunk_bytes()
        } else {
            FmtChunk {
                format_tag: WAVE_FORMAT_PCM,
                channels: self.channels,
                sample_rate: self.sample_rate,
                byte_rate,
                block_align,
                bits_per_sample: self.bits_per_sample,
            }
            .to_chunk_bytes()
        }
    }

    /// Bytes before the first sample.
    pub fn header_len(&self) -> u64 {
        12 + self.fmt_chunk_bytes().len() as u64 + 8
    }

    /// Largest data chunk that keeps the RIFF size within 32 bits.
    pub fn max_data_bytes(&self) -> u64 {
        u32::MAX as u64 - (self.header_len() - 8) - 1
    }
}

pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    format: WavFormat,
    header_written: bool,
    finished: bool,
    riff_size_position: u64,
    data_size_position: u64,
    data_written: u64,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W, format: WavFormat) -> Self {
        Self {
            writer: BufWriter::new(writer),
            format,
            header_written: false,
            finished: false,
            riff_size_position: 0,
            data_size_position: 0,
            data_written: 0,
        }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        self.riff_size_position = self.writer.stream_position()? + 4;
        self.writer
            .write_all(&join_bytes_le!(*b"RIFF", 0u32, *b"WAVE"))?;
        self.writer.write_all(&self.format.fmt_chunk_bytes())?;

        self.data_size_position = self.writer.stream_position()? + 4;
        self.writer.write_all(&join_bytes_le!(*b"data", 0u32))?;

        self.header_written = true;
        Ok(())
    }

    /// Appends interleaved little-endian PCM. `bytes` must hold whole frames.
    pub fn write_samples(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.header_written {
            return Err(io::Error::other(WavError::HeaderNotWritten));
        }

        let block_align = self.format.block_align();
        if block_align == 0 || bytes.len() % block_align != 0 {
            return Err(io::Error::other(WavError::PartialFrame {
                len: bytes.len(),
                block_align,
            }));
        }

        let total = self.data_written + bytes.len() as u64;
        if total > self.format.max_data_bytes() {
            return Err(io::Error::other(WavError::DataTooLarge(total)));
        }

        self.writer.write_all(bytes)?;
        self.data_written = total;
        Ok(())
    }

    /// Pads the data chunk and patches both size fields. Calling it again is
    /// a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.header_written || self.finished {
            return Ok(());
        }

        if self.data_written % 2 == 1 {
            self.writer.write_all(&[0])?;
        }
        self.writer.flush()?;

        let end = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(self.data_size_position))?;
        self.writer
            .write_all(&(self.data_written as u32).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(self.riff_size_position))?;
        self.writer
            .write_all(&((end - self.riff_size_position - 4) as u32).to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;

        self.finished = true;
        Ok(())
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    pub fn stats(&self) -> WAVStats {
        WAVStats {
            data_written: self.data_written,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels as u32,
            bits_per_sample: self.format.bits_per_sample as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WAVStats {
    pub data_written: u64,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
}
