use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};

use crate::log_or_err;
use crate::structs::header::{BLOCK_HEADER_SIZE, BLOCK_SIGNATURE, BlockHeader};
use crate::utils::errors::ReadError;

/// Extracts raw blocks from a WavPack byte stream.
///
/// Pulls from the underlying reader only as much as the current block
/// needs: 32 header bytes, then the declared remainder. Bytes that do not
/// start a plausible block header are skipped until the next `"wvpk"`
/// signature, so leading tags or damaged regions do not stop the stream.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use wavpack::process::extract::BlockReader;
///
/// let mut reader = BlockReader::new(File::open("track.wv")?);
/// while let Some(block) = reader.next_block()? {
///     println!("block at {} with {} bytes", block.offset, block.as_ref().len());
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct BlockReader<R: Read> {
    reader: R,
    buffer: VecDeque<u8>,
    eof: bool,
    /// Stream offset of the first buffered byte.
    position: u64,
    bytes_consumed: u64,
    blocks_read: u64,
    fail_level: log::Level,
}

impl<R: Read> BlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: VecDeque::with_capacity(BLOCK_HEADER_SIZE),
            eof: false,
            position: 0,
            bytes_consumed: 0,
            blocks_read: 0,
            fail_level: log::Level::Error,
        }
    }

    /// Sets the failure level for tolerated irregularities.
    ///
    /// - `log::Level::Error`: skipped junk is only logged (default)
    /// - `log::Level::Warn`: skipped junk fails the read (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    /// Bytes pulled from the underlying reader so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    fn fill(&mut self, want: usize) -> Result<bool> {
        while self.buffer.len() < want && !self.eof {
            let mut chunk = vec![0u8; want - self.buffer.len()];
            let n = match self.reader.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to read input at offset {}", self.bytes_consumed)
                    });
                }
            };

            if n == 0 {
                self.eof = true;
            }
            self.buffer.extend(&chunk[..n]);
            self.bytes_consumed += n as u64;
        }

        Ok(self.buffer.len() >= want)
    }

    fn consume_front(&mut self, cnt: usize) {
        self.buffer.drain(..cnt);
        self.position += cnt as u64;
    }

    /// Returns the next complete block, or `None` at the end of the stream.
    pub fn next_block(&mut self) -> Result<Option<RawBlock>> {
        let mut skipped = 0u64;

        loop {
            if !self.fill(BLOCK_HEADER_SIZE)? {
                return self.finish_stream(skipped);
            }

            let header = self.buffer.make_contiguous();
            let Some(block_len) = BlockHeader::probe(&header[..BLOCK_HEADER_SIZE]) else {
                // Next candidate is the next 'w' after the current front byte.
                let junk = header
                    .iter()
                    .skip(1)
                    .position(|&b| b == BLOCK_SIGNATURE[0])
                    .map_or(header.len(), |p| p + 1);
                self.consume_front(junk);
                skipped += junk as u64;
                continue;
            };

            if skipped > 0 {
                log_or_err!(
                    self,
                    log::Level::Warn,
                    anyhow!(ReadError::JunkSkipped {
                        skipped,
                        offset: self.position,
                    })
                );
            }

            if !self.fill(block_len)? {
                bail!(ReadError::TruncatedBlock {
                    offset: self.position,
                    declared: block_len,
                    available: self.buffer.len(),
                });
            }

            let block = RawBlock {
                offset: self.position,
                data: self.buffer.drain(..block_len).collect(),
            };
            self.position += block_len as u64;
            self.blocks_read += 1;

            debug!("Block {} at offset {}", self.blocks_read, block.offset);
            return Ok(Some(block));
        }
    }

    fn finish_stream(&mut self, skipped: u64) -> Result<Option<RawBlock>> {
        let remaining = self.buffer.len();
        if remaining >= BLOCK_SIGNATURE.len()
            && self.buffer.iter().take(4).eq(BLOCK_SIGNATURE.iter())
        {
            bail!(ReadError::TruncatedHeader(self.position));
        }

        let trailing = skipped + remaining as u64;
        if trailing > 0 {
            info!("Ignoring {trailing} trailing bytes after the last block");
        }
        self.consume_front(remaining);

        Ok(None)
    }
}

/// One block's bytes, header included.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// Stream offset of the block's first byte.
    pub offset: u64,
    pub data: Arc<[u8]>,
}

impl AsRef<[u8]> for RawBlock {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::{ErrorKind, ReadError};
    use crate::utils::test_stream::{TestStream, test_signal};
    use std::io::{Cursor, Seek};

    fn small_stream() -> Vec<u8> {
        let config = TestStream {
            block_samples: 256,
            ..Default::default()
        };
        config.encode(&test_signal(2, 1000, 16))
    }

    #[test]
    fn reads_blocks_back_to_back() -> Result<()> {
        let stream = small_stream();
        let mut reader = BlockReader::new(Cursor::new(&stream));

        let mut offsets = Vec::new();
        let mut total = 0;
        while let Some(block) = reader.next_block()? {
            assert_eq!(&block.as_ref()[..4], b"wvpk");
            offsets.push(block.offset);
            total += block.as_ref().len();
        }

        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], 0);
        assert_eq!(total, stream.len());
        assert_eq!(reader.bytes_consumed(), stream.len() as u64);

        Ok(())
    }

    #[test]
    fn reads_no_further_than_the_block() -> Result<()> {
        let stream = small_stream();
        let mut cursor = Cursor::new(&stream);
        let mut reader = BlockReader::new(&mut cursor);

        let first = reader.next_block()?.unwrap();
        drop(reader);
        assert_eq!(cursor.stream_position()?, first.as_ref().len() as u64);

        Ok(())
    }

    #[test]
    fn skips_leading_junk() -> Result<()> {
        let mut stream = b"ID3\x04junkwv".to_vec();
        stream.extend_from_slice(&small_stream());

        let mut reader = BlockReader::new(Cursor::new(&stream));
        let block = reader.next_block()?.unwrap();
        assert_eq!(block.offset, 10);

        let mut strict = BlockReader::new(Cursor::new(&stream));
        strict.set_fail_level(log::Level::Warn);
        let err = strict.next_block().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReadError>(),
            Some(ReadError::JunkSkipped {
                skipped: 10,
                offset: 10
            })
        ));

        Ok(())
    }

    #[test]
    fn truncated_block_and_header() {
        let stream = small_stream();

        let mut reader = BlockReader::new(Cursor::new(&stream[..stream.len() - 3]));
        let err = loop {
            match reader.next_block() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("truncation not detected"),
                Err(e) => break e,
            }
        };
        assert_eq!(ErrorKind::of(&err), ErrorKind::TruncatedStream);

        let mut reader = BlockReader::new(Cursor::new(&stream[..20]));
        let err = reader.next_block().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReadError>(),
            Some(ReadError::TruncatedHeader(0))
        ));
    }

    #[test]
    fn trailing_tag_is_ignored() -> Result<()> {
        let mut stream = small_stream();
        stream.extend_from_slice(b"APETAGEX trailing metadata");

        let mut reader = BlockReader::new(Cursor::new(&stream));
        let mut count = 0;
        while reader.next_block()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 4);

        Ok(())
    }
}
