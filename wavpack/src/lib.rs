#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Streaming decoder for WavPack 4/5 bitstreams (stream versions 0x402 to
//! 0x410), producing RIFF/WAVE output.
//!
//! ### Bitstream Organization
//!
//! **External Structure**: A sequence of self-contained blocks, each starting
//! with the 32-byte `"wvpk"` header. Blocks with the same index form a frame
//! that covers every channel of the stream.
//! **Internal Structure**: Metadata sub-blocks carrying the decorrelation
//! program, entropy medians and the coded residual bitstream.
//!
//! ### Decoding Stages
//!
//! - Adaptive Golomb-like entropy decoding of residuals
//! - Inverse decorrelation passes with per-block seeded weights and history
//! - Joint stereo reconstruction and sample CRC verification
//! - Requantization to 8, 16, 24 or 32-bit output
//!
//! ## Quick Start
//!
//! Steps for processing a stream by hand:
//!
//! 1. Read frames using [`process::parse::FrameReader`]
//! 2. Decode frames to PCM using [`process::decode::Decoder`]
//! 3. Write PCM using [`wav::WAVWriter`]
//!
//! ```rust,no_run
//! use std::fs::File;
//! use wavpack::process::{decode::Decoder, parse::FrameReader};
//!
//! let mut frames = FrameReader::new(File::open("track.wv")?);
//! let mut decoder = Decoder::default();
//!
//! while let Some(frame) = frames.next_frame()? {
//!     let decoded = decoder.decode_frame(&frame)?;
//!     println!(
//!         "{} samples x {} channels at {} Hz",
//!         decoded.samples, decoded.channels, frame.sample_rate
//!     );
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Or let a [`process::session::DecodeSession`] drive the whole pipeline,
//! including progress, truncation and cancellation.

/// Processing pipeline for WavPack streams.
///
/// 1. **Block Extraction** ([`process::extract`]): Locates blocks in the byte
///    stream, skipping junk between them.
///
/// 2. **Parsing** ([`process::parse`]): Decodes block metadata and groups
///    blocks into frames.
///
/// 3. **Decoding** ([`process::decode`]): Reconstructs integer PCM.
///
/// 4. **Sessions** ([`process::session`]): One input to one WAV file with
///    progress reporting and typed outcomes.
pub mod process;

/// Data structures representing WavPack format components.
///
/// - **Block Headers** ([`structs::header`]): Fixed preamble and flags
/// - **Metadata** ([`structs::metadata`]): Sub-block framing and small records
/// - **Decorrelation** ([`structs::decorr`]): Prediction passes
/// - **Entropy Coding** ([`structs::entropy`]): Residual word reader
/// - **Blocks** ([`structs::block`]): Fully parsed blocks
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **Checksums** ([`utils::checksum`]): Sample CRC and block checksum
/// - **Error Handling** ([`utils::errors`]): Error types and kinds
/// - **Logarithms** ([`utils::log2`]): Fixed-point log/exp tables
/// - **Requantization** ([`utils::requantize`]): Output bit depth mapping
pub mod utils;

/// Little-endian serialisation helpers.
pub mod byteorder;

/// RIFF/WAVE output.
pub mod wav;
