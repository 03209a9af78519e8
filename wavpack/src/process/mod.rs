/// Block extraction from WavPack byte streams.
///
/// Provides the [`BlockReader`](extract::BlockReader) for locating `"wvpk"`
/// headers and reading [`RawBlock`](extract::RawBlock)s one at a time.
pub mod extract;

/// Block parsing and frame assembly.
///
/// Provides the [`Parser`](parse::Parser) for turning raw blocks into
/// [`Block`](crate::structs::block::Block)s and the
/// [`FrameReader`](parse::FrameReader) for grouping them into
/// [`Frame`](parse::Frame)s.
pub mod parse;

/// Frame decoding to PCM samples.
///
/// Provides the [`Decoder`](decode::Decoder) for converting frames into
/// [`DecodedFrame`](decode::DecodedFrame)s of interleaved integer PCM.
pub mod decode;

/// End-to-end decode sessions.
///
/// Provides the [`DecodeSession`](session::DecodeSession) state machine and
/// the [`decode_file`](session::decode_file) boundary function.
pub mod session;
