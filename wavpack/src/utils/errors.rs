use std::fmt;
use std::io;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

/// Failure classes surfaced by a decode session.
///
/// Every typed error in this module maps onto exactly one kind; see
/// [`ErrorKind::of`] for classifying an [`anyhow::Error`] chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    TruncatedStream,
    MalformedHeader,
    EntropyDesync,
    UnsupportedFeature,
    IoError,
}

impl ErrorKind {
    /// Walks the error chain outermost-first and returns the kind of the
    /// first typed cause found. Untyped errors are treated as I/O failures.
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ReadError>() {
                return e.kind();
            }
            if let Some(e) = cause.downcast_ref::<HeaderError>() {
                return e.kind();
            }
            if let Some(e) = cause.downcast_ref::<MetadataError>() {
                return e.kind();
            }
            if let Some(e) = cause.downcast_ref::<EntropyError>() {
                return e.kind();
            }
            if let Some(e) = cause.downcast_ref::<DecodeError>() {
                return e.kind();
            }
            if let Some(e) = cause.downcast_ref::<SessionError>() {
                return e.kind();
            }
            if cause.downcast_ref::<WavError>().is_some() || cause.is::<io::Error>() {
                return ErrorKind::IoError;
            }
        }

        ErrorKind::IoError
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidParameter => "Invalid parameter",
            ErrorKind::TruncatedStream => "Truncated stream",
            ErrorKind::MalformedHeader => "Malformed header",
            ErrorKind::EntropyDesync => "Entropy decoder desync",
            ErrorKind::UnsupportedFeature => "Unsupported feature",
            ErrorKind::IoError => "I/O error",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Block at offset {offset} declares {declared} bytes but only {available} remain")]
    TruncatedBlock {
        offset: u64,
        declared: usize,
        available: usize,
    },

    #[error("Stream ends inside a block header at offset {0}")]
    TruncatedHeader(u64),

    #[error("Stream ended after {decoded} of {declared} samples")]
    EarlyEnd { decoded: u64, declared: u64 },

    #[error("Skipped {skipped} bytes of non-block data before offset {offset}")]
    JunkSkipped { skipped: u64, offset: u64 },

    #[error("No WavPack blocks found in input")]
    NoBlocks,
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::JunkSkipped { .. } | ReadError::NoBlocks => ErrorKind::MalformedHeader,
            _ => ErrorKind::TruncatedStream,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Block does not start with the 'wvpk' signature")]
    BadSignature,

    #[error("Block size must be even and between 32 and 16 MiB. Read {0}")]
    InvalidBlockSize(u32),

    #[error("Stream version {0:#06x} is not supported (0x402..=0x410)")]
    UnsupportedVersion(u16),

    #[error("DSD audio blocks are not supported")]
    DsdAudio,

    #[error("block_samples must not exceed {max}. Read {actual}")]
    TooManySamples { actual: u32, max: u32 },

    #[error("Block {index} inside a frame declares {found} samples, expected {expected}")]
    SampleCountMismatch {
        index: u64,
        found: u32,
        expected: u32,
    },

    #[error("Block index {found} inside a frame does not match frame index {expected}")]
    BlockIndexMismatch { found: u64, expected: u64 },

    #[error("Block index jumps from {expected} to {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("Frame at index {0} is not terminated by a final block")]
    UnterminatedFrame(u64),

    #[error("Block at index {0} continues a frame that was never started")]
    OrphanBlock(u64),

    #[error("Frame carries {0} channels, more than the supported 4096")]
    TooManyChannels(usize),

    #[error("Channel count changed from {expected} to {found}")]
    ChannelCountChanged { expected: usize, found: usize },

    #[error("Channel info declares {declared} channels but blocks carry {found}")]
    ChannelInfoMismatch { declared: usize, found: usize },

    #[error("Block checksum mismatch: computed {computed:#x}, stored {stored:#x}")]
    ChecksumMismatch { computed: u32, stored: u32 },

    #[error("Block flags {0:#010x} mark mono data as false stereo")]
    MonoFalseStereo(u32),
}

impl HeaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeaderError::UnsupportedVersion(_) | HeaderError::DsdAudio => {
                ErrorKind::UnsupportedFeature
            }
            _ => ErrorKind::MalformedHeader,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("Sub-block {id:#04x} at offset {offset} needs {size} bytes, {remaining} remain")]
    Overrun {
        id: u8,
        offset: usize,
        size: usize,
        remaining: usize,
    },

    #[error("Sub-block {id:#04x} has invalid length {len}")]
    InvalidLength { id: u8, len: usize },

    #[error("Decorrelation program has {0} terms, at most 16 are allowed")]
    TooManyTerms(usize),

    #[error("Decorrelation term {0} is not recognised")]
    UnknownTerm(i32),

    #[error("Cross-channel decorrelation term {0} in a mono block")]
    CrossTermInMono(i32),

    #[error("{found} decorrelation weights for {terms} terms")]
    TooManyWeights { found: usize, terms: usize },

    #[error("Decorrelation history leaves {0} bytes unconsumed")]
    SamplesNotConsumed(usize),

    #[error("Hybrid profile leaves {0} bytes unconsumed")]
    ProfileNotConsumed(usize),

    #[error("Unknown metadata sub-block {0:#04x}")]
    UnknownId(u8),

    #[error("Unknown optional metadata sub-block {0:#04x} skipped")]
    UnknownOptionalId(u8),

    #[error("{0} is not supported")]
    UnsupportedStream(&'static str),

    #[error("Required metadata missing: {0}")]
    Missing(&'static str),

    #[error("Invalid channel info: {0}")]
    InvalidChannelInfo(&'static str),
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::UnknownTerm(_)
            | MetadataError::UnknownId(_)
            | MetadataError::UnsupportedStream(_) => ErrorKind::UnsupportedFeature,
            _ => ErrorKind::MalformedHeader,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EntropyError {
    #[error("Bitstream exhausted at sample {sample} of channel {channel}")]
    BitstreamExhausted { sample: usize, channel: usize },

    #[error("Unary prefix exceeds {0} bits")]
    RunawayCode(u32),

    #[error("Sample CRC mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    CrcMismatch { computed: u32, stored: u32 },

    #[error("Sample {sample} magnitude {value} exceeds limit {limit}")]
    MuteLimitExceeded {
        sample: usize,
        value: i64,
        limit: i64,
    },
}

impl EntropyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::EntropyDesync
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("32-bit integer data with {0} bits in an extension stream")]
    ExtendedIntegerBits(u8),
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UnsupportedFeature
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Invalid bits per sample {0} (must be 8, 16, 24, or 32)")]
    InvalidBitDepth(u32),

    #[error("Invalid max samples {0} (must be -1 for no limit or non-negative)")]
    InvalidMaxSamples(i64),

    #[error("{0} path is empty")]
    EmptyPath(&'static str),

    #[error("Input and output refer to the same path")]
    SamePath,

    #[error("Audio data size {0} bytes exceeds the 32-bit container limit")]
    OutputTooLarge(u64),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidParameter
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WavError {
    #[error("Audio data size {0} bytes exceeds the 32-bit container limit")]
    DataTooLarge(u64),

    #[error("Cannot write samples before the header")]
    HeaderNotWritten,

    #[error("Sample data of {len} bytes is not a whole number of {block_align}-byte frames")]
    PartialFrame { len: usize, block_align: usize },
}
