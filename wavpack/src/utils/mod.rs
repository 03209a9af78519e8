//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, checksums, fixed-point logarithms, error
//! handling and output requantization.

pub mod bitstream_io;
pub mod checksum;
pub mod errors;
pub mod log2;
pub mod requantize;

#[cfg(test)]
pub mod test_stream;
