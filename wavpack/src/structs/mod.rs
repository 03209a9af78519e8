//! Data structures representing format components.
//!
//! Contains structured representations of bitstream elements including
//! block headers, metadata sub-blocks, decorrelation programs and entropy
//! coder state used throughout the decoding pipeline.

pub mod block;
pub mod decorr;
pub mod entropy;
pub mod header;
pub mod metadata;
