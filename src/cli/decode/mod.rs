mod decode_impl;
pub mod decoder_thread;
pub mod progress;

// Re-export the main decode function
pub use decode_impl::cmd_decode;
