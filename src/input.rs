use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

/// Unified input reader that handles both file and pipe input with buffered reading
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
    len: Option<u64>,
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let input_path = input_path.as_ref();
        let is_pipe = is_pipe(input_path);

        if is_pipe {
            return Ok(Self {
                reader: Box::new(io::stdin().lock()),
                is_pipe,
                len: None,
            });
        }

        let file = File::open(input_path)
            .with_context(|| format!("Failed to open input {}", input_path.display()))?;
        let len = file.metadata().ok().map(|m| m.len());

        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            is_pipe,
            len,
        })
    }

    /// Check if this is pipe input
    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }

    /// Input size in bytes, unknown for pipes
    pub fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

impl Read for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

pub fn is_pipe(input_path: &Path) -> bool {
    input_path.as_os_str() == "-"
}
