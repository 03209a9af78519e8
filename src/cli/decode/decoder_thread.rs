use crate::input::InputReader;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use wavpack::process::session::{DecodeOptions, DecodeSession, SessionOutcome};

pub struct DecoderThreadConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub options: DecodeOptions,
    /// Receives progress fractions.
    pub tx: mpsc::Sender<f64>,
}

/// Runs one decode session off the main thread.
///
/// File inputs go through [`DecodeSession::run_files`] so path checks and
/// cleanup apply; stdin is streamed through [`DecodeSession::run`].
pub fn spawn_decoder_thread(config: DecoderThreadConfig) -> thread::JoinHandle<Result<SessionOutcome>> {
    thread::spawn(move || -> Result<SessionOutcome> {
        let DecoderThreadConfig {
            input_path,
            output_path,
            options,
            tx,
        } = config;

        let mut session = DecodeSession::new(options).on_progress(move |fraction| {
            // The receiver only disappears once the foreground gave up.
            let _ = tx.send(fraction);
        });

        if !crate::input::is_pipe(&input_path) {
            return Ok(session.run_files(&input_path, &output_path));
        }

        let input = InputReader::new(&input_path)?;
        let input_len = input.byte_len();
        let output = File::create(&output_path)
            .with_context(|| format!("Failed to create output {}", output_path.display()))?;

        let outcome = session.run(input, input_len, BufWriter::new(output));

        log::debug!("Stdin decode finished in state {:?}", outcome.state());
        Ok(outcome)
    })
}
