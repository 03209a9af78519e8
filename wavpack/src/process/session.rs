//! Decode sessions: one input stream to one WAV output.
//!
//! A [`DecodeSession`] drives the pipeline frame by frame:
//! `Idle → Parsing(i) → Decoding(i) → Emitting(i)`, then either the next
//! frame or one of the terminal states `Completed`, `Truncated`, `Cancelled`
//! and `Failed`. The WAV header is finalised on every exit path, so an early
//! stop still leaves a valid file covering exactly the samples written.
//!
//! Outcomes stay typed inside the library; [`decode_file`] flattens them to
//! `"Success"` or a failure message at the outermost boundary.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};

use crate::process::decode::Decoder;
use crate::process::parse::FrameReader;
use crate::utils::errors::{ErrorKind, ReadError, SessionError};
use crate::utils::requantize::{OutputBitDepth, Requantizer};
use crate::wav::{WAVWriter, WavFormat};

/// Terminal message for every successful outcome.
pub const SUCCESS: &str = "Success";

/// `max_samples` value meaning "decode everything".
pub const NO_LIMIT: i64 = -1;

/// Minimum growth of the progress fraction between two reports.
pub const PROGRESS_STEP: f64 = 0.01;

/// Highest fraction reported before a decode has completed.
const PROGRESS_CEILING: f64 = 0.999;

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Samples per channel to write, or [`NO_LIMIT`].
    pub max_samples: i64,

    /// Output bits per sample: 8, 16, 24 or 32.
    pub bit_depth: u32,

    /// Include the full error chain in failure messages.
    pub verbose: bool,

    /// Level at which tolerated irregularities become failures.
    pub fail_level: log::Level,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_samples: NO_LIMIT,
            bit_depth: 16,
            verbose: false,
            fail_level: log::Level::Error,
        }
    }
}

impl DecodeOptions {
    pub fn validate(&self) -> Result<OutputBitDepth> {
        if self.max_samples < NO_LIMIT {
            bail!(SessionError::InvalidMaxSamples(self.max_samples));
        }

        Ok(OutputBitDepth::try_from(self.bit_depth)?)
    }

    fn limit(&self) -> Option<u64> {
        u64::try_from(self.max_samples).ok()
    }
}

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Parsing(u64),
    Decoding(u64),
    Emitting(u64),
    Completed,
    Truncated,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Truncated
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeSummary {
    /// Samples per channel written to the output.
    pub samples_written: u64,

    /// Samples per channel the stream declared, if it did.
    pub expected_samples: Option<u64>,

    pub frames_decoded: u64,
    pub bytes_read: u64,

    /// Size of the data chunk.
    pub data_bytes: u64,

    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u32,

    /// Last progress fraction reported.
    pub progress: f64,
}

#[derive(Debug)]
pub enum SessionOutcome {
    Completed(DecodeSummary),
    Truncated(DecodeSummary),
    Cancelled(DecodeSummary),
    Failed {
        kind: ErrorKind,
        error: anyhow::Error,
    },
}

impl SessionOutcome {
    fn failed(error: anyhow::Error) -> Self {
        SessionOutcome::Failed {
            kind: ErrorKind::of(&error),
            error,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed(_) => SessionState::Completed,
            SessionOutcome::Truncated(_) => SessionState::Truncated,
            SessionOutcome::Cancelled(_) => SessionState::Cancelled,
            SessionOutcome::Failed { .. } => SessionState::Failed,
        }
    }

    pub fn summary(&self) -> Option<&DecodeSummary> {
        match self {
            SessionOutcome::Completed(summary)
            | SessionOutcome::Truncated(summary)
            | SessionOutcome::Cancelled(summary) => Some(summary),
            SessionOutcome::Failed { .. } => None,
        }
    }

    /// Flattens the outcome to the boundary contract: [`SUCCESS`] for every
    /// deliberate stop, otherwise a message prefixed with the failure kind.
    pub fn into_message(self, verbose: bool) -> Result<&'static str, String> {
        match self {
            SessionOutcome::Failed { kind, error } if verbose => Err(format!("{kind}: {error:#}")),
            SessionOutcome::Failed { kind, error } => {
                Err(format!("{kind}: {}", error.root_cause()))
            }
            _ => Ok(SUCCESS),
        }
    }
}

type ProgressCallback = Box<dyn FnMut(f64) + Send>;

/// One decode invocation. See the module docs for the state machine.
pub struct DecodeSession {
    options: DecodeOptions,
    cancel: CancelToken,
    progress: Option<ProgressCallback>,
    state: SessionState,
    last_progress: Option<f64>,
}

impl DecodeSession {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::default(),
            progress: None,
            state: SessionState::Idle,
            last_progress: None,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Registers the progress observer. Fractions are in `[0, 1]` and never
    /// decrease; `1.0` is only reported on completion.
    pub fn on_progress(mut self, callback: impl FnMut(f64) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn report(&mut self, fraction: f64, terminal: bool) {
        let fraction = if terminal {
            fraction.clamp(0.0, 1.0)
        } else {
            fraction.clamp(0.0, PROGRESS_CEILING)
        };

        let due = match self.last_progress {
            None => terminal || fraction >= PROGRESS_STEP,
            Some(last) => terminal || fraction >= last + PROGRESS_STEP,
        };
        if !due {
            return;
        }

        let fraction = self.last_progress.map_or(fraction, |last| fraction.max(last));
        self.last_progress = Some(fraction);
        if let Some(callback) = self.progress.as_mut() {
            callback(fraction);
        }
    }

    /// Decodes `input` to a WAV stream on `output`.
    ///
    /// `input_len` enables byte-based progress for streams that do not
    /// declare their total length.
    pub fn run<R: Read, W: Write + Seek>(
        &mut self,
        input: R,
        input_len: Option<u64>,
        output: W,
    ) -> SessionOutcome {
        let depth = match self.options.validate() {
            Ok(depth) => depth,
            Err(e) => return self.fail(e),
        };

        let mut writer = None;
        let result = self.decode(input, input_len, output, depth, &mut writer);

        let finished = match writer.as_mut() {
            Some(writer) => writer.finish().context("Failed to finalise WAV header"),
            None => Ok(()),
        };

        match (result, finished) {
            (Ok(outcome), Ok(())) => {
                info!("Decode finished: {:?}", outcome.state());
                outcome
            }
            (Ok(_), Err(e)) => self.fail(e),
            (Err(e), finished) => {
                if let Err(finish_err) = finished {
                    warn!("{finish_err:#}");
                }
                self.fail(e)
            }
        }
    }

    fn fail(&mut self, error: anyhow::Error) -> SessionOutcome {
        self.set_state(SessionState::Failed);
        let outcome = SessionOutcome::failed(error);
        if let SessionOutcome::Failed { kind, error } = &outcome {
            info!("Decode failed ({kind}): {error:#}");
        }
        outcome
    }

    fn finish(&mut self, state: SessionState, summary: DecodeSummary) -> SessionOutcome {
        self.set_state(state);
        match state {
            SessionState::Completed => SessionOutcome::Completed(summary),
            SessionState::Truncated => SessionOutcome::Truncated(summary),
            _ => SessionOutcome::Cancelled(summary),
        }
    }

    fn decode<R: Read, W: Write + Seek>(
        &mut self,
        input: R,
        input_len: Option<u64>,
        output: W,
        depth: OutputBitDepth,
        writer_slot: &mut Option<WAVWriter<W>>,
    ) -> Result<SessionOutcome> {
        let limit = self.options.limit();
        let mut frames = FrameReader::new(input);
        frames.set_fail_level(self.options.fail_level);
        let mut decoder = Decoder::default();

        self.set_state(SessionState::Parsing(0));
        let Some(first) = frames.next_frame()? else {
            bail!(ReadError::NoBlocks);
        };

        let expected = first
            .total_samples
            .map(|total| total.saturating_sub(first.index));
        let format = WavFormat {
            sample_rate: first.sample_rate,
            channels: u16::try_from(first.channels)
                .map_err(|_| anyhow!("{} channels do not fit a WAV header", first.channels))?,
            bits_per_sample: depth.bits() as u16,
            channel_mask: first.channel_mask,
        };

        info!(
            "WavPack {:#x}: {} Hz, {} channels, {}-bit source, {} samples, writing {}-bit WAV",
            first.version,
            format.sample_rate,
            format.channels,
            first.source_bits(),
            expected.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            depth.bits()
        );

        if let Some(expected) = expected {
            let samples = limit.map_or(expected, |limit| limit.min(expected));
            let data_bytes = samples.saturating_mul(format.block_align() as u64);
            if data_bytes > format.max_data_bytes() {
                bail!(SessionError::OutputTooLarge(data_bytes));
            }
        }

        let writer = writer_slot.insert(WAVWriter::new(output, format));
        writer
            .write_header()
            .context("Failed to write WAV header")?;

        let mut summary = DecodeSummary {
            expected_samples: expected,
            sample_rate: format.sample_rate,
            channels: first.channels,
            bits_per_sample: depth.bits(),
            ..Default::default()
        };

        let mut pending = Some(first);
        let mut bytes = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.stop(SessionState::Cancelled, summary, &frames, input_len));
            }
            if limit == Some(summary.samples_written) {
                if expected.is_some_and(|n| summary.samples_written >= n) {
                    break;
                }
                return Ok(self.stop(SessionState::Truncated, summary, &frames, input_len));
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    self.set_state(SessionState::Parsing(summary.frames_decoded));
                    match frames.next_frame()? {
                        Some(frame) => frame,
                        None => break,
                    }
                }
            };
            if frame.sample_rate != format.sample_rate {
                warn!(
                    "Frame at index {} declares {} Hz, output stays at {} Hz",
                    frame.index, frame.sample_rate, format.sample_rate
                );
            }

            self.set_state(SessionState::Decoding(summary.frames_decoded));
            let decoded = decoder.decode_frame(&frame)?;

            self.set_state(SessionState::Emitting(summary.frames_decoded));
            let mut take = decoded.samples as u64;
            if let Some(limit) = limit {
                take = take.min(limit - summary.samples_written);
            }

            bytes.clear();
            Requantizer::new(decoded.source_bits, depth)
                .pack_le(&decoded.pcm[..take as usize * decoded.channels], &mut bytes);
            writer.write_samples(&bytes).with_context(|| {
                format!("Failed to write samples of frame at index {}", frame.index)
            })?;

            summary.samples_written += take;
            summary.frames_decoded += 1;
            summary.data_bytes = writer.stats().data_written;
            summary.bytes_read = frames.bytes_consumed();

            if take < decoded.samples as u64 {
                return Ok(self.stop(SessionState::Truncated, summary, &frames, input_len));
            }

            if let Some(fraction) = progress_fraction(&summary, input_len) {
                self.report(fraction, false);
            }
        }

        if let Some(expected) = expected.filter(|&n| summary.samples_written < n) {
            bail!(ReadError::EarlyEnd {
                decoded: summary.samples_written,
                declared: expected,
            });
        }

        summary.bytes_read = frames.bytes_consumed();
        self.report(1.0, true);
        summary.progress = self.last_progress.unwrap_or(1.0);
        Ok(self.finish(SessionState::Completed, summary))
    }

    fn stop<R: Read>(
        &mut self,
        state: SessionState,
        mut summary: DecodeSummary,
        frames: &FrameReader<R>,
        input_len: Option<u64>,
    ) -> SessionOutcome {
        summary.bytes_read = frames.bytes_consumed();
        if summary.samples_written > 0 {
            let fraction = progress_fraction(&summary, input_len).unwrap_or(0.0);
            self.report(fraction.min(PROGRESS_CEILING), true);
        }
        summary.progress = self.last_progress.unwrap_or(0.0);
        info!(
            "Stopped after {} samples ({:?})",
            summary.samples_written, state
        );
        self.finish(state, summary)
    }

    /// Decodes the file at `input` into a fresh WAV file at `output`.
    ///
    /// A failure that leaves the output empty removes it.
    pub fn run_files(&mut self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> SessionOutcome {
        let (input, output) = (input.as_ref(), output.as_ref());

        if let Err(e) = self.options.validate().and_then(|_| check_paths(input, output)) {
            return self.fail(e);
        }

        let opened = File::open(input)
            .and_then(|file| Ok((file.metadata()?.len(), file)))
            .with_context(|| format!("Failed to open input {}", input.display()));
        let (input_len, input_file) = match opened {
            Ok(opened) => opened,
            Err(e) => return self.fail(e),
        };

        let output_file = match File::create(output)
            .with_context(|| format!("Failed to create output {}", output.display()))
        {
            Ok(file) => file,
            Err(e) => return self.fail(e),
        };

        let outcome = self.run(BufReader::new(input_file), Some(input_len), output_file);

        if outcome.state() == SessionState::Failed
            && fs::metadata(output).is_ok_and(|m| m.len() == 0)
        {
            if let Err(e) = fs::remove_file(output) {
                warn!("Failed to remove empty output {}: {e}", output.display());
            }
        }

        outcome
    }
}

fn check_paths(input: &Path, output: &Path) -> Result<()> {
    if input.as_os_str().is_empty() {
        bail!(SessionError::EmptyPath("Input"));
    }
    if output.as_os_str().is_empty() {
        bail!(SessionError::EmptyPath("Output"));
    }

    let same = match (fs::canonicalize(input), fs::canonicalize(output)) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        bail!(SessionError::SamePath);
    }

    Ok(())
}

fn progress_fraction(summary: &DecodeSummary, input_len: Option<u64>) -> Option<f64> {
    match (summary.expected_samples, input_len) {
        (Some(expected), _) if expected > 0 => {
            Some(summary.samples_written as f64 / expected as f64)
        }
        (_, Some(len)) if len > 0 => Some(summary.bytes_read as f64 / len as f64),
        _ => None,
    }
}

/// Decodes `input` to `output` and returns [`SUCCESS`] or a failure message.
///
/// Truncated and cancelled decodes count as success; the output then holds
/// the samples written before the stop.
pub fn decode_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: DecodeOptions,
) -> Result<&'static str, String> {
    let verbose = options.verbose;
    DecodeSession::new(options)
        .run_files(input, output)
        .into_message(verbose)
}
