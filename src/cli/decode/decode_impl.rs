use super::decoder_thread::{DecoderThreadConfig, spawn_decoder_thread};
use super::progress::{create_progress_bar, finalize_progress_bar, update_progress_bar};
use crate::cli::command::{Cli, DecodeArgs};
use crate::input::is_pipe;
use crate::timestamp::{duration_secs, time_str};
use anyhow::{Result, anyhow, bail};
use indicatif::MultiProgress;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use wavpack::process::session::{DecodeOptions, DecodeSummary, SessionOutcome};

pub fn cmd_decode(args: &DecodeArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let output_path = resolve_output_path(&args.input, args.output_path.as_deref())?;

    log::info!(
        "Decoding WavPack stream: {} -> {} (strict mode: {}, bits: {})",
        args.input.display(),
        output_path.display(),
        cli.strict,
        args.bits.bits()
    );

    let options = DecodeOptions {
        max_samples: args.max_samples,
        bit_depth: args.bits.bits(),
        verbose: args.verbose,
        fail_level: cli.fail_level(),
    };

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi)?),
        None => None,
    };

    let (tx, rx) = mpsc::channel();
    let start_time = std::time::Instant::now();

    let decode_thread = spawn_decoder_thread(DecoderThreadConfig {
        input_path: args.input.clone(),
        output_path,
        options,
        tx,
    });

    // Ends when the session drops its progress callback.
    while let Ok(fraction) = rx.recv() {
        if let Some(ref pb) = pb {
            update_progress_bar(pb, fraction);
        }
    }

    let outcome = match decode_thread.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Decode thread panicked")),
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(pb) = pb {
                pb.finish_with_message("decode failed");
            }
            return Err(e);
        }
    };

    if let Some(summary) = outcome.summary() {
        report_summary(summary, &outcome, start_time, pb.as_ref());
    } else if let Some(pb) = pb {
        pb.finish_with_message("decode failed");
    }

    match outcome.into_message(args.verbose) {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(message) => bail!(message),
    }
}

/// Output path for a decode: the explicit one, or the input with a `.wav`
/// extension.
fn resolve_output_path(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }

    if is_pipe(input) {
        bail!("--output-path is required when reading from stdin");
    }

    Ok(input.with_extension("wav"))
}

fn report_summary(
    summary: &DecodeSummary,
    outcome: &SessionOutcome,
    start_time: std::time::Instant,
    pb: Option<&indicatif::ProgressBar>,
) {
    let audio_secs = duration_secs(summary.samples_written, summary.sample_rate);
    let elapsed = start_time.elapsed().as_secs_f64();
    let realtime_multiplier = if elapsed > 0.0 {
        audio_secs / elapsed
    } else {
        0.0
    };

    log::info!(
        "{:?}: {} samples x {} channels at {} Hz, {}-bit, {} frames, {} data bytes",
        outcome.state(),
        summary.samples_written,
        summary.channels,
        summary.sample_rate,
        summary.bits_per_sample,
        summary.frames_decoded,
        summary.data_bytes
    );

    if let Some(pb) = pb {
        finalize_progress_bar(
            pb,
            format!(
                "speed: {realtime_multiplier:.1}x | timestamp: {}",
                time_str(audio_secs)
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_path_replaces_extension() {
        let path = resolve_output_path(Path::new("music/track.wv"), None).unwrap();
        assert_eq!(path, PathBuf::from("music/track.wav"));

        let path = resolve_output_path(Path::new("track"), None).unwrap();
        assert_eq!(path, PathBuf::from("track.wav"));

        let path =
            resolve_output_path(Path::new("track.wv"), Some(Path::new("out/x.wav"))).unwrap();
        assert_eq!(path, PathBuf::from("out/x.wav"));

        assert!(resolve_output_path(Path::new("-"), None).is_err());
    }
}
