use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;

use super::command::{Cli, InfoArgs, InfoFormat};
use crate::input::InputReader;
use crate::timestamp::{duration_secs, time_str};
use wavpack::process::parse::{Frame, FrameReader};

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing WavPack stream: {}", args.input.display());

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Analyzing frames...");
            Some(pb)
        }
        None => None,
    };

    let result = analyze_stream(args, cli, pb.as_ref());

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    match result? {
        Some(info) => match args.format {
            InfoFormat::Text => display_stream_info(&info),
            InfoFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&info)?),
        },
        None => {
            println!("No WavPack blocks found in the file.");
            println!("This doesn't appear to be a valid WavPack stream.");
        }
    }

    Ok(())
}

fn analyze_stream(args: &InfoArgs, cli: &Cli, pb: Option<&ProgressBar>) -> Result<Option<StreamInfo>> {
    let input = InputReader::new(&args.input)?;
    let mut reader = FrameReader::new(input);
    reader.set_fail_level(cli.fail_level());

    let mut info: Option<StreamInfo> = None;

    while let Some(frame) = reader
        .next_frame()
        .with_context(|| format!("Failed to analyze {}", args.input.display()))?
    {
        match info.as_mut() {
            Some(info) => info.add_frame(&frame),
            None => info = Some(StreamInfo::from_first_frame(&frame)),
        }

        if reader.frames_read().is_multiple_of(100) {
            if let Some(pb) = pb {
                pb.set_message(format!("Analyzing frames...       {}", reader.frames_read()));
                pb.tick();
            }
        }
    }

    Ok(info.map(|mut info| {
        info.finish(reader.bytes_consumed());
        info
    }))
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    version: String,
    sample_rate: u32,
    channels: usize,
    channel_mask: String,
    bits_per_sample: u32,
    mode: Mode,
    float: bool,
    /// Total declared by the first block, if any.
    declared_samples: Option<u64>,
    samples: u64,
    duration: String,
    frames: u64,
    blocks: u64,
    checksummed_blocks: u64,
    bytes: u64,
    average_bitrate_kbps: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum Mode {
    Lossless,
    Hybrid,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Lossless => f.write_str("lossless"),
            Mode::Hybrid => f.write_str("hybrid (lossy)"),
        }
    }
}

impl StreamInfo {
    fn from_first_frame(frame: &Frame) -> Self {
        let flags = frame.blocks[0].header.flags;
        let mut info = Self {
            version: format!("{:#06x}", frame.version),
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            channel_mask: format!("{:#x}", frame.channel_mask),
            bits_per_sample: frame.source_bits(),
            mode: if flags.hybrid() {
                Mode::Hybrid
            } else {
                Mode::Lossless
            },
            float: flags.float_data(),
            declared_samples: frame.total_samples,
            samples: 0,
            duration: String::new(),
            frames: 0,
            blocks: 0,
            checksummed_blocks: 0,
            bytes: 0,
            average_bitrate_kbps: 0.0,
        };
        info.add_frame(frame);
        info
    }

    fn add_frame(&mut self, frame: &Frame) {
        self.frames += 1;
        self.samples += frame.samples as u64;
        self.blocks += frame.blocks.len() as u64;
        self.checksummed_blocks += frame
            .blocks
            .iter()
            .filter(|block| block.checksum_verified)
            .count() as u64;
    }

    fn finish(&mut self, bytes: u64) {
        self.bytes = bytes;

        let secs = duration_secs(self.samples, self.sample_rate);
        self.duration = time_str(secs);
        if secs > 0.0 {
            // kbps, one decimal place
            self.average_bitrate_kbps = ((bytes as f64 * 8.0) / (secs * 100.0)).round() / 10.0;
        }
    }
}

fn display_stream_info(info: &StreamInfo) {
    println!();
    println!("WavPack Stream Information");
    println!("==========================");
    println!();

    println!("Stream Information");
    println!("  Stream version            {}", info.version);
    println!("  Sampling rate             {} Hz", info.sample_rate);
    println!("  Channels                  {}", info.channels);
    println!("  Channel mask              {}", info.channel_mask);
    println!("  Bits per sample           {}", info.bits_per_sample);
    println!("  Mode                      {}", info.mode);
    println!("  Floating point            {}", info.float);
    match info.declared_samples {
        Some(total) => println!("  Declared samples          {total}"),
        None => println!("  Declared samples          unknown"),
    }
    println!();

    println!("Analysis Summary");
    println!("  Frames processed          {}", info.frames);
    println!(
        "  Blocks                    {} ({} with checksum)",
        info.blocks, info.checksummed_blocks
    );
    println!("  Samples                   {}", info.samples);

    let size_mb = info.bytes as f64 / 1_000_000.0;
    println!("  Size                      {size_mb:.2} MB ({} bytes)", info.bytes);
    println!("  Duration                  {}", info.duration);
    if info.average_bitrate_kbps > 0.0 {
        println!("  Average data rate         {:.1} kbps", info.average_bitrate_kbps);
    }
    println!();
}
