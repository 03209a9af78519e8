use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Resolution of the percentage bar.
pub const PROGRESS_UNITS: u64 = 1000;

pub fn create_progress_bar(multi: &MultiProgress) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new(PROGRESS_UNITS));
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {percent}%\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
    )?);

    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("initializing decoder");
    Ok(pb)
}

pub fn update_progress_bar(pb: &ProgressBar, fraction: f64) {
    pb.set_position((fraction * PROGRESS_UNITS as f64).round() as u64);
    pb.set_message(format!("decoding ({:.1}%)", fraction * 100.0));
}

pub fn finalize_progress_bar(pb: &ProgressBar, message: String) {
    pb.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {percent}%\n{msg} | elapsed: {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.finish_with_message(message);
}
