use std::fmt::Display;
use std::io::Write;

use anyhow::Result;
use env_logger::Builder;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::Level;

use crate::cli::command::{Cli, LogFormat};

/// Installs the global logger for `cli`.
///
/// With `--progress` the logger is bridged through the returned
/// [`MultiProgress`] so records print above the bars instead of through them.
pub fn init(cli: &Cli) -> Result<Option<MultiProgress>> {
    let level = cli.loglevel.to_level_filter();

    let mut builder = Builder::from_default_env();
    builder.filter_level(level);
    apply_format(&mut builder, cli.log_format);

    if !cli.progress {
        builder.try_init()?;
        return Ok(None);
    }

    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), builder.build()).try_init()?;
    log::set_max_level(level);

    Ok(Some(multi))
}

fn apply_format(builder: &mut Builder, format: LogFormat) {
    match format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json_record(
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    &record.args().to_string(),
                );
                writeln!(buf, "{line}")
            });
        }
    }
}

/// One log record as a single-line JSON object.
fn json_record(ts: impl Display, level: Level, target: &str, msg: &str) -> String {
    format!("{{\"ts\":\"{ts}\",\"lvl\":\"{level}\",\"target\":\"{target}\",\"msg\":{msg:?}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_records_quote_messages() {
        let line = json_record(
            "2026-01-01T00:00:00Z",
            Level::Warn,
            "wavpack::process::decode",
            "crc \"mismatch\" in block 3",
        );
        assert_eq!(
            line,
            r#"{"ts":"2026-01-01T00:00:00Z","lvl":"WARN","target":"wavpack::process::decode","msg":"crc \"mismatch\" in block 3"}"#
        );
    }
}
