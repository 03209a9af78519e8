use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;

use cli::command::{Cli, Commands};
use cli::decode::cmd_decode;
use cli::info::cmd_info;

mod cli;
mod input;
mod logger;
pub(crate) mod timestamp;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = logger::init(&cli)?;

    run(&cli, multi.as_ref())
}

fn run(cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    match &cli.command {
        Commands::Decode(args) => cmd_decode(args, cli, multi),
        Commands::Info(args) => cmd_info(args, cli, multi),
    }
}
