use anyhow::Result;
use clap::Parser;

use eddic::*;

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    simplelog::CombinedLogger::init(vec![simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )])?;

    run(&args)
}
