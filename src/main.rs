//! `qbank`, a command line tool for file-backed question banks.

use clap::Parser;

mod cli;

fn main() -> anyhow::Result<()> {
    cli::Cli::parse().run()
}
