//! Batch tuning executable for gemmtune.

use anyhow::Result;
use clap::Parser;
use gemmtune_driver::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
