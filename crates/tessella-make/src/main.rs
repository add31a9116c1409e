//! Tessella Make entry point

use anyhow::Result;
use clap::Parser;

use tessella_make::{execute, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli)
}
