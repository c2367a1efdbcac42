use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    butterfly_iso::logging::init(cli.json_logs);
    cli.run()
}
