use clap::Parser;
use kitrouter::cli::{run_cli, Cli};
use kitrouter::logging::{init_logging, LogConfig};

fn main() -> anyhow::Result<()> {
    let _guard = init_logging(&LogConfig::from_env())?;
    run_cli(Cli::parse())
}
