use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> miette::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?cli, "parsed arguments");

    cli.run()
}
