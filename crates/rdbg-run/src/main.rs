use clap::Parser;

mod cli;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rdbg=debug,rdbg_run=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::Cli::parse().run()
}
