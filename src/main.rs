use std::io::Read;

use anyhow::Context as _;
use clap::Parser;

use bsst::runtime::args::Cli;

fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = cli.into_env()?;

    let source = if env.input_file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading script from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&env.input_file)
            .with_context(|| format!("reading script from {}", env.input_file))?
    };

    let report = bsst::analyze_to_report(&env, &source)?;
    print!("{report}");
    Ok(())
}
