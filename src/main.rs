mod app;
mod area;
mod config;
mod filter;
mod osm;
mod sinks;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;

use app::{Cli, OutputFormat, init_sink, log_summary, run};
use config::{NoiceConfig, RuntimeConfig};
use osm::InputSource;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and succeed; usage errors exit 1
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let file_config = match &cli.config {
        Some(path) => NoiceConfig::load(path)?,
        None => NoiceConfig::default(),
    };
    let runtime = RuntimeConfig::resolve(
        file_config,
        cli.policy,
        cli.node_cache_mode,
        cli.node_cache_max_nodes,
        cli.debug,
    );

    let source = InputSource::open(&cli.input)
        .with_context(|| format!("CLI: Failed to open input {:?}", cli.input))?;
    let format = OutputFormat::resolve(cli.format, &cli.output);
    let mut sink = init_sink(format, &cli.output)?;

    let start = std::time::Instant::now();
    let report = run(&source, &runtime, sink.as_mut())?;
    sink.finish().context("Pipeline: Failed to finalize sink")?;

    log_summary(&report);
    tracing::info!(
        "Done! Written {} features in {:.2}s",
        report.tally.accepted(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
