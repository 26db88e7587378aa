use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout carries command output; diagnostics go to stderr.
    let filter = EnvFilter::try_from_env("MEMLOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let status = memlog::run().context("memlog")?;
    if status != 0 {
        std::process::exit(i32::from(status));
    }
    Ok(())
}
