mod cli;
mod clip;
mod run;

use anyhow::{Context, Result};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    // One thread drives the GPU; blocking work (decode, encode) uses the blocking pool.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run::run(cli))
}
