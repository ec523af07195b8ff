//! docfetch — entry point.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use docfetch::{LoadConfig, LoadSession, ReqwestNetwork, Termination};
use docfetch_cli::config::{load_config, resolve_chromium_path, CHROMIUM_PATH_ENV};
use docfetch_cli::{ChromiumHost, Invocation};

fn main() {
    let invocation = match Invocation::parse_from(std::env::args_os()) {
        Ok(invocation) => invocation,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&invocation.cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(invocation) {
        Ok(termination) => termination.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(invocation: Invocation) -> anyhow::Result<Termination> {
    let config = load_config(&invocation, &mut std::io::stdin().lock())?;
    let chromium = resolve_chromium_path(invocation.cli.chromium.as_deref()).with_context(|| {
        format!("Chromium not found; pass --chromium or set {CHROMIUM_PATH_ENV}")
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(load(config, &chromium))
}

async fn load(config: LoadConfig, chromium: &Path) -> anyhow::Result<Termination> {
    let network = Arc::new(ReqwestNetwork::new()?);
    let session = LoadSession::new(config, network)?;
    let mut host = ChromiumHost::launch(chromium).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = session.run(&mut host, &mut out).await;
    host.close().await;

    let termination = result?;
    if termination == Termination::FatalLoadFailure {
        tracing::error!("the document failed to load");
    }
    Ok(termination)
}
