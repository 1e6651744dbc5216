use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ssherlock_runner::agent::{AgentJobRunner, TiktokenCounter};
use ssherlock_runner::config::RunnerConfig;
use ssherlock_runner::control_plane::{ControlPlane, HttpControlPlane};
use ssherlock_runner::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RunnerConfig::from_env().context("Failed to read runner configuration")?;

    // RUST_LOG wins over LOG_LEVEL
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    eprintln!("SSHerlock runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Control plane: {}", config.control_plane.base_url);
    eprintln!("   Runner: #{}", config.runner_number);
    eprintln!("   Max runners: {}", config.max_runners);
    eprintln!("   Model: {}\n", config.agent.model);

    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(&config.control_plane)
            .context("Failed to create control-plane client")?,
    );
    let tokens = Arc::new(
        TiktokenCounter::new(&config.agent.token_encoding_model)
            .context("Failed to load tokenizer")?,
    );
    let runner = Arc::new(AgentJobRunner::new(
        control_plane.clone(),
        config.agent.clone(),
        tokens,
    ));

    let dispatcher = Dispatcher::new(&config, control_plane, runner);
    let stats = dispatcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        jobs = stats.jobs_started,
        poll_errors = stats.poll_errors,
        worker_panics = stats.worker_panics,
        "Runner shut down"
    );
    Ok(())
}
