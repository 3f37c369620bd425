use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use ilowatch::api;
use ilowatch::integrations::ilo::unique_id;
use ilowatch::integrations::ilo::Connector;
use ilowatch::integrations::ilo::HealthClient;
use ilowatch::integrations::ilo::IloConfig;
use ilowatch::integrations::ilo::RedfishConnector;
use ilowatch::Config;
use ilowatch::Engine;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Health poller and power control for HP iLO management controllers
#[derive(Parser)]
#[command(name = "ilowatch")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "ilowatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every configured controller and serve the HTTP API (default)
    Run,

    /// Fetch once from each controller and print the derived device id
    Check {
        /// Only check this instance
        instance: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, &cli.config).await,
        Command::Check { instance } => check(&config, instance.as_deref()).await,
    }
}

async fn run(config: Config, path: &std::path::Path) -> anyhow::Result<()> {
    info!("ilowatch starting");
    info!("Loaded config from: {}", path.display());

    let engine = Arc::new(Engine::new());
    engine.register_integrations_from_config(&config);

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                error!("Engine stopped with error: {}", e);
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut api_task = if config.api.enabled {
        Some(tokio::spawn(api::serve(
            engine.clone(),
            config.api.listen.clone(),
            config.api.port,
            shutdown_rx,
        )))
    } else {
        info!("HTTP API disabled");
        None
    };

    let api_stopped = async {
        match api_task.as_mut() {
            Some(task) => task.await,
            None => std::future::pending().await,
        }
    };

    let mut result = Ok(());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            if let Some(task) = api_task.take() {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("HTTP API server error: {:#}", e),
                    Err(e) => warn!("HTTP API task failed: {}", e),
                }
            }
        }
        stopped = api_stopped => {
            result = match stopped {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.context("HTTP API server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("HTTP API task failed")),
            };
        }
    }

    engine.shutdown().await;
    engine_task.abort();
    info!("ilowatch stopped");
    result
}

/// One trial fetch per instance, the same one setup performs.
async fn check(config: &Config, only: Option<&str>) -> anyhow::Result<()> {
    let instances: Vec<(&String, &IloConfig)> = config
        .integrations
        .ilo
        .iter()
        .filter(|(name, _)| only.is_none_or(|o| o == name.as_str()))
        .collect();

    if instances.is_empty() {
        match only {
            Some(name) => anyhow::bail!("No iLO instance named {}", name),
            None => anyhow::bail!("No iLO instances configured"),
        }
    }

    let mut failures = 0;
    for (name, ilo) in instances {
        let params = ilo.connection_params();
        let result = match RedfishConnector.connect(&params) {
            Ok(client) => client.fetch().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(snapshot) => println!(
                "{}: ok, id {} ({}, power {}, health {})",
                name,
                unique_id(snapshot.serial_number.as_deref(), &params.host, params.port),
                snapshot.model.as_deref().unwrap_or("unknown model"),
                snapshot.power_status,
                snapshot.health
            ),
            Err(e) => {
                failures += 1;
                println!("{}: {}", name, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} instance(s) failed the check", failures);
    }
    Ok(())
}
